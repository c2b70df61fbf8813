mod cli;
mod commands;
mod config;
mod error;
mod progress;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use nndl_engine::SessionRequest;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::{FileConfig, apply_args},
    error::Result,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _guard = match init_logging(args.verbose, args.quiet, args.log.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = FileConfig::load(args.config.as_deref())?.into_delivery()?;
    apply_args(&mut config, &args);

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            signal_token.cancel();
        }
    });

    let executor = CommandExecutor::new(config, args.quiet)?;

    match args.command {
        Commands::Download {
            session_info,
            output,
            extension,
        } => {
            let request = SessionRequest {
                video_quality: args.video_quality,
                audio_quality: args.audio_quality,
                file_extension: extension,
            };
            executor
                .download(&session_info, request, &output, &token)
                .await?;
        }
        Commands::Fetch { url, output } => {
            executor.fetch(&url, &output, &token).await?;
        }
        Commands::Live {
            ws_url,
            broadcast_id,
            lenient,
        } => {
            executor.live(ws_url, &broadcast_id, lenient, &token).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, log_dir: Option<PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(dir, "nndl.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}
