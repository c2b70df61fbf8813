use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use nndl_engine::live::LiveEvent;
use nndl_engine::transfer::format_bytes;
use nndl_engine::{
    DeliveryConfig, Downloader, LiveSessionLoop, SessionApiInfo, SessionRequest, TransferReport,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::error::Result;
use crate::progress::BarProgress;

/// Runs one subcommand against a shared engine configuration.
pub struct CommandExecutor {
    downloader: Downloader,
    quiet: bool,
}

impl CommandExecutor {
    pub fn new(config: DeliveryConfig, quiet: bool) -> Result<Self> {
        Ok(Self {
            downloader: Downloader::new(config)?,
            quiet,
        })
    }

    pub async fn download(
        &self,
        session_info: &Path,
        request: SessionRequest,
        output: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        let info = read_session_info(session_info)?;
        let progress = Arc::new(BarProgress::new(self.quiet));

        let report = self
            .downloader
            .download_session(&info, &request, output, progress, token)
            .await?;

        info!(
            session_id = %report.session_id,
            video = %report.sources.video.id,
            audio = %report.sources.audio.id,
            "Session download finished"
        );
        self.summarize(output, &report.transfer);
        Ok(())
    }

    pub async fn fetch(&self, url: &Url, output: &Path, token: &CancellationToken) -> Result<()> {
        let progress = Arc::new(BarProgress::new(self.quiet));
        let report = self
            .downloader
            .download_url(url, output, progress, token)
            .await?;
        self.summarize(output, &report);
        Ok(())
    }

    pub async fn live(
        &self,
        ws_url: Url,
        broadcast_id: &str,
        lenient: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut config = self.downloader.config().live.clone();
        if lenient {
            config.strict_frames = false;
        }
        let live = LiveSessionLoop::new(
            self.downloader.client().clone(),
            ws_url,
            broadcast_id,
            config,
        );

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let printer = tokio::spawn(async move {
            while let Some(LiveEvent::StreamResolved(stream)) = events_rx.recv().await {
                println!("{}", stream.stream_url);
            }
        });

        let outcome = live.run(events_tx, token).await;
        if let Err(e) = printer.await {
            warn!(error = %e, "Stream printer task failed");
        }

        let report = outcome?;
        info!(
            streams = report.streams.len(),
            closed_by = ?report.closed_by,
            "Live session ended"
        );
        Ok(())
    }

    fn summarize(&self, output: &Path, report: &TransferReport) {
        if self.quiet {
            return;
        }
        if report.already_complete {
            println!("{} is already complete", output.display());
            return;
        }
        println!(
            "Saved {} to {} in {:.1}s",
            format_bytes(report.bytes_written),
            output.display(),
            report.elapsed.as_secs_f64()
        );
    }
}

fn read_session_info(path: &Path) -> Result<SessionApiInfo> {
    let text = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(serde_json::from_str(&text)?)
}
