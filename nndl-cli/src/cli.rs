use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nndl_engine::ProxyType;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "NNDL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Proxy server URL (e.g. socks5://127.0.0.1:1080)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Proxy scheme, inferred from the URL when omitted
    #[arg(long, global = true, value_enum, requires = "proxy")]
    pub proxy_type: Option<ProxyType>,

    #[arg(long, global = true, requires = "proxy")]
    pub proxy_username: Option<String>,

    #[arg(long, global = true, requires = "proxy_username")]
    pub proxy_password: Option<String>,

    /// Number of parallel partitions, single-stream resumable download when omitted
    #[arg(short = 'n', long, global = true)]
    pub threads: Option<u32>,

    /// Video source id, or `highest`/`lowest`
    #[arg(long, global = true)]
    pub video_quality: Option<String>,

    /// Audio source id, or `highest`/`lowest`
    #[arg(long, global = true)]
    pub audio_quality: Option<String>,

    /// Fail unless the platform's preferred sources are available
    #[arg(long, global = true)]
    pub force_high_quality: bool,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs to a daily rolling `nndl.log` in DIR
    #[arg(long, global = true, value_name = "DIR", num_args = 0..=1, default_missing_value = ".")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Negotiate a delivery session and download its content
    Download {
        /// JSON file holding the session API object, `-` reads stdin
        #[arg(long)]
        session_info: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Container extension requested from the delivery cluster
        #[arg(long, default_value = "mp4")]
        extension: String,
    },

    /// Download a directly addressable URL
    Fetch {
        url: Url,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Keep a live broadcast socket open and print every announced stream
    Live {
        #[arg(long)]
        ws_url: Url,

        #[arg(long)]
        broadcast_id: String,

        /// Skip frames of unknown type instead of ending the session
        #[arg(long)]
        lenient: bool,
    },
}
