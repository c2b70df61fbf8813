//! nndl-engine: media delivery for session-negotiated video and live broadcasts.
//!
//! ## Components
//!
//! - [`source`] - quality selection over the platform's best-first source lists
//! - [`session`] - session creation and renewal against the delivery cluster
//! - [`transfer`] - resumable single-stream and partitioned parallel downloads
//! - [`live`] - live broadcast control socket and master playlist resolution
//! - [`Downloader`] - the complete flow from session metadata to a file on disk
//!
//! Every long-running operation takes a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! and joins its background tasks before returning.

pub mod config;
pub mod downloader;
pub mod error;
pub mod http;
pub mod live;
pub mod proxy;
pub mod session;
pub mod source;
pub mod transfer;

pub use config::{DeliveryConfig, HttpConfig, LiveConfig, RenewalPolicy, SessionConfig, TransferConfig};
pub use downloader::{DownloadReport, Downloader, SessionRequest};
pub use error::{DeliveryError, ErrorKind, Result};
pub use http::{HttpClient, RetryPolicy};
pub use live::{LiveEvent, LiveReport, LiveSessionLoop};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use session::{SessionApiInfo, SessionHandle, SessionNegotiator, SessionSpec, SessionState};
pub use source::{QualityTier, SelectedSources, SourceCandidate};
pub use transfer::{LogProgress, ProgressObserver, TransferEngine, TransferPlan, TransferReport};
