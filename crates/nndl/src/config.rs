use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::http::RetryPolicy;
use crate::proxy::ProxyConfig;

pub const DEFAULT_USER_AGENT: &str = concat!("nndl/", env!("CARGO_PKG_VERSION"));

/// Size of one transfer block. Progress is reported and the resume overlap
/// check is performed at this granularity.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Interval between `watching` frames on a live socket.
pub const LIVE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything the engine can be configured with.
#[derive(Debug, Clone, Default)]
pub struct DeliveryConfig {
    pub http: HttpConfig,
    pub transfer: TransferConfig,
    pub session: SessionConfig,
    pub live: LiveConfig,
}

/// Transport options shared by every request the engine makes.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for a single request, zero disables it.
    ///
    /// Media bodies can take far longer than any sensible request timeout, so
    /// streaming downloads rely on `read_timeout` instead.
    pub timeout: Duration,

    /// Time allowed to establish a connection
    pub connect_timeout: Duration,

    /// Maximum time between two received body chunks
    pub read_timeout: Duration,

    pub follow_redirects: bool,

    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    /// Automatic retry applied to server errors and transient connection failures
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::default_headers(),
            proxy: None,
            use_system_proxy: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers
    }
}

/// Options for materializing a resource on disk.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Number of parallel partitions.
    ///
    /// `None` means unset and selects the resumable single-stream path.
    /// `Some(0)` is rejected as invalid.
    pub threads: Option<u32>,

    pub block_size: usize,

    /// How often the multi-partition reporter samples the shared counter
    pub progress_interval: Duration,

    /// Only accept the platform's preferred sources, and never resume
    /// over a local file larger than the remote resource.
    pub force_highest: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            threads: None,
            block_size: DEFAULT_BLOCK_SIZE,
            progress_interval: Duration::from_millis(500),
            force_highest: false,
        }
    }
}

/// How the renewal interval is derived from the lifetime granted by the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenewalPolicy {
    /// Renew after this fraction of the advertised lifetime.
    Fraction(f64),
    /// Renew on a constant interval, clamped below the advertised lifetime.
    Fixed(Duration),
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        RenewalPolicy::Fraction(0.5)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub renewal: RenewalPolicy,

    /// Lower bound for the renewal interval, ignored when the lifetime itself is shorter
    pub min_interval: Duration,

    /// Query appended to the session API base on creation
    pub create_query: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renewal: RenewalPolicy::default(),
            min_interval: Duration::from_secs(1),
            create_query: "suppress_response_codes=true&_format=xml".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub heartbeat_interval: Duration,

    /// End the loop on frames of an unknown type instead of skipping them
    pub strict_frames: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: LIVE_HEARTBEAT_INTERVAL,
            strict_frames: true,
        }
    }
}
