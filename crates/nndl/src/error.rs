use std::path::PathBuf;

use reqwest::StatusCode;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure categories surfaced to callers.
///
/// Several concrete variants of [`DeliveryError`] collapse onto one kind; for
/// example HTTP status failures, truncated bodies and websocket errors are all
/// [`ErrorKind::NetworkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    QualityUnavailable,
    InvalidConfiguration,
    SessionNegotiationFailed,
    SessionExpired,
    IntegrityMismatch,
    LengthMismatch,
    NetworkError,
    FileSystemError,
    ProtocolViolation,
    Cancelled,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("quality `{requested}` is not available, available qualities: [{}]", .available.join(", "))]
    QualityUnavailable {
        requested: String,
        available: Vec<String>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("session negotiation failed: {reason}")]
    SessionNegotiationFailed { reason: String },

    #[error("session expired: {reason}")]
    SessionExpired { reason: String },

    #[error("partial file does not match remote content at byte {offset}")]
    IntegrityMismatch { offset: u64 },

    #[error(
        "local file is {local} bytes but the remote resource is {remote} bytes; check the existing file or force the highest quality"
    )]
    LengthMismatch { local: u64, remote: u64 },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("response body ended after {received} of {expected} bytes")]
    IncompleteBody { expected: u64, received: u64 },

    #[error("websocket error: {source}")]
    WebSocket {
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("file system error on {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DeliveryError {
    pub fn quality_unavailable(requested: impl Into<String>, available: Vec<String>) -> Self {
        Self::QualityUnavailable {
            requested: requested.into(),
            available,
        }
    }

    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub fn negotiation(reason: impl Into<String>) -> Self {
        Self::SessionNegotiationFailed {
            reason: reason.into(),
        }
    }

    pub fn expired(reason: impl Into<String>) -> Self {
        Self::SessionExpired {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::QualityUnavailable { .. } => ErrorKind::QualityUnavailable,
            Self::InvalidConfiguration { .. } | Self::InvalidUrl { .. } => {
                ErrorKind::InvalidConfiguration
            }
            Self::SessionNegotiationFailed { .. } => ErrorKind::SessionNegotiationFailed,
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::Network { .. }
            | Self::HttpStatus { .. }
            | Self::IncompleteBody { .. }
            | Self::WebSocket { .. } => ErrorKind::NetworkError,
            Self::FileSystem { .. } => ErrorKind::FileSystemError,
            Self::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the transport layer may retry the request that produced this error.
    ///
    /// Only transient transport failures qualify. Engine-level recovery (the
    /// restart after an integrity mismatch) is decided by the transfer engine,
    /// never here.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => matches!(
                *status,
                StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            Self::Network { source } => {
                source.is_connect() || source.is_timeout() || source.is_request()
            }
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DeliveryError {
    fn from(source: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            source: Box::new(source),
        }
    }
}
