//! TOML configuration file, layered under the command-line flags.
//!
//! ```toml
//! [http]
//! user_agent = "nndl"
//! max_retries = 5
//! headers = { Referer = "https://www.nicovideo.jp/" }
//!
//! [transfer]
//! threads = 4
//!
//! [session]
//! renewal_interval_secs = 15
//!
//! [live]
//! strict_frames = false
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use nndl_engine::{DeliveryConfig, ProxyAuth, ProxyConfig, RenewalPolicy};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub http: HttpSection,
    pub transfer: TransferSection,
    pub session: SessionSection,
    pub live: LiveSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub follow_redirects: Option<bool>,
    pub use_system_proxy: Option<bool>,
    pub proxy: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferSection {
    pub threads: Option<u32>,
    pub block_size: Option<usize>,
    pub progress_interval_ms: Option<u64>,
    pub force_highest: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Renew after this fraction of the granted lifetime
    pub renewal_fraction: Option<f64>,
    /// Renew on a fixed interval instead, takes precedence over the fraction
    pub renewal_interval_secs: Option<u64>,
    pub min_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveSection {
    pub heartbeat_interval_secs: Option<u64>,
    pub strict_frames: Option<bool>,
}

impl FileConfig {
    /// Read the file at `path`, or the defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        debug!(path = %path.display(), "Loading config file");
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, &path.display().to_string())
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| AppError::Config {
            path: origin.to_string(),
            source,
        })
    }

    /// Fold the file values over the engine defaults.
    pub fn into_delivery(self) -> Result<DeliveryConfig> {
        let mut config = DeliveryConfig::default();

        let http = &mut config.http;
        if let Some(ua) = self.http.user_agent {
            http.user_agent = ua;
        }
        if let Some(secs) = self.http.timeout_secs {
            http.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.http.connect_timeout_secs {
            http.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.http.read_timeout_secs {
            http.read_timeout = Duration::from_secs(secs);
        }
        if let Some(follow) = self.http.follow_redirects {
            http.follow_redirects = follow;
        }
        if let Some(system) = self.http.use_system_proxy {
            http.use_system_proxy = system;
        }
        if let Some(proxy) = self.http.proxy {
            http.proxy = Some(ProxyConfig::from_url(proxy));
        }
        if let Some(retries) = self.http.max_retries {
            http.retry.max_retries = retries;
        }
        if let Some(ms) = self.http.retry_base_delay_ms {
            http.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.http.retry_max_delay_ms {
            http.retry.max_delay = Duration::from_millis(ms);
        }
        for (name, value) in self.http.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::InvalidInput(format!("header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| AppError::InvalidInput(format!("header `{name}` value: {e}")))?;
            http.headers.insert(header, value);
        }

        let transfer = &mut config.transfer;
        if self.transfer.threads.is_some() {
            transfer.threads = self.transfer.threads;
        }
        if let Some(size) = self.transfer.block_size {
            if size == 0 {
                return Err(AppError::InvalidInput("block_size must be positive".into()));
            }
            transfer.block_size = size;
        }
        if let Some(ms) = self.transfer.progress_interval_ms {
            transfer.progress_interval = Duration::from_millis(ms);
        }
        if let Some(force) = self.transfer.force_highest {
            transfer.force_highest = force;
        }

        let session = &mut config.session;
        if let Some(secs) = self.session.renewal_interval_secs {
            session.renewal = RenewalPolicy::Fixed(Duration::from_secs(secs));
        } else if let Some(fraction) = self.session.renewal_fraction {
            session.renewal = RenewalPolicy::Fraction(fraction);
        }
        if let Some(ms) = self.session.min_interval_ms {
            session.min_interval = Duration::from_millis(ms);
        }

        if let Some(secs) = self.live.heartbeat_interval_secs {
            if secs == 0 {
                return Err(AppError::InvalidInput(
                    "heartbeat_interval_secs must be positive".into(),
                ));
            }
            config.live.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(strict) = self.live.strict_frames {
            config.live.strict_frames = strict;
        }

        Ok(config)
    }
}

/// Apply command-line overrides on top of the file configuration.
pub fn apply_args(config: &mut DeliveryConfig, args: &Args) {
    if let Some(url) = &args.proxy {
        let mut proxy = ProxyConfig::from_url(url.clone());
        if let Some(proxy_type) = args.proxy_type {
            proxy.proxy_type = proxy_type;
        }
        if let Some(username) = &args.proxy_username {
            proxy.auth = Some(ProxyAuth {
                username: username.clone(),
                password: args.proxy_password.clone().unwrap_or_default(),
            });
        }
        config.http.proxy = Some(proxy);
    }
    if args.threads.is_some() {
        config.transfer.threads = args.threads;
    }
    if args.force_high_quality {
        config.transfer.force_highest = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use nndl_engine::ProxyType;

    #[test]
    fn empty_file_keeps_engine_defaults() {
        let config = FileConfig::parse("", "inline").unwrap().into_delivery().unwrap();
        let defaults = DeliveryConfig::default();

        assert_eq!(config.transfer.threads, None);
        assert_eq!(config.transfer.block_size, defaults.transfer.block_size);
        assert_eq!(config.session.renewal, RenewalPolicy::Fraction(0.5));
        assert_eq!(config.live.heartbeat_interval, Duration::from_secs(15));
        assert!(config.live.strict_frames);
    }

    #[test]
    fn sections_map_onto_the_engine_config() {
        let text = r#"
            [http]
            user_agent = "test-agent"
            max_retries = 2
            headers = { Referer = "https://www.nicovideo.jp/" }

            [transfer]
            threads = 4
            block_size = 1024

            [session]
            renewal_interval_secs = 15

            [live]
            heartbeat_interval_secs = 10
            strict_frames = false
        "#;
        let config = FileConfig::parse(text, "inline").unwrap().into_delivery().unwrap();

        assert_eq!(config.http.user_agent, "test-agent");
        assert_eq!(config.http.retry.max_retries, 2);
        assert_eq!(config.http.headers["referer"], "https://www.nicovideo.jp/");
        assert_eq!(config.transfer.threads, Some(4));
        assert_eq!(config.transfer.block_size, 1024);
        assert_eq!(
            config.session.renewal,
            RenewalPolicy::Fixed(Duration::from_secs(15))
        );
        assert_eq!(config.live.heartbeat_interval, Duration::from_secs(10));
        assert!(!config.live.strict_frames);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = FileConfig::parse("[transfer]\nthreadz = 4\n", "nndl.toml").unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
    }

    #[test]
    fn zero_block_size_is_invalid() {
        let err = FileConfig::parse("[transfer]\nblock_size = 0\n", "inline")
            .unwrap()
            .into_delivery()
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn flags_override_the_file() {
        let mut config = FileConfig::parse("[transfer]\nthreads = 4\n", "inline")
            .unwrap()
            .into_delivery()
            .unwrap();
        let args = Args::try_parse_from([
            "nndl",
            "fetch",
            "https://example.com/v.mp4",
            "-o",
            "v.mp4",
            "-n",
            "2",
            "--force-high-quality",
            "--proxy",
            "127.0.0.1:1080",
            "--proxy-type",
            "socks5",
        ])
        .unwrap();

        apply_args(&mut config, &args);

        assert_eq!(config.transfer.threads, Some(2));
        assert!(config.transfer.force_highest);
        let proxy = config.http.proxy.unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Socks5);
        assert!(proxy.auth.is_none());
    }
}
