use reqwest::Proxy;

use crate::error::{DeliveryError, Result};

/// Proxy scheme used for every request made by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Infer the proxy type from the URL scheme, defaulting to HTTP.
    ///
    /// `socks5://host:1080` → SOCKS5, `https://host` → HTTPS, anything else → HTTP.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let proxy_type = if url.starts_with("socks5://") || url.starts_with("socks5h://") {
            ProxyType::Socks5
        } else if url.starts_with("https://") {
            ProxyType::Https
        } else {
            ProxyType::Http
        };
        Self {
            url,
            proxy_type,
            auth: None,
        }
    }
}

/// Build a reqwest proxy applied to both plain and TLS traffic.
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy> {
    let proxy_url = match config.proxy_type {
        ProxyType::Socks5
            if !(config.url.starts_with("socks5://") || config.url.starts_with("socks5h://")) =>
        {
            format!("socks5://{}", config.url)
        }
        _ => config.url.clone(),
    };

    let mut proxy = Proxy::all(&proxy_url)
        .map_err(|e| DeliveryError::invalid_configuration(format!("invalid proxy URL: {e}")))?;

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_type_is_inferred_from_scheme() {
        assert_eq!(
            ProxyConfig::from_url("socks5://127.0.0.1:1080").proxy_type,
            ProxyType::Socks5
        );
        assert_eq!(
            ProxyConfig::from_url("https://proxy.local").proxy_type,
            ProxyType::Https
        );
        assert_eq!(
            ProxyConfig::from_url("proxy.local:3128").proxy_type,
            ProxyType::Http
        );
    }

    #[test]
    fn bare_socks_host_gets_a_scheme() {
        let config = ProxyConfig {
            url: "127.0.0.1:1080".to_string(),
            proxy_type: ProxyType::Socks5,
            auth: None,
        };
        assert!(build_proxy_from_config(&config).is_ok());
    }
}
