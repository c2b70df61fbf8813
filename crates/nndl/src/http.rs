// Transport layer: client construction plus bounded retry with exponential backoff.
//
// Retries here cover transient transport failures only (connection errors and
// gateway-class 5xx). The transfer engine's own restart after an integrity
// mismatch is a separate, higher-level decision.

use std::time::Duration;

use rand::RngExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::HttpConfig;
use crate::error::{DeliveryError, Result};
use crate::proxy::build_proxy_from_config;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// When true, adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `attempt + 1`: `base_delay` doubled per
    /// attempt, clamped to `max_delay`, plus up to half a base delay of jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self
            .base_delay
            .saturating_mul(factor)
            .min(self.max_delay);
        if !self.jitter {
            return delay;
        }

        let spread = (self.base_delay / 2).min(self.max_delay.saturating_sub(delay));
        let spread_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
        if spread_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..spread_ms))
    }

    fn allows_retry(&self, attempt: u32, err: &DeliveryError) -> bool {
        attempt < self.max_retries && err.is_retryable()
    }
}

/// Build the reqwest client described by `config`.
pub fn create_client(config: &HttpConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout);

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    if !config.follow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(build_proxy_from_config(proxy)?);
    } else if !config.use_system_proxy {
        builder = builder.no_proxy();
    }

    Ok(builder.build()?)
}

/// A reqwest client paired with the retry policy applied to every request.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            retry: config.retry.clone(),
        })
    }

    /// Send the request produced by `build` until it yields a 2xx response.
    ///
    /// `build` is invoked once per attempt. Non-2xx statuses outside the
    /// retryable set fail immediately with [`DeliveryError::HttpStatus`].
    pub async fn send<F>(
        &self,
        operation: &'static str,
        build: F,
        token: &CancellationToken,
    ) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let request = build(&self.client);
            let err = tokio::select! {
                _ = token.cancelled() => return Err(DeliveryError::Cancelled),
                sent = request.send() => match sent {
                    Ok(response) if response.status().is_success() => return Ok(response),
                    Ok(response) => DeliveryError::http_status(
                        response.status(),
                        response.url().as_str(),
                        operation,
                    ),
                    Err(e) => DeliveryError::from(e),
                },
            };

            if !self.retry.allows_retry(attempt, &err) {
                debug!(attempt, operation, error = %err, "Giving up on request");
                return Err(err);
            }

            let delay = self.retry.backoff(attempt);
            attempt += 1;
            warn!(
                operation,
                attempt,
                max = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );
            tokio::select! {
                _ = token.cancelled() => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Determine the length of the resource at `url`.
    ///
    /// Uses the `Content-Length` of a HEAD response, falling back to the total
    /// in the `Content-Range` of a one-byte ranged GET.
    pub async fn probe_length(&self, url: &Url, token: &CancellationToken) -> Result<u64> {
        match self
            .send("HEAD content length", |c| c.head(url.clone()), token)
            .await
        {
            Ok(response) => {
                if let Some(length) = header_u64(response.headers(), CONTENT_LENGTH)
                    && length > 0
                {
                    return Ok(length);
                }
                debug!(url = %url, "HEAD response carried no content length");
            }
            Err(DeliveryError::Cancelled) => return Err(DeliveryError::Cancelled),
            Err(e) => debug!(url = %url, error = %e, "HEAD probe failed, trying ranged GET"),
        }

        let response = self
            .send(
                "ranged GET content length",
                |c| c.get(url.clone()).header(RANGE, "bytes=0-0"),
                token,
            )
            .await?;

        if response.status() == StatusCode::PARTIAL_CONTENT
            && let Some(total) = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
        {
            return Ok(total);
        }

        if let Some(length) = header_u64(response.headers(), CONTENT_LENGTH)
            && response.status() == StatusCode::OK
        {
            return Ok(length);
        }

        Err(DeliveryError::protocol(format!(
            "could not determine the content length of {url}"
        )))
    }
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Parse the complete length out of `bytes 0-0/12345`.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}
