use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::document::{SessionDocument, parse_session_response};
use super::spec::SessionSpec;
use crate::config::{RenewalPolicy, SessionConfig};
use crate::error::{DeliveryError, Result};
use crate::http::HttpClient;

const XML_CONTENT_TYPE: &str = "application/xml";
const RENEW_QUERY: &str = "_format=xml&_method=PUT";

/// Lifecycle of a negotiated session.
///
/// `Idle → Negotiating → Active ⇄ Renewing`, ending in `Released` when the
/// owner lets go or `Expired` when a renewal is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Active,
    Renewing,
    Released,
    Expired,
}

/// A granted session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: String,
    content_uri: Url,
    lifetime: Duration,
    document: Arc<str>,
}

impl SessionHandle {
    fn from_document(doc: SessionDocument, fallback_lifetime: Duration) -> Self {
        Self {
            session_id: doc.session_id,
            content_uri: doc.content_uri,
            lifetime: doc.lifetime.unwrap_or(fallback_lifetime),
            document: doc.session_body.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Where the media is served from for as long as the session lives.
    pub fn content_uri(&self) -> &Url {
        &self.content_uri
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

struct RenewalTask {
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

struct Slot {
    state: SessionState,
    current: Option<SessionHandle>,
    renewal: Option<RenewalTask>,
}

struct Inner {
    client: HttpClient,
    api_base: Url,
    config: SessionConfig,
    slot: Mutex<Slot>,
    /// Held for a whole renewal round trip, so manual and scheduled renewals queue up.
    renewing: tokio::sync::Mutex<()>,
}

/// Acquires a delivery session and keeps it alive until released.
///
/// One negotiator serves one download attempt. Renewal runs on a background
/// task that is stopped by [`release`](Self::release), by [`shutdown`](Self::shutdown)
/// or by dropping the negotiator.
pub struct SessionNegotiator {
    inner: Arc<Inner>,
}

impl SessionNegotiator {
    pub fn new(client: HttpClient, api_base: Url, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                api_base,
                config,
                slot: Mutex::new(Slot {
                    state: SessionState::Idle,
                    current: None,
                    renewal: None,
                }),
                renewing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.slot.lock().state
    }

    pub fn current(&self) -> Option<SessionHandle> {
        self.inner.slot.lock().current.clone()
    }

    /// Create the session described by `spec` and start renewing it.
    ///
    /// The renewal task runs on a child of `token`.
    pub async fn negotiate(
        &self,
        spec: &SessionSpec,
        token: &CancellationToken,
    ) -> Result<SessionHandle> {
        {
            let mut slot = self.inner.slot.lock();
            if slot.state != SessionState::Idle {
                return Err(DeliveryError::internal(format!(
                    "negotiate called on a session in state {:?}",
                    slot.state
                )));
            }
            slot.state = SessionState::Negotiating;
        }

        let result = self.inner.create(spec, token).await;

        let mut slot = self.inner.slot.lock();
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                slot.state = SessionState::Released;
                return Err(e);
            }
        };

        let interval = renewal_interval(&self.inner.config, handle.lifetime);
        info!(
            session_id = %handle.session_id,
            content_uri = %handle.content_uri,
            lifetime_ms = handle.lifetime.as_millis() as u64,
            interval_ms = interval.as_millis() as u64,
            "Session negotiated"
        );

        let renewal_token = token.child_token();
        let task = tokio::spawn(renewal_loop(
            Arc::clone(&self.inner),
            renewal_token.clone(),
        ));
        slot.state = SessionState::Active;
        slot.current = Some(handle.clone());
        slot.renewal = Some(RenewalTask {
            token: renewal_token,
            handle: task,
        });

        Ok(handle)
    }

    /// Renew the active session once, outside of the background schedule.
    ///
    /// A scheduled renewal already in flight finishes first, and this one then
    /// echoes the session it returned.
    pub async fn renew(&self, token: &CancellationToken) -> Result<SessionHandle> {
        self.inner.renew(token).await
    }

    /// Stop renewing. The session is left to lapse on the server.
    pub fn release(&self) {
        let mut slot = self.inner.slot.lock();
        if let Some(renewal) = &slot.renewal {
            renewal.token.cancel();
        }
        if slot.state != SessionState::Expired {
            slot.state = SessionState::Released;
        }
        debug!("Session released");
    }

    /// Release and wait for the renewal task to finish.
    ///
    /// Returns the renewal task's outcome, so a session that expired while
    /// in use reports [`DeliveryError::SessionExpired`] here.
    pub async fn shutdown(&self) -> Result<()> {
        self.release();
        let task = self.inner.slot.lock().renewal.take();
        match task {
            Some(task) => task
                .handle
                .await
                .map_err(|e| DeliveryError::internal(format!("renewal task panicked: {e}")))?,
            None => Ok(()),
        }
    }
}

impl Drop for SessionNegotiator {
    fn drop(&mut self) {
        if let Some(renewal) = &self.inner.slot.lock().renewal {
            renewal.token.cancel();
        }
    }
}

impl Inner {
    async fn create(&self, spec: &SessionSpec, token: &CancellationToken) -> Result<SessionHandle> {
        let body = spec.to_document()?;
        let mut url = self.api_base.clone();
        url.set_query(Some(&self.config.create_query));

        debug!(url = %url, recipe_id = %spec.recipe_id, "Creating session");
        let response = self
            .client
            .send(
                "session creation",
                |c| {
                    c.post(url.clone())
                        .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                        .body(body.clone())
                },
                token,
            )
            .await
            .map_err(|e| match e {
                DeliveryError::Cancelled => e,
                other => DeliveryError::negotiation(other.to_string()),
            })?;

        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::negotiation(format!("could not read response: {e}")))?;
        let doc = parse_session_response(&text)?;

        Ok(SessionHandle::from_document(
            doc,
            Duration::from_millis(spec.heartbeat_lifetime_ms),
        ))
    }

    fn renew_url(&self, session_id: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| DeliveryError::invalid_url(self.api_base.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .push(session_id);
        url.set_query(Some(RENEW_QUERY));
        Ok(url)
    }

    async fn renew(&self, token: &CancellationToken) -> Result<SessionHandle> {
        let _round_trip = tokio::select! {
            _ = token.cancelled() => return Err(DeliveryError::Cancelled),
            guard = self.renewing.lock() => guard,
        };

        let previous = {
            let mut slot = self.slot.lock();
            match (slot.state, slot.current.clone()) {
                (SessionState::Active, Some(handle)) => {
                    slot.state = SessionState::Renewing;
                    handle
                }
                (state, _) => {
                    return Err(DeliveryError::expired(format!(
                        "no active session to renew (state {state:?})"
                    )));
                }
            }
        };

        let result = self.send_renewal(&previous, token).await;

        let mut slot = self.slot.lock();
        match result {
            Ok(handle) => {
                if slot.state == SessionState::Renewing {
                    slot.state = SessionState::Active;
                }
                slot.current = Some(handle.clone());
                Ok(handle)
            }
            Err(DeliveryError::Cancelled) => {
                if slot.state == SessionState::Renewing {
                    slot.state = SessionState::Released;
                }
                Err(DeliveryError::Cancelled)
            }
            Err(e) => {
                slot.state = SessionState::Expired;
                Err(e)
            }
        }
    }

    async fn send_renewal(
        &self,
        previous: &SessionHandle,
        token: &CancellationToken,
    ) -> Result<SessionHandle> {
        let url = self.renew_url(&previous.session_id)?;
        let body = previous.document.to_string();

        let response = self
            .client
            .send(
                "session renewal",
                |c| {
                    c.post(url.clone())
                        .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                        .body(body.clone())
                },
                token,
            )
            .await
            .map_err(|e| match e {
                DeliveryError::Cancelled => e,
                other => DeliveryError::expired(other.to_string()),
            })?;

        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::expired(format!("could not read response: {e}")))?;
        let doc =
            parse_session_response(&text).map_err(|e| DeliveryError::expired(e.to_string()))?;

        Ok(SessionHandle::from_document(doc, previous.lifetime))
    }
}

async fn renewal_loop(inner: Arc<Inner>, token: CancellationToken) -> Result<()> {
    loop {
        let lifetime = match inner.slot.lock().current.as_ref() {
            Some(handle) => handle.lifetime,
            None => return Ok(()),
        };
        let interval = renewal_interval(&inner.config, lifetime);

        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }

        match inner.renew(&token).await {
            Ok(handle) => debug!(session_id = %handle.session_id, "Session renewed"),
            Err(DeliveryError::Cancelled) => return Ok(()),
            Err(e) => {
                if token.is_cancelled() {
                    warn!(error = %e, "Renewal failed after release");
                    return Ok(());
                }
                error!(error = %e, "Session renewal failed, the session will lapse");
                return Err(e);
            }
        }
    }
}

/// Interval between renewals for a session granted `lifetime`.
///
/// Always strictly below the lifetime. The configured floor applies only when
/// it leaves room under the lifetime.
pub fn renewal_interval(config: &SessionConfig, lifetime: Duration) -> Duration {
    if lifetime.is_zero() {
        return config.min_interval;
    }
    let ceiling = lifetime - lifetime / 10;

    let interval = match config.renewal {
        RenewalPolicy::Fraction(fraction) if fraction.is_finite() => {
            lifetime.mul_f64(fraction.clamp(0.05, 0.9))
        }
        RenewalPolicy::Fraction(_) => lifetime / 2,
        RenewalPolicy::Fixed(interval) => interval,
    }
    .min(ceiling);

    if config.min_interval < ceiling {
        interval.max(config.min_interval)
    } else {
        interval
    }
}
