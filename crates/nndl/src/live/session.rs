use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use super::frame::{LiveFrame, OutboundFrame};
use super::playlist::{parse_master_playlist, resolve_variant_url, select_variant};
use crate::config::LiveConfig;
use crate::error::{DeliveryError, Result};
use crate::http::HttpClient;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivePhase {
    Connecting,
    /// Permit sent, no stream announced yet.
    AwaitingGrant,
    Streaming,
    Closed,
}

/// A playable stream address derived from an announced master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub master_url: Url,
    pub stream_url: Url,
    pub bandwidth: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    StreamResolved(ResolvedStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the socket.
    Server,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveReport {
    pub streams: Vec<ResolvedStream>,
    pub frames_received: u64,
    pub closed_by: CloseReason,
}

/// Keeps a broadcast's control socket alive and resolves the streams it announces.
pub struct LiveSessionLoop {
    client: HttpClient,
    ws_url: Url,
    broadcast_id: String,
    config: LiveConfig,
    phase: Mutex<LivePhase>,
}

impl LiveSessionLoop {
    pub fn new(
        client: HttpClient,
        ws_url: Url,
        broadcast_id: impl Into<String>,
        config: LiveConfig,
    ) -> Self {
        Self {
            client,
            ws_url,
            broadcast_id: broadcast_id.into(),
            config,
            phase: Mutex::new(LivePhase::Connecting),
        }
    }

    pub fn phase(&self) -> LivePhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: LivePhase) {
        let mut current = self.phase.lock();
        if *current != phase {
            debug!(from = ?*current, to = ?phase, "Live phase changed");
            *current = phase;
        }
    }

    /// Run until the server closes the socket or `token` is cancelled.
    ///
    /// Every resolved stream is sent on `events` as it is found. Outstanding
    /// playlist fetches are aborted and the heartbeat stops before this
    /// returns.
    #[instrument(skip(self, events, token), fields(broadcast_id = %self.broadcast_id))]
    pub async fn run(
        &self,
        events: mpsc::Sender<LiveEvent>,
        token: &CancellationToken,
    ) -> Result<LiveReport> {
        self.set_phase(LivePhase::Connecting);
        info!(url = %self.ws_url, "Connecting to live control socket");

        let connected = tokio::select! {
            _ = token.cancelled() => None,
            result = connect_async(self.ws_url.as_str()) => Some(result),
        };
        let mut socket = match connected {
            None => {
                self.set_phase(LivePhase::Closed);
                return Err(DeliveryError::Cancelled);
            }
            Some(Err(e)) => {
                self.set_phase(LivePhase::Closed);
                return Err(e.into());
            }
            Some(Ok((socket, _))) => socket,
        };

        let mut report = LiveReport {
            streams: Vec::new(),
            frames_received: 0,
            closed_by: CloseReason::Server,
        };
        let mut resolves = JoinSet::new();

        let outcome = self
            .drive(&mut socket, &mut resolves, &events, &mut report, token)
            .await;

        resolves.shutdown().await;
        if let Err(e) = socket.close(None).await {
            trace!(error = %e, "Closing live socket failed");
        }
        self.set_phase(LivePhase::Closed);

        let closed_by = outcome?;
        info!(
            streams = report.streams.len(),
            frames = report.frames_received,
            closed_by = ?closed_by,
            "Live session closed"
        );
        Ok(LiveReport { closed_by, ..report })
    }

    async fn drive(
        &self,
        socket: &mut Socket,
        resolves: &mut JoinSet<Result<ResolvedStream>>,
        events: &mpsc::Sender<LiveEvent>,
        report: &mut LiveReport,
        token: &CancellationToken,
    ) -> Result<CloseReason> {
        socket
            .send(OutboundFrame::permit(&self.broadcast_id).to_message()?)
            .await?;
        self.set_phase(LivePhase::AwaitingGrant);
        debug!("Permit requested");

        // First tick fires at once, so `watching` directly follows the permit.
        let period = self.config.heartbeat_interval.max(Duration::from_millis(10));
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(CloseReason::Cancelled),

                _ = heartbeat.tick() => {
                    socket
                        .send(OutboundFrame::watching(&self.broadcast_id).to_message()?)
                        .await?;
                    trace!("Sent watching heartbeat");
                }

                Some(joined) = resolves.join_next() => {
                    let resolved = joined.map_err(|e| {
                        DeliveryError::internal(format!("playlist task failed: {e}"))
                    })??;
                    info!(
                        stream_url = %resolved.stream_url,
                        bandwidth = resolved.bandwidth,
                        "Stream resolved"
                    );
                    self.set_phase(LivePhase::Streaming);
                    report.streams.push(resolved.clone());
                    if events.send(LiveEvent::StreamResolved(resolved)).await.is_err() {
                        debug!("Live event receiver dropped");
                    }
                }

                message = socket.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(CloseReason::Server),
                    };
                    report.frames_received += 1;

                    match message {
                        Message::Text(text) => {
                            if let Some(reply) = self.handle_frame(text.as_str(), resolves, token)? {
                                socket.send(reply).await?;
                            }
                        }
                        Message::Close(frame) => {
                            debug!(frame = ?frame, "Server closed the live socket");
                            return Ok(CloseReason::Server);
                        }
                        Message::Binary(data) => {
                            if self.config.strict_frames {
                                return Err(DeliveryError::protocol(format!(
                                    "unexpected binary frame of {} bytes",
                                    data.len()
                                )));
                            }
                            warn!(len = data.len(), "Skipping binary frame");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Dispatch one text frame, returning the reply to send if any.
    fn handle_frame(
        &self,
        text: &str,
        resolves: &mut JoinSet<Result<ResolvedStream>>,
        token: &CancellationToken,
    ) -> Result<Option<Message>> {
        let frame = LiveFrame::decode(text)?;

        match &frame {
            LiveFrame::Ping => {
                trace!("Ping received");
                return OutboundFrame::pong().to_message().map(Some);
            }
            LiveFrame::Watch { command, .. } => match command.as_str() {
                "statistics" => trace!("Statistics frame ignored"),
                "currentstream" => {
                    let uri = frame.current_stream_uri().ok_or_else(|| {
                        DeliveryError::protocol("currentstream frame carries no URI")
                    })?;
                    let master_url = Url::parse(uri)
                        .map_err(|e| DeliveryError::invalid_url(uri, e.to_string()))?;
                    debug!(master_url = %master_url, "Stream announced");
                    resolves.spawn(resolve_stream(
                        self.client.clone(),
                        master_url,
                        token.child_token(),
                    ));
                }
                other => debug!(command = other, "Ignoring watch command"),
            },
            LiveFrame::Other { kind } => {
                if self.config.strict_frames {
                    return Err(DeliveryError::protocol(format!(
                        "unexpected frame type `{kind}`"
                    )));
                }
                warn!(kind = %kind, "Skipping frame of unknown type");
            }
        }
        Ok(None)
    }
}

/// Fetch the master playlist and pick its best variant.
pub async fn resolve_stream(
    client: HttpClient,
    master_url: Url,
    token: CancellationToken,
) -> Result<ResolvedStream> {
    let response = client
        .send("master playlist GET", |c| c.get(master_url.clone()), &token)
        .await?;
    let body = response.bytes().await?;
    let master = parse_master_playlist(&body)?;
    let variant = select_variant(&master)
        .ok_or_else(|| DeliveryError::protocol("master playlist has no playable variant"))?;
    let stream_url = resolve_variant_url(&master_url, &variant.uri)?;

    Ok(ResolvedStream {
        master_url,
        stream_url,
        bandwidth: variant.bandwidth,
    })
}
