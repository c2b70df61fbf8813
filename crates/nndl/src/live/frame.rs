use serde::Serialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{DeliveryError, Result};

/// A frame received on the live control socket.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFrame {
    Watch { command: String, body: Value },
    Ping,
    /// A well-formed frame of a type this loop does not handle.
    Other { kind: String },
}

impl LiveFrame {
    /// Decode a text frame. Anything that is not a JSON object with a string
    /// `type` is a protocol violation.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| DeliveryError::protocol(format!("live frame is not JSON: {e}")))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DeliveryError::protocol("live frame has no type"))?;

        match kind {
            "ping" => Ok(LiveFrame::Ping),
            "watch" => {
                let body = value.get("body").cloned().unwrap_or(Value::Null);
                let command = body
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DeliveryError::protocol("watch frame has no command"))?
                    .to_string();
                Ok(LiveFrame::Watch { command, body })
            }
            other => Ok(LiveFrame::Other {
                kind: other.to_string(),
            }),
        }
    }

    /// Master playlist address announced by a `currentstream` frame.
    pub fn current_stream_uri(&self) -> Option<&str> {
        match self {
            LiveFrame::Watch { command, body } if command == "currentstream" => body
                .pointer("/currentStream/uri")
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Frames this client sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
pub enum OutboundFrame {
    Watch(WatchCommand),
    Pong(EmptyBody),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum WatchCommand {
    GetPermit { requirement: PermitRequirement },
    Watching { params: Vec<String> },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyBody {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitRequirement {
    pub broadcast_id: String,
    pub route: String,
    pub stream: StreamRequirement,
    pub room: RoomRequirement,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequirement {
    pub protocol: String,
    pub require_new_stream: bool,
    pub prior_stream_quality: String,
    pub is_low_latency: bool,
    pub is_chase_play: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequirement {
    pub is_commentable: bool,
    pub protocol: String,
}

impl OutboundFrame {
    /// Request a stream grant: adaptive bitrate HLS, low latency, with a
    /// commentable room.
    pub fn permit(broadcast_id: impl Into<String>) -> Self {
        OutboundFrame::Watch(WatchCommand::GetPermit {
            requirement: PermitRequirement {
                broadcast_id: broadcast_id.into(),
                route: String::new(),
                stream: StreamRequirement {
                    protocol: "hls".to_string(),
                    require_new_stream: true,
                    prior_stream_quality: "abr".to_string(),
                    is_low_latency: true,
                    is_chase_play: false,
                },
                room: RoomRequirement {
                    is_commentable: true,
                    protocol: "webSocket".to_string(),
                },
            },
        })
    }

    pub fn watching(broadcast_id: impl Into<String>) -> Self {
        OutboundFrame::Watch(WatchCommand::Watching {
            params: vec![broadcast_id.into(), "-1".to_string(), "0".to_string()],
        })
    }

    pub fn pong() -> Self {
        OutboundFrame::Pong(EmptyBody {})
    }

    pub fn to_message(&self) -> Result<Message> {
        let text = serde_json::to_string(self)
            .map_err(|e| DeliveryError::internal(format!("could not encode live frame: {e}")))?;
        Ok(Message::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(frame: &OutboundFrame) -> Value {
        serde_json::to_value(frame).unwrap()
    }

    #[test]
    fn permit_frame_shape() {
        assert_eq!(
            encoded(&OutboundFrame::permit("lv123")),
            json!({
                "type": "watch",
                "body": {
                    "command": "getpermit",
                    "requirement": {
                        "broadcastId": "lv123",
                        "route": "",
                        "stream": {
                            "protocol": "hls",
                            "requireNewStream": true,
                            "priorStreamQuality": "abr",
                            "isLowLatency": true,
                            "isChasePlay": false
                        },
                        "room": { "isCommentable": true, "protocol": "webSocket" }
                    }
                }
            })
        );
    }

    #[test]
    fn watching_and_pong_frames() {
        assert_eq!(
            encoded(&OutboundFrame::watching("lv123")),
            json!({"type": "watch", "body": {"command": "watching", "params": ["lv123", "-1", "0"]}})
        );
        assert_eq!(
            encoded(&OutboundFrame::pong()),
            json!({"type": "pong", "body": {}})
        );
    }

    #[test]
    fn decodes_current_stream() {
        let frame = LiveFrame::decode(
            r#"{"type":"watch","body":{"command":"currentstream","currentStream":{"uri":"https://live.example/master.m3u8"}}}"#,
        )
        .unwrap();
        assert_eq!(
            frame.current_stream_uri(),
            Some("https://live.example/master.m3u8")
        );
    }

    #[test]
    fn decodes_ping_and_unknown_types() {
        assert_eq!(LiveFrame::decode(r#"{"type":"ping"}"#).unwrap(), LiveFrame::Ping);
        assert_eq!(
            LiveFrame::decode(r#"{"type":"seat","data":{}}"#).unwrap(),
            LiveFrame::Other {
                kind: "seat".to_string()
            }
        );
    }

    #[test]
    fn malformed_frames_are_protocol_violations() {
        for text in ["not json", r#"{"body":{}}"#, r#"{"type":"watch","body":{}}"#] {
            let err = LiveFrame::decode(text).unwrap_err();
            assert!(
                matches!(err, DeliveryError::ProtocolViolation { .. }),
                "{text} should be rejected"
            );
        }
    }
}
