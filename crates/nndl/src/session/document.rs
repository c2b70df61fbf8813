//! Reading the session API's XML responses.

use std::ops::Range;
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use url::Url;

use crate::error::{DeliveryError, Result};

/// The parts of a session API response the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDocument {
    pub session_id: String,
    pub content_uri: Url,
    /// The `<session>` element exactly as the server sent it, echoed back on renewal.
    pub session_body: String,
    /// Lifetime granted by the server, when it states one.
    pub lifetime: Option<Duration>,
}

/// Parse a creation or renewal response.
///
/// Takes the first `<session>` element, its direct `<id>` and `<content_uri>`
/// children, and the heartbeat lifetime when present. An `<meta status>` of
/// 400 or above is reported as a failure even when the HTTP status was 2xx,
/// which is what the server does when response codes are suppressed.
pub fn parse_session_response(text: &str) -> Result<SessionDocument> {
    let mut reader = Reader::from_str(text);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut session_open: Option<(usize, usize)> = None;
    let mut session_span: Option<Range<usize>> = None;
    let mut session_id = None;
    let mut content_uri = None;
    let mut lifetime = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|e| {
            DeliveryError::negotiation(format!(
                "malformed session response near byte {before}: {e}"
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"meta" {
                    check_meta_status(&e)?;
                }
                if name == b"session" && session_open.is_none() {
                    session_open = Some((before, path.len()));
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"meta" {
                    check_meta_status(&e)?;
                }
            }
            Event::End(_) => {
                path.pop();
                if let Some((start, depth)) = session_open
                    && session_span.is_none()
                    && path.len() == depth
                {
                    session_span = Some(start..reader.buffer_position() as usize);
                }
            }
            Event::Text(t) => {
                let value = t.unescape().map_err(|e| {
                    DeliveryError::negotiation(format!("bad text in session response: {e}"))
                })?;
                record_text(
                    &path,
                    session_span.is_none(),
                    value.trim(),
                    &mut session_id,
                    &mut content_uri,
                    &mut lifetime,
                );
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                let value = String::from_utf8_lossy(&raw);
                record_text(
                    &path,
                    session_span.is_none(),
                    value.trim(),
                    &mut session_id,
                    &mut content_uri,
                    &mut lifetime,
                );
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let span = session_span
        .ok_or_else(|| DeliveryError::negotiation("response contains no session element"))?;
    let session_id =
        session_id.ok_or_else(|| DeliveryError::negotiation("response contains no session id"))?;
    let raw_uri = content_uri
        .ok_or_else(|| DeliveryError::negotiation("response contains no content URI"))?;
    let content_uri =
        Url::parse(&raw_uri).map_err(|e| DeliveryError::invalid_url(raw_uri.as_str(), e.to_string()))?;

    Ok(SessionDocument {
        session_id,
        content_uri,
        session_body: text[span].to_string(),
        lifetime,
    })
}

fn record_text(
    path: &[Vec<u8>],
    in_first_session: bool,
    value: &str,
    session_id: &mut Option<String>,
    content_uri: &mut Option<String>,
    lifetime: &mut Option<Duration>,
) {
    if !in_first_session || value.is_empty() {
        return;
    }
    let [.., parent, leaf] = path else {
        return;
    };

    match (parent.as_slice(), leaf.as_slice()) {
        (b"session", b"id") if session_id.is_none() => *session_id = Some(value.to_string()),
        (b"session", b"content_uri") if content_uri.is_none() => {
            *content_uri = Some(value.to_string())
        }
        (b"heartbeat", b"lifetime") if lifetime.is_none() => {
            *lifetime = value.parse().ok().map(Duration::from_millis)
        }
        _ => {}
    }
}

fn check_meta_status(e: &quick_xml::events::BytesStart<'_>) -> Result<()> {
    let mut status = None;
    let mut message = None;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"status" => status = String::from_utf8_lossy(&attr.value).parse::<u16>().ok(),
            b"message" => message = Some(String::from_utf8_lossy(&attr.value).into_owned()),
            _ => {}
        }
    }

    match status {
        Some(code) if code >= 400 => Err(DeliveryError::negotiation(format!(
            "session API answered {code}: {}",
            message.as_deref().unwrap_or("no message")
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<object><meta status="201" message="created"/><data><session><id>abc-123</id><recipe_id>nicovideo-sm9</recipe_id><content_uri>https://cdn.example/hls/master.m3u8?ht2_nicovideo=x&amp;y=1</content_uri><keep_method><heartbeat><lifetime>120000</lifetime><onetime_token/></heartbeat></keep_method></session></data></object>"#;

    #[test]
    fn parses_id_uri_and_lifetime() {
        let doc = parse_session_response(CREATED).unwrap();
        assert_eq!(doc.session_id, "abc-123");
        assert_eq!(
            doc.content_uri.as_str(),
            "https://cdn.example/hls/master.m3u8?ht2_nicovideo=x&y=1"
        );
        assert_eq!(doc.lifetime, Some(Duration::from_secs(120)));
    }

    #[test]
    fn session_body_is_echoed_verbatim() {
        let doc = parse_session_response(CREATED).unwrap();
        assert!(doc.session_body.starts_with("<session><id>abc-123</id>"));
        assert!(doc.session_body.ends_with("</keep_method></session>"));
        assert!(doc.session_body.contains("x&amp;y=1"));
    }

    #[test]
    fn nested_ids_do_not_shadow_the_session_id() {
        let text = "<object><data><session><client_info><id>nested</id></client_info>\
                    <id>real</id><content_uri>http://cdn.example/a.mp4</content_uri></session></data></object>";
        let doc = parse_session_response(text).unwrap();
        assert_eq!(doc.session_id, "real");
        assert_eq!(doc.lifetime, None);
    }

    #[test]
    fn failure_status_in_meta_is_rejected() {
        let text = r#"<object><meta status="403" message="forbidden"/></object>"#;
        let err = parse_session_response(text).unwrap_err();
        assert!(matches!(err, DeliveryError::SessionNegotiationFailed { .. }));
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn missing_session_is_a_negotiation_failure() {
        let err = parse_session_response("<object><data/></object>").unwrap_err();
        assert!(matches!(err, DeliveryError::SessionNegotiationFailed { .. }));
    }

    #[test]
    fn missing_content_uri_is_a_negotiation_failure() {
        let err =
            parse_session_response("<object><session><id>x</id></session></object>").unwrap_err();
        assert!(err.to_string().contains("content URI"));
    }
}
