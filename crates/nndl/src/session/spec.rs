use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::Deserialize;
use url::Url;

use crate::error::{DeliveryError, Result};
use crate::source::{SelectedSources, SourceCandidate};

/// Session API parameters as embedded in the watch page.
///
/// Produced by an external scraper; this crate only consumes it.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionApiInfo {
    pub recipe_id: String,
    pub content_id: String,
    pub protocols: Vec<String>,
    pub priority: serde_json::Number,
    pub videos: Vec<String>,
    pub audios: Vec<String>,
    /// Milliseconds
    pub heartbeat_lifetime: u64,
    pub token: String,
    pub signature: String,
    pub auth_types: AuthTypes,
    pub service_user_id: String,
    pub player_id: String,
    pub urls: Vec<ApiUrl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthTypes {
    pub http: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUrl {
    pub url: String,
}

impl SessionApiInfo {
    pub fn video_candidates(&self) -> Vec<SourceCandidate> {
        SourceCandidate::from_ids(self.videos.iter().cloned())
    }

    pub fn audio_candidates(&self) -> Vec<SourceCandidate> {
        SourceCandidate::from_ids(self.audios.iter().cloned())
    }

    /// Base URL of the session API; creation and renewal are addressed relative to it.
    pub fn api_base(&self) -> Result<Url> {
        let raw = self
            .urls
            .first()
            .map(|u| u.url.as_str())
            .ok_or_else(|| DeliveryError::negotiation("session API lists no endpoint"))?;
        Url::parse(raw).map_err(|e| DeliveryError::invalid_url(raw, e.to_string()))
    }
}

/// Everything needed to ask the delivery cluster for a session.
///
/// Built once per download attempt and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub recipe_id: String,
    pub content_id: String,
    pub protocol: String,
    pub file_extension: String,
    pub priority: String,
    /// Selected source first.
    pub video_source_ids: Vec<String>,
    pub audio_source_ids: Vec<String>,
    pub heartbeat_lifetime_ms: u64,
    pub token: String,
    pub signature: String,
    pub auth_type: String,
    pub service_user_id: String,
    pub player_id: String,
}

impl SessionSpec {
    pub fn from_api_info(
        info: &SessionApiInfo,
        selected: &SelectedSources,
        file_extension: impl Into<String>,
    ) -> Result<Self> {
        let protocol = info
            .protocols
            .first()
            .cloned()
            .ok_or_else(|| DeliveryError::negotiation("session API lists no protocol"))?;

        Ok(Self {
            recipe_id: info.recipe_id.clone(),
            content_id: info.content_id.clone(),
            protocol,
            file_extension: file_extension.into(),
            priority: info.priority.to_string(),
            video_source_ids: vec![selected.video.id.clone()],
            audio_source_ids: vec![selected.audio.id.clone()],
            heartbeat_lifetime_ms: info.heartbeat_lifetime,
            token: info.token.clone(),
            signature: info.signature.clone(),
            auth_type: info.auth_types.http.clone(),
            service_user_id: info.service_user_id.clone(),
            player_id: info.player_id.clone(),
        })
    }

    /// Serialize into the session creation document.
    pub fn to_document(&self) -> Result<String> {
        let mut w = DocumentWriter::new();

        w.open("session")?;
        w.text("recipe_id", &self.recipe_id)?;
        w.text("content_id", &self.content_id)?;
        w.text("content_type", "movie")?;

        w.open("protocol")?;
        w.text("name", &self.protocol)?;
        w.open("parameters")?;
        w.open("http_parameters")?;
        w.text("method", "GET")?;
        w.open("parameters")?;
        w.open("http_output_download_parameters")?;
        w.text("file_extension", &self.file_extension)?;
        w.close("http_output_download_parameters")?;
        w.close("parameters")?;
        w.close("http_parameters")?;
        w.close("parameters")?;
        w.close("protocol")?;

        w.text("priority", &self.priority)?;

        w.open("content_src_id_sets")?;
        w.open("content_src_id_set")?;
        w.open("content_src_ids")?;
        w.open("src_id_to_mux")?;
        w.open("video_src_ids")?;
        for id in &self.video_source_ids {
            w.text("string", id)?;
        }
        w.close("video_src_ids")?;
        w.open("audio_src_ids")?;
        for id in &self.audio_source_ids {
            w.text("string", id)?;
        }
        w.close("audio_src_ids")?;
        w.close("src_id_to_mux")?;
        w.close("content_src_ids")?;
        w.close("content_src_id_set")?;
        w.close("content_src_id_sets")?;

        w.open("keep_method")?;
        w.open("heartbeat")?;
        w.text("lifetime", &self.heartbeat_lifetime_ms.to_string())?;
        w.close("heartbeat")?;
        w.close("keep_method")?;

        w.text("timing_constraint", "unlimited")?;

        w.open("session_operation_auth")?;
        w.open("session_operation_auth_by_signature")?;
        w.text("token", &self.token)?;
        w.text("signature", &self.signature)?;
        w.close("session_operation_auth_by_signature")?;
        w.close("session_operation_auth")?;

        w.open("content_auth")?;
        w.text("auth_type", &self.auth_type)?;
        w.text("service_id", "nicovideo")?;
        w.text("service_user_id", &self.service_user_id)?;
        w.text("max_content_count", "10")?;
        w.text("content_key_timeout", "600000")?;
        w.close("content_auth")?;

        w.open("client_info")?;
        w.text("player_id", &self.player_id)?;
        w.close("client_info")?;

        w.close("session")?;

        w.finish()
    }
}

struct DocumentWriter {
    inner: Writer<Vec<u8>>,
}

impl DocumentWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new(Vec::new()),
        }
    }

    fn open(&mut self, name: &str) -> Result<()> {
        self.inner
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(encode_error)
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.inner
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(encode_error)
    }

    fn text(&mut self, name: &str, value: &str) -> Result<()> {
        self.open(name)?;
        self.inner
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(encode_error)?;
        self.close(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.inner.into_inner()).map_err(encode_error)
    }
}

fn encode_error(e: impl std::fmt::Display) -> DeliveryError {
    DeliveryError::negotiation(format!("could not encode session document: {e}"))
}
