use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};
use crate::http::HttpClient;
use crate::session::{SessionApiInfo, SessionNegotiator, SessionSpec};
use crate::source::{SelectedSources, select_sources};
use crate::transfer::{ProgressObserver, TransferEngine, TransferReport, plan};

/// What the caller wants out of a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
    pub file_extension: String,
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self {
            video_quality: None,
            audio_quality: None,
            file_extension: "mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub session_id: String,
    pub content_uri: Url,
    pub sources: SelectedSources,
    pub transfer: TransferReport,
}

/// Runs the whole delivery flow for one resource.
#[derive(Debug, Clone)]
pub struct Downloader {
    config: DeliveryConfig,
    client: HttpClient,
}

impl Downloader {
    pub fn new(config: DeliveryConfig) -> Result<Self> {
        let client = HttpClient::new(&config.http)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Select sources, negotiate a session and download its content.
    ///
    /// Selection and thread-count errors are reported before any request is
    /// made. The session is renewed for as long as the transfer runs and
    /// released afterwards, whatever the outcome.
    #[instrument(skip_all, fields(content_id = %info.content_id))]
    pub async fn download_session(
        &self,
        info: &SessionApiInfo,
        request: &SessionRequest,
        destination: &Path,
        observer: Arc<dyn ProgressObserver>,
        token: &CancellationToken,
    ) -> Result<DownloadReport> {
        let sources = select_sources(
            &info.video_candidates(),
            &info.audio_candidates(),
            request.video_quality.as_deref(),
            request.audio_quality.as_deref(),
            self.config.transfer.force_highest,
        )?;
        plan(0, self.config.transfer.threads, 0)?;
        let spec = SessionSpec::from_api_info(info, &sources, request.file_extension.as_str())?;
        let api_base = info.api_base()?;

        info!(
            video = %sources.video.id,
            audio = %sources.audio.id,
            tier = %sources.tier(),
            "Sources selected"
        );

        let negotiator =
            SessionNegotiator::new(self.client.clone(), api_base, self.config.session.clone());

        let outcome = async {
            let handle = negotiator.negotiate(&spec, token).await?;
            let content_uri = handle.content_uri().clone();
            let transfer = self
                .transfer(&content_uri, destination, observer, token)
                .await?;
            Ok::<_, DeliveryError>((handle, transfer))
        }
        .await;

        let renewal = negotiator.shutdown().await;
        let (handle, transfer) = outcome?;
        if let Err(e) = renewal {
            warn!(error = %e, "Session lapsed while the transfer was running");
        }

        Ok(DownloadReport {
            session_id: handle.session_id().to_string(),
            content_uri: handle.content_uri().clone(),
            sources,
            transfer,
        })
    }

    /// Download a directly addressable resource without negotiating a session.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn download_url(
        &self,
        url: &Url,
        destination: &Path,
        observer: Arc<dyn ProgressObserver>,
        token: &CancellationToken,
    ) -> Result<TransferReport> {
        plan(0, self.config.transfer.threads, 0)?;
        self.transfer(url, destination, observer, token).await
    }

    async fn transfer(
        &self,
        url: &Url,
        destination: &Path,
        observer: Arc<dyn ProgressObserver>,
        token: &CancellationToken,
    ) -> Result<TransferReport> {
        let total_length = self.client.probe_length(url, token).await?;
        info!(url = %url, total_length, "Content length resolved");
        TransferEngine::new(self.client.clone(), self.config.transfer.clone())
            .execute(url, total_length, destination, observer, token)
            .await
    }
}
