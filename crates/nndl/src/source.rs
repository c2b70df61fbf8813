//! Quality selection over the platform's ordered source lists.
//!
//! The platform lists video and audio sources best-first, so a candidate's
//! rank is its position in that list rather than any numeric quality.

use tracing::{debug, warn};

use crate::error::{DeliveryError, Result};

/// Keyword selecting the platform's first (best) candidate.
pub const HIGHEST: &str = "highest";
/// Keyword selecting the platform's last (worst) candidate.
pub const LOWEST: &str = "lowest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub id: String,
    /// Position in the platform's preference order, 0 is preferred.
    pub rank: usize,
}

impl SourceCandidate {
    /// Rank a list of ids in the order the platform delivered them.
    pub fn from_ids<I, S>(ids: I) -> Vec<SourceCandidate>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter()
            .enumerate()
            .map(|(rank, id)| SourceCandidate {
                id: id.into(),
                rank,
            })
            .collect()
    }
}

/// Choose one candidate from a best-first list.
///
/// `force_highest`, `"highest"` or no request select the first candidate,
/// `"lowest"` the last. Any other request is matched case-insensitively
/// against the candidate ids.
pub fn select(
    candidates: &[SourceCandidate],
    requested: Option<&str>,
    force_highest: bool,
) -> Result<SourceCandidate> {
    let (Some(first), Some(last)) = (candidates.first(), candidates.last()) else {
        return Err(DeliveryError::quality_unavailable(
            requested.unwrap_or(HIGHEST),
            Vec::new(),
        ));
    };

    if force_highest {
        if let Some(requested) = requested {
            warn!(
                requested,
                "Quality specified together with force-highest, ignoring the requested quality"
            );
        }
        return Ok(first.clone());
    }

    let selected = match requested {
        None => first,
        Some(q) if q.eq_ignore_ascii_case(HIGHEST) => first,
        Some(q) if q.eq_ignore_ascii_case(LOWEST) => last,
        Some(q) => candidates
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(q))
            .ok_or_else(|| {
                DeliveryError::quality_unavailable(
                    q,
                    candidates.iter().map(|c| c.id.clone()).collect(),
                )
            })?,
    };

    debug!(id = %selected.id, rank = selected.rank, "Selected source");
    Ok(selected.clone())
}

/// Whether the selection matches what the platform would serve by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    /// Both selected sources are the platform's first choice.
    Auto,
    Low,
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityTier::Auto => f.write_str("auto"),
            QualityTier::Low => f.write_str("low"),
        }
    }
}

/// The video and audio sources chosen for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSources {
    pub video: SourceCandidate,
    pub audio: SourceCandidate,
}

impl SelectedSources {
    pub fn tier(&self) -> QualityTier {
        if self.video.rank == 0 && self.audio.rank == 0 {
            QualityTier::Auto
        } else {
            QualityTier::Low
        }
    }
}

/// Run [`select`] over both source lists.
///
/// With `force_highest` the result must be the [`QualityTier::Auto`] pair,
/// otherwise the high quality source is reported as unavailable.
pub fn select_sources(
    videos: &[SourceCandidate],
    audios: &[SourceCandidate],
    video_quality: Option<&str>,
    audio_quality: Option<&str>,
    force_highest: bool,
) -> Result<SelectedSources> {
    let selected = SelectedSources {
        video: select(videos, video_quality, force_highest)?,
        audio: select(audios, audio_quality, force_highest)?,
    };

    if force_highest && selected.tier() != QualityTier::Auto {
        return Err(DeliveryError::quality_unavailable(
            HIGHEST,
            videos.iter().map(|c| c.id.clone()).collect(),
        ));
    }

    Ok(selected)
}
