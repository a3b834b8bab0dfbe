//! Video source abstraction.
//!
//! One adapter per source kind normalizes an external reference (URL, bare
//! id, or file path) into a `RawMedia` descriptor. The kind set is closed:
//! adapters are selected by matching on `SourceKind`, never by probing.

mod mux;
mod upload;
mod vimeo;
mod youtube;

pub use mux::MuxAdapter;
pub use upload::UploadAdapter;
pub use vimeo::VimeoAdapter;
pub use youtube::YoutubeAdapter;

use crate::config::Settings;
use crate::error::{PensumError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// File uploaded to the platform's storage.
    Upload,
    /// YouTube embed.
    YouTube,
    /// Vimeo embed.
    Vimeo,
    /// Mux-hosted asset addressed by playback id.
    Mux,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Upload => "upload",
            SourceKind::YouTube => "youtube",
            SourceKind::Vimeo => "vimeo",
            SourceKind::Mux => "mux",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upload" => Ok(SourceKind::Upload),
            "youtube" => Ok(SourceKind::YouTube),
            "vimeo" => Ok(SourceKind::Vimeo),
            "mux" => Ok(SourceKind::Mux),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A caption track a source declares for its media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionTrack {
    /// Language code as the source reports it (e.g. "en", "en-US").
    pub language: String,
    /// URL or local path of the track payload.
    pub location: String,
    /// Declared format ("vtt", "srt", "srv1"), when known.
    pub format: Option<String>,
    /// Whether the source generated this track automatically.
    pub auto_generated: bool,
}

impl CaptionTrack {
    pub fn new(language: &str, location: &str, format: Option<&str>, auto_generated: bool) -> Self {
        Self {
            language: language.to_string(),
            location: location.to_string(),
            format: format.map(|f| f.to_string()),
            auto_generated,
        }
    }
}

/// Normalized descriptor of one piece of source media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMedia {
    /// Which adapter produced this descriptor.
    pub kind: SourceKind,
    /// Canonical locator: storage path for uploads, external id otherwise.
    pub locator: String,
    /// Title.
    pub title: String,
    /// Description (if available).
    pub description: Option<String>,
    /// Duration in seconds (if known before transcription).
    pub duration_seconds: Option<u32>,
    /// URL or path the media plays from.
    pub source_url: String,
    /// Publication date (if available).
    pub published_at: Option<DateTime<Utc>>,
    /// Channel or author name (if available).
    pub channel: Option<String>,
    /// Thumbnail URL (if available).
    pub thumbnail_url: Option<String>,
    /// Caption tracks the source declares (the free extraction tiers).
    pub caption_tracks: Vec<CaptionTrack>,
}

impl RawMedia {
    /// Minimal descriptor for tests.
    pub fn for_tests(title: &str) -> Self {
        Self {
            kind: SourceKind::Upload,
            locator: format!("/tmp/{}.mp4", title.to_lowercase().replace(' ', "_")),
            title: title.to_string(),
            description: None,
            duration_seconds: Some(180),
            source_url: String::new(),
            published_at: None,
            channel: None,
            thumbnail_url: None,
            caption_tracks: Vec::new(),
        }
    }
}

/// Trait for source adapters.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The kind this adapter handles.
    fn kind(&self) -> SourceKind;

    /// Validate reference syntax and extract the canonical locator.
    ///
    /// Runs before any network call; `None` means the reference does not
    /// belong to this source kind.
    fn parse_reference(&self, input: &str) -> Option<String>;

    /// Resolve a locator into a full descriptor via read-only metadata
    /// lookups. Unreachable, private, or deleted media is
    /// `SourceUnavailable`.
    async fn resolve(&self, locator: &str) -> Result<RawMedia>;
}

/// Adapter set, one per source kind.
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Build the standard adapter set from settings.
    pub fn new(settings: &Settings) -> Self {
        let languages = settings.sources.preferred_languages.clone();
        Self {
            adapters: vec![
                Arc::new(YoutubeAdapter::new()),
                Arc::new(VimeoAdapter::new()),
                Arc::new(MuxAdapter::new(languages)),
                Arc::new(UploadAdapter::new()),
            ],
        }
    }

    /// Build a registry with explicit adapters (used by tests).
    pub fn with_adapters(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    /// Look up the adapter for a kind.
    pub fn adapter_for(&self, kind: SourceKind) -> Result<&Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.kind() == kind)
            .ok_or_else(|| {
                PensumError::InvalidReference(format!("no adapter for source kind {}", kind))
            })
    }

    /// Normalize a reference of a known kind into a `RawMedia` descriptor.
    ///
    /// Syntax is validated before the adapter touches the network.
    pub async fn normalize(&self, kind: SourceKind, reference: &str) -> Result<RawMedia> {
        let adapter = self.adapter_for(kind)?;
        let locator = adapter.parse_reference(reference).ok_or_else(|| {
            PensumError::InvalidReference(format!(
                "'{}' is not a valid {} reference",
                reference, kind
            ))
        })?;
        adapter.resolve(&locator).await
    }

    /// Validate a reference without resolving it.
    pub fn parse(&self, kind: SourceKind, reference: &str) -> Result<String> {
        let adapter = self.adapter_for(kind)?;
        adapter.parse_reference(reference).ok_or_else(|| {
            PensumError::InvalidReference(format!(
                "'{}' is not a valid {} reference",
                reference, kind
            ))
        })
    }

    /// Guess the source kind for a pasted reference (CLI convenience).
    ///
    /// The server API always receives the kind explicitly.
    pub fn detect(&self, input: &str) -> Option<(SourceKind, String)> {
        for adapter in &self.adapters {
            if let Some(locator) = adapter.parse_reference(input) {
                return Some((adapter.kind(), locator));
            }
        }
        None
    }
}

/// Playable URL for a moment inside a video, when the source supports one.
pub fn timestamp_url(kind: SourceKind, locator: &str, seconds: f64) -> Option<String> {
    match kind {
        SourceKind::YouTube => Some(format!(
            "https://youtube.com/watch?v={}&t={}s",
            locator, seconds as u32
        )),
        SourceKind::Vimeo => {
            let total = seconds as u32;
            Some(format!(
                "https://vimeo.com/{}#t={}m{}s",
                locator,
                total / 60,
                total % 60
            ))
        }
        SourceKind::Mux | SourceKind::Upload => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn registry() -> SourceRegistry {
        SourceRegistry::new(&Settings::default())
    }

    #[test]
    fn test_detect_youtube_url() {
        let (kind, locator) = registry()
            .detect("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .unwrap();
        assert_eq!(kind, SourceKind::YouTube);
        assert_eq!(locator, "dQw4w9WgXcQ");
    }

    #[test]
    fn test_detect_vimeo_url() {
        let (kind, locator) = registry().detect("https://vimeo.com/76979871").unwrap();
        assert_eq!(kind, SourceKind::Vimeo);
        assert_eq!(locator, "76979871");
    }

    #[test]
    fn test_detect_mux_playback_url() {
        let (kind, locator) = registry()
            .detect("https://stream.mux.com/DS00Spx1CV902MCtPj5WknGlR102V5HFkDe.m3u8")
            .unwrap();
        assert_eq!(kind, SourceKind::Mux);
        assert_eq!(locator, "DS00Spx1CV902MCtPj5WknGlR102V5HFkDe");
    }

    #[test]
    fn test_detect_unknown_reference() {
        assert!(registry().detect("definitely not a reference").is_none());
    }

    #[test]
    fn test_parse_rejects_cross_kind_reference() {
        let result = registry().parse(SourceKind::Vimeo, "dQw4w9WgXcQ");
        match result {
            Err(PensumError::InvalidReference(_)) => {}
            other => panic!("expected InvalidReference, got {:?}", other),
        }
    }

    #[test]
    fn test_source_kind_roundtrip() {
        for kind in [
            SourceKind::Upload,
            SourceKind::YouTube,
            SourceKind::Vimeo,
            SourceKind::Mux,
        ] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_timestamp_url_per_kind() {
        assert_eq!(
            timestamp_url(SourceKind::YouTube, "dQw4w9WgXcQ", 65.0).unwrap(),
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=65s"
        );
        assert_eq!(
            timestamp_url(SourceKind::Vimeo, "76979871", 65.0).unwrap(),
            "https://vimeo.com/76979871#t=1m5s"
        );
        assert!(timestamp_url(SourceKind::Upload, "/tmp/a.mp4", 65.0).is_none());
    }
}
