//! Transcript extraction through a priority-ordered chain of cost tiers.
//!
//! Tiers are tried cheapest first: native captions, then auto-generated
//! captions, then paid speech-to-text. A tier that fails falls through to
//! the next; only an unavailable source aborts the whole chain.

use super::captions::{parse_captions, sniff_format, CaptionFormat};
use super::stt::SpeechToText;
use super::{Transcript, TranscriptSegment, TranscriptTier};
use crate::config::Settings;
use crate::error::{PensumError, Result};
use crate::retry::{retry_transient, RetryPolicy};
use crate::sources::{CaptionTrack, RawMedia};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Output of one extraction tier.
pub struct TierOutput {
    /// Language code, when the tier knows it.
    pub language: Option<String>,
    /// Ordered time-coded segments.
    pub segments: Vec<TranscriptSegment>,
}

/// One cost tier of the extraction chain.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Which tier this source represents.
    fn tier(&self) -> TranscriptTier;

    /// Produce segments for the media, or fail so the chain can fall through.
    async fn fetch(&self, media: &RawMedia) -> Result<TierOutput>;
}

/// Runs the tier chain against a `RawMedia` descriptor.
pub struct TranscriptExtractor {
    tiers: Vec<Arc<dyn TranscriptSource>>,
    retry: RetryPolicy,
}

impl TranscriptExtractor {
    /// Build the standard three-tier chain from settings.
    pub fn new(settings: &Settings) -> Self {
        let client = reqwest::Client::new();
        let languages = settings.sources.preferred_languages.clone();

        let tiers: Vec<Arc<dyn TranscriptSource>> = vec![
            Arc::new(CaptionTier::native(client.clone(), languages.clone())),
            Arc::new(CaptionTier::auto(client, languages)),
            Arc::new(SpeechToText::new(
                &settings.transcripts,
                settings.temp_dir(),
            )),
        ];

        Self {
            tiers,
            retry: RetryPolicy::new(
                settings.transcripts.max_retries,
                settings.transcripts.retry_base_ms,
            ),
        }
    }

    /// Build an extractor with explicit tiers (used by tests).
    pub fn with_tiers(tiers: Vec<Arc<dyn TranscriptSource>>, retry: RetryPolicy) -> Self {
        Self { tiers, retry }
    }

    /// Extract a transcript for the media, trying tiers in cost order.
    ///
    /// Rate limits within a tier are retried with backoff before the chain
    /// falls through. Full text and segments always come from the same tier.
    #[instrument(skip(self, media), fields(title = %media.title))]
    pub async fn extract(&self, video_id: Uuid, media: &RawMedia) -> Result<Transcript> {
        let mut last_error: Option<PensumError> = None;

        for source in &self.tiers {
            let tier = source.tier();
            debug!("Trying transcript tier: {}", tier);

            let attempt = retry_transient(&self.retry, tier.as_str(), || source.fetch(media)).await;

            match attempt {
                Ok(output) if !output.segments.is_empty() => {
                    info!(
                        "Transcript extracted via {} ({} segments)",
                        tier,
                        output.segments.len()
                    );
                    return Ok(Transcript::new(
                        video_id,
                        output.language,
                        tier,
                        output.segments,
                    ));
                }
                Ok(_) => {
                    warn!("Tier {} returned no segments, falling through", tier);
                    last_error = Some(PensumError::NoTranscriptAvailable(format!(
                        "{} produced an empty transcript",
                        tier
                    )));
                }
                Err(e @ PensumError::SourceUnavailable(_)) => {
                    // The media itself is gone; no further tier can succeed.
                    return Err(e);
                }
                Err(e) => {
                    warn!("Tier {} failed: {}, falling through", tier, e);
                    last_error = Some(e);
                }
            }
        }

        Err(PensumError::NoTranscriptAvailable(format!(
            "all extraction tiers exhausted for '{}'{}",
            media.title,
            last_error
                .map(|e| format!(" (last error: {})", e))
                .unwrap_or_default()
        )))
    }
}

/// Caption-track tier: fetches and parses a declared caption track.
///
/// Covers both the native tier (creator-provided tracks) and the alternative
/// tier (auto-generated tracks), distinguished by the `auto` flag.
pub struct CaptionTier {
    client: reqwest::Client,
    languages: Vec<String>,
    auto: bool,
}

impl CaptionTier {
    pub fn native(client: reqwest::Client, languages: Vec<String>) -> Self {
        Self {
            client,
            languages,
            auto: false,
        }
    }

    pub fn auto(client: reqwest::Client, languages: Vec<String>) -> Self {
        Self {
            client,
            languages,
            auto: true,
        }
    }

    /// Pick the best matching track: preferred languages in order, then any.
    fn select_track<'a>(&self, tracks: &'a [CaptionTrack]) -> Option<&'a CaptionTrack> {
        let candidates: Vec<&CaptionTrack> = tracks
            .iter()
            .filter(|t| t.auto_generated == self.auto)
            .collect();

        for lang in &self.languages {
            if let Some(track) = candidates
                .iter()
                .find(|t| t.language.starts_with(lang.as_str()))
            {
                return Some(track);
            }
        }
        candidates.first().copied()
    }

    /// Load a track payload from its URL or local path.
    async fn load_payload(&self, track: &CaptionTrack) -> Result<String> {
        if track.location.starts_with("http://") || track.location.starts_with("https://") {
            let response = self.client.get(&track.location).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PensumError::from_status(
                    status.as_u16(),
                    format!("caption fetch failed for {}", track.location),
                ));
            }
            Ok(response.text().await?)
        } else {
            Ok(tokio::fs::read_to_string(&track.location).await?)
        }
    }
}

#[async_trait]
impl TranscriptSource for CaptionTier {
    fn tier(&self) -> TranscriptTier {
        if self.auto {
            TranscriptTier::AutoCaptions
        } else {
            TranscriptTier::NativeCaptions
        }
    }

    async fn fetch(&self, media: &RawMedia) -> Result<TierOutput> {
        let track = self.select_track(&media.caption_tracks).ok_or_else(|| {
            PensumError::NoTranscriptAvailable(format!(
                "no {} caption track declared",
                if self.auto { "auto-generated" } else { "native" }
            ))
        })?;

        debug!(
            "Fetching caption track lang={} from {}",
            track.language, track.location
        );

        let payload = self.load_payload(track).await?;
        let format = track
            .format
            .as_deref()
            .and_then(|f| f.parse::<CaptionFormat>().ok())
            .unwrap_or_else(|| sniff_format(&payload));

        let segments = parse_captions(&payload, format)?;
        Ok(TierOutput {
            language: Some(track.language.clone()),
            segments,
        })
    }
}

/// Resolve a sidecar caption path next to an uploaded media file, if any.
///
/// `<stem>.vtt` wins over `<stem>.srt`.
pub fn sidecar_caption_path(media_path: &str) -> Option<PathBuf> {
    let path = PathBuf::from(media_path);
    for ext in ["vtt", "srt"] {
        let candidate = path.with_extension(ext);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedTier {
        tier: TranscriptTier,
        outcomes: Mutex<VecDeque<Result<TierOutput>>>,
        calls: AtomicU32,
    }

    impl ScriptedTier {
        fn new(tier: TranscriptTier, outcomes: Vec<Result<TierOutput>>) -> Arc<Self> {
            Arc::new(Self {
                tier,
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranscriptSource for ScriptedTier {
        fn tier(&self) -> TranscriptTier {
            self.tier
        }

        async fn fetch(&self, _media: &RawMedia) -> Result<TierOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(PensumError::NoTranscriptAvailable("exhausted".to_string()))
                })
        }
    }

    fn sample_output() -> TierOutput {
        TierOutput {
            language: Some("en".to_string()),
            segments: vec![TranscriptSegment::new(0.0, 2.0, "hello there".to_string())],
        }
    }

    fn test_media() -> RawMedia {
        RawMedia::for_tests("Test Video")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, 1)
    }

    #[tokio::test]
    async fn test_failed_tier_falls_through_to_next() {
        let first = ScriptedTier::new(
            TranscriptTier::NativeCaptions,
            vec![Err(PensumError::NoTranscriptAvailable("none".to_string()))],
        );
        let second = ScriptedTier::new(TranscriptTier::AutoCaptions, vec![Ok(sample_output())]);

        let extractor = TranscriptExtractor::with_tiers(
            vec![first.clone(), second.clone()],
            fast_retry(),
        );

        let transcript = extractor
            .extract(Uuid::new_v4(), &test_media())
            .await
            .unwrap();
        assert_eq!(transcript.tier, TranscriptTier::AutoCaptions);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_retried_within_tier() {
        let tier = ScriptedTier::new(
            TranscriptTier::NativeCaptions,
            vec![
                Err(PensumError::RateLimited("slow down".to_string())),
                Ok(sample_output()),
            ],
        );

        let extractor = TranscriptExtractor::with_tiers(vec![tier.clone()], fast_retry());

        let transcript = extractor
            .extract(Uuid::new_v4(), &test_media())
            .await
            .unwrap();
        assert_eq!(transcript.tier, TranscriptTier::NativeCaptions);
        assert_eq!(tier.calls(), 2);
    }

    #[tokio::test]
    async fn test_source_unavailable_aborts_chain() {
        let first = ScriptedTier::new(
            TranscriptTier::NativeCaptions,
            vec![Err(PensumError::SourceUnavailable("deleted".to_string()))],
        );
        let second = ScriptedTier::new(TranscriptTier::SpeechToText, vec![Ok(sample_output())]);

        let extractor = TranscriptExtractor::with_tiers(
            vec![first.clone(), second.clone()],
            fast_retry(),
        );

        let result = extractor.extract(Uuid::new_v4(), &test_media()).await;
        match result {
            Err(PensumError::SourceUnavailable(_)) => {}
            other => panic!("expected SourceUnavailable, got {:?}", other),
        }
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_tiers_exhausted_is_no_transcript() {
        let first = ScriptedTier::new(
            TranscriptTier::NativeCaptions,
            vec![Err(PensumError::NoTranscriptAvailable("none".to_string()))],
        );
        let second = ScriptedTier::new(
            TranscriptTier::SpeechToText,
            vec![Err(PensumError::ToolFailed("ffmpeg exploded".to_string()))],
        );

        let extractor =
            TranscriptExtractor::with_tiers(vec![first, second], fast_retry());

        match extractor.extract(Uuid::new_v4(), &test_media()).await {
            Err(PensumError::NoTranscriptAvailable(_)) => {}
            other => panic!("expected NoTranscriptAvailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transcript_uses_winning_tier_segments() {
        let tier = ScriptedTier::new(TranscriptTier::NativeCaptions, vec![Ok(sample_output())]);
        let extractor = TranscriptExtractor::with_tiers(vec![tier], fast_retry());

        let transcript = extractor
            .extract(Uuid::new_v4(), &test_media())
            .await
            .unwrap();
        assert_eq!(transcript.full_text, "hello there");
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_track_selection_prefers_language_order() {
        let tier = CaptionTier::native(
            reqwest::Client::new(),
            vec!["no".to_string(), "en".to_string()],
        );
        let tracks = vec![
            CaptionTrack::new("en", "http://x/en.vtt", Some("vtt"), false),
            CaptionTrack::new("no", "http://x/no.vtt", Some("vtt"), false),
            CaptionTrack::new("en", "http://x/en-auto.vtt", Some("vtt"), true),
        ];
        let selected = tier.select_track(&tracks).unwrap();
        assert_eq!(selected.language, "no");
    }

    #[test]
    fn test_track_selection_respects_auto_flag() {
        let tier = CaptionTier::auto(reqwest::Client::new(), vec!["en".to_string()]);
        let tracks = vec![
            CaptionTrack::new("en", "http://x/en.vtt", Some("vtt"), false),
            CaptionTrack::new("en", "http://x/en-auto.vtt", Some("vtt"), true),
        ];
        let selected = tier.select_track(&tracks).unwrap();
        assert!(selected.auto_generated);
    }
}
