//! Data models for transcripts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which extraction tier produced a transcript.
///
/// Ordered by cost: native and alternative captions are free, speech-to-text
/// is paid per audio minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptTier {
    /// Creator-provided captions from the source itself.
    NativeCaptions,
    /// Auto-generated captions offered by the source.
    AutoCaptions,
    /// Paid speech-to-text transcription of the audio.
    SpeechToText,
}

impl TranscriptTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptTier::NativeCaptions => "native_captions",
            TranscriptTier::AutoCaptions => "auto_captions",
            TranscriptTier::SpeechToText => "speech_to_text",
        }
    }
}

impl std::str::FromStr for TranscriptTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "native_captions" => Ok(TranscriptTier::NativeCaptions),
            "auto_captions" => Ok(TranscriptTier::AutoCaptions),
            "speech_to_text" => Ok(TranscriptTier::SpeechToText),
            _ => Err(format!("Unknown transcript tier: {}", s)),
        }
    }
}

impl std::fmt::Display for TranscriptTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A complete transcript with time-coded segments.
///
/// Full text and segments always come from the same extraction tier, so the
/// text used for embeddings and the timestamps used for citations never
/// drift apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Video this transcript belongs to.
    pub video_id: Uuid,
    /// Language code, when the source declared one.
    pub language: Option<String>,
    /// Extraction tier that produced the segments.
    pub tier: TranscriptTier,
    /// Individual transcript segments with timestamps.
    pub segments: Vec<TranscriptSegment>,
    /// Full transcript text (space-joined segments).
    pub full_text: String,
    /// Words in the full text.
    pub word_count: usize,
    /// Total duration in seconds.
    pub duration_seconds: f64,
}

impl Transcript {
    /// Create a new transcript from segments.
    pub fn new(
        video_id: Uuid,
        language: Option<String>,
        tier: TranscriptTier,
        segments: Vec<TranscriptSegment>,
    ) -> Self {
        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let word_count = full_text.split_whitespace().count();

        let duration_seconds = segments.last().map(|s| s.end_seconds()).unwrap_or(0.0);

        Self {
            video_id,
            language,
            tier,
            segments,
            full_text,
            word_count,
            duration_seconds,
        }
    }
}

/// A single segment of a transcript with timestamp information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds.
    pub start_seconds: f64,
    /// Duration in seconds.
    pub duration_seconds: f64,
    /// Transcribed text content.
    pub text: String,
}

impl TranscriptSegment {
    /// Create a new transcript segment.
    pub fn new(start_seconds: f64, duration_seconds: f64, text: String) -> Self {
        Self {
            start_seconds,
            duration_seconds,
            text,
        }
    }

    /// End time of this segment in seconds.
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }

    /// Words in this segment's text.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Format seconds as MM:SS or HH:MM:SS.
pub fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
