//! Transcript models and extraction.
//!
//! A transcript is produced by a chain of cost tiers (native captions, auto
//! captions, speech-to-text) and persisted atomically alongside its video.

pub mod captions;
mod extractor;
mod models;
mod stt;

pub use captions::CaptionFormat;
pub use extractor::{
    sidecar_caption_path, CaptionTier, TierOutput, TranscriptExtractor, TranscriptSource,
};
pub use models::{format_timestamp, Transcript, TranscriptSegment, TranscriptTier};
pub use stt::{is_api_key_configured, SpeechToText};
