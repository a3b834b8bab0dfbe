//! Speech-to-text fallback tier (OpenAI Whisper).
//!
//! The paid tier of the extraction chain: fetches the media's audio, splits
//! long files, and transcribes with bounded concurrency.

use super::extractor::{TierOutput, TranscriptSource};
use super::{TranscriptSegment, TranscriptTier};
use crate::audio;
use crate::config::TranscriptSettings;
use crate::error::{map_openai_error, PensumError, Result};
use crate::openai::create_client;
use crate::sources::RawMedia;
use async_openai::types::{AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Whisper-backed speech-to-text tier.
pub struct SpeechToText {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    split_seconds: u32,
    max_concurrent_pieces: usize,
    temp_dir: PathBuf,
}

impl SpeechToText {
    pub fn new(settings: &TranscriptSettings, temp_dir: PathBuf) -> Self {
        Self {
            client: create_client(),
            model: settings.stt_model.clone(),
            split_seconds: settings.split_seconds,
            max_concurrent_pieces: settings.max_concurrent_pieces,
            temp_dir,
        }
    }

    /// Transcribe one audio file (no splitting).
    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn transcribe_piece(
        &self,
        audio_path: &Path,
    ) -> Result<(Option<String>, Vec<TranscriptSegment>)> {
        debug!("Transcribing audio piece");

        let file_bytes = tokio::fs::read(audio_path).await?;

        let request = CreateTranscriptionRequestArgs::default()
            .file(async_openai::types::AudioInput::from_vec_u8(
                audio_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("audio.mp3")
                    .to_string(),
                file_bytes,
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson)
            .build()
            .map_err(|e| PensumError::OpenAI(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(map_openai_error)?;

        let language = Some(response.language.clone()).filter(|l| !l.is_empty());

        let segments: Vec<TranscriptSegment> = response
            .segments
            .map(|segs| {
                segs.iter()
                    .map(|s| {
                        TranscriptSegment::new(
                            s.start as f64,
                            (s.end - s.start).max(0.0) as f64,
                            s.text.trim().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_else(|| {
                // Some responses omit segments; keep the full text as one.
                vec![TranscriptSegment::new(
                    0.0,
                    response.duration as f64,
                    response.text.trim().to_string(),
                )]
            });

        debug!("Transcribed {} segments", segments.len());
        Ok((language, segments))
    }

    /// Transcribe an audio file, splitting it when it exceeds the piece size.
    async fn transcribe_audio(&self, audio_path: &Path) -> Result<TierOutput> {
        let piece_dir = tempfile::tempdir()?;
        let pieces = audio::split_audio(audio_path, piece_dir.path(), self.split_seconds).await?;

        if pieces.len() == 1 {
            let (language, segments) = self.transcribe_piece(audio_path).await?;
            return Ok(TierOutput { language, segments });
        }

        let piece_count = pieces.len();
        info!(
            "Transcribing {} audio pieces with {}",
            piece_count, self.model
        );

        let mut results: Vec<(usize, f64, Option<String>, Vec<TranscriptSegment>)> =
            Vec::with_capacity(piece_count);

        // Fail fast: one failed piece fails the whole tier attempt.
        let mut in_flight = stream::iter(pieces.into_iter().enumerate())
            .map(|(idx, (piece_path, time_offset))| async move {
                let result = self.transcribe_piece(&piece_path).await;
                (idx, time_offset, result)
            })
            .buffer_unordered(self.max_concurrent_pieces);

        while let Some((idx, time_offset, result)) = in_flight.next().await {
            match result {
                Ok((language, segments)) => results.push((idx, time_offset, language, segments)),
                Err(e) => {
                    drop(in_flight);
                    drop(piece_dir);
                    return Err(e);
                }
            }
        }

        results.sort_by_key(|(idx, _, _, _)| *idx);

        let language = results.iter().find_map(|(_, _, lang, _)| lang.clone());
        let mut all_segments = Vec::new();
        for (_, time_offset, _, mut segments) in results {
            // Piece timestamps are relative; shift by the piece offset.
            for segment in &mut segments {
                segment.start_seconds += time_offset;
            }
            all_segments.extend(segments);
        }

        drop(piece_dir);

        Ok(TierOutput {
            language,
            segments: all_segments,
        })
    }
}

#[async_trait]
impl TranscriptSource for SpeechToText {
    fn tier(&self) -> TranscriptTier {
        TranscriptTier::SpeechToText
    }

    async fn fetch(&self, media: &RawMedia) -> Result<TierOutput> {
        let audio_path = audio::fetch_audio(media, &self.temp_dir).await?;
        self.transcribe_audio(&audio_path).await
    }
}

/// Check if the OpenAI API key is configured.
pub fn is_api_key_configured() -> bool {
    std::env::var("OPENAI_API_KEY").is_ok()
}
