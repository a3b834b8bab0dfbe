//! Uploaded-file source adapter.
//!
//! Supports both audio and video files. A sidecar caption file next to the
//! media file (same stem, `.vtt` or `.srt`) is picked up as a native track.

use super::{CaptionTrack, RawMedia, SourceAdapter, SourceKind};
use crate::error::{PensumError, Result};
use crate::transcripts::sidecar_caption_path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Supported audio file extensions.
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "opus", "m4a", "wma", "aiff", "alac",
];

/// Supported video file extensions (audio will be extracted).
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v", "mpeg", "mpg", "3gp",
];

/// Adapter for files already on disk.
pub struct UploadAdapter;

impl UploadAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Check if path is a supported audio file.
    fn is_audio_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Check if path is a supported video file.
    fn is_video_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Check if path is a supported media file (audio or video).
    fn is_media_file(path: &Path) -> bool {
        Self::is_audio_file(path) || Self::is_video_file(path)
    }

    /// Get media metadata using ffprobe.
    async fn get_metadata_ffprobe(path: &Path) -> Result<(Option<u32>, Option<String>)> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                path.to_str().unwrap_or(""),
            ])
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PensumError::ToolNotFound("ffprobe".to_string())
                } else {
                    PensumError::AudioFetch(format!("Failed to run ffprobe: {}", e))
                }
            })?;

        if !output.status.success() {
            // ffprobe failed, but we can still proceed without metadata
            return Ok((None, None));
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        let json: serde_json::Value = serde_json::from_str(&json_str).unwrap_or_default();

        let duration = json["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d as u32);

        let title = json["format"]["tags"]["title"]
            .as_str()
            .map(|s| s.to_string());

        Ok((duration, title))
    }
}

impl Default for UploadAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for UploadAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Upload
    }

    fn parse_reference(&self, input: &str) -> Option<String> {
        // Syntax only; whether the file exists is a resolve-time question
        if Self::is_media_file(Path::new(input)) {
            Some(input.to_string())
        } else {
            None
        }
    }

    async fn resolve(&self, locator: &str) -> Result<RawMedia> {
        let path = Path::new(locator);

        if !path.exists() {
            return Err(PensumError::SourceUnavailable(format!(
                "File not found: {}",
                locator
            )));
        }

        if !Self::is_media_file(path) {
            return Err(PensumError::InvalidReference(format!(
                "Not a recognized audio or video file: {}",
                locator
            )));
        }

        let (duration, metadata_title) = Self::get_metadata_ffprobe(path).await?;

        let title = metadata_title.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Unknown")
                .to_string()
        });

        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .to_string();

        // File modification time stands in for a publish date
        let published_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let caption_tracks = match sidecar_caption_path(&canonical) {
            Some(sidecar) => {
                let format = sidecar
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|s| s.to_string());
                vec![CaptionTrack {
                    // Sidecar files do not declare a language
                    language: "und".to_string(),
                    location: sidecar.to_string_lossy().to_string(),
                    format,
                    auto_generated: false,
                }]
            }
            None => Vec::new(),
        };

        Ok(RawMedia {
            kind: SourceKind::Upload,
            locator: canonical.clone(),
            title,
            description: None,
            duration_seconds: duration,
            source_url: canonical,
            published_at,
            channel: None,
            thumbnail_url: None,
            caption_tracks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_audio_file() {
        assert!(UploadAdapter::is_audio_file(Path::new("audio.mp3")));
        assert!(UploadAdapter::is_audio_file(Path::new("audio.WAV")));
        assert!(UploadAdapter::is_audio_file(Path::new(
            "/path/to/audio.flac"
        )));
        assert!(!UploadAdapter::is_audio_file(Path::new("video.mp4")));
        assert!(!UploadAdapter::is_audio_file(Path::new("document.pdf")));
    }

    #[test]
    fn test_is_video_file() {
        assert!(UploadAdapter::is_video_file(Path::new("video.mp4")));
        assert!(UploadAdapter::is_video_file(Path::new("video.MKV")));
        assert!(!UploadAdapter::is_video_file(Path::new("audio.mp3")));
    }

    #[test]
    fn test_parse_reference() {
        let adapter = UploadAdapter::new();

        assert_eq!(
            adapter.parse_reference("lecture.mp4"),
            Some("lecture.mp4".to_string())
        );
        assert_eq!(adapter.parse_reference("notes.pdf"), None);
    }

    #[tokio::test]
    async fn test_resolve_missing_file_is_unavailable() {
        let adapter = UploadAdapter::new();

        let err = adapter
            .resolve("/nonexistent/lecture.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, PensumError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_resolve_picks_up_sidecar_captions() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("lecture.mp3");
        std::fs::write(&media, b"not really audio").unwrap();
        std::fs::write(dir.path().join("lecture.vtt"), "WEBVTT\n").unwrap();

        let adapter = UploadAdapter::new();
        let resolved = adapter.resolve(media.to_str().unwrap()).await;

        // ffprobe may be missing in the test environment
        let Ok(raw) = resolved else { return };
        assert_eq!(raw.caption_tracks.len(), 1);
        assert_eq!(raw.caption_tracks[0].language, "und");
        assert!(raw.caption_tracks[0].location.ends_with("lecture.vtt"));
    }
}
