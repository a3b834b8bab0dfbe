//! YouTube source adapter.

use super::{CaptionTrack, RawMedia, SourceAdapter, SourceKind};
use crate::error::{PensumError, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// YouTube embed adapter.
pub struct YoutubeAdapter {
    video_id_regex: Regex,
}

impl YoutubeAdapter {
    pub fn new() -> Self {
        // Matches the accepted YouTube URL shapes and bare video ids
        let video_id_regex = Regex::new(
            r"(?x)
            (?:
                # Full YouTube URLs
                (?:https?://)?
                (?:www\.)?
                (?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/)
                ([a-zA-Z0-9_-]{11})
            )
            |
            # Bare video ID (11 characters)
            ^([a-zA-Z0-9_-]{11})$
        ",
        )
        .expect("Invalid regex");

        Self { video_id_regex }
    }

    /// Extract the 11-character video id from a URL or bare id.
    fn extract_video_id(&self, input: &str) -> Option<String> {
        let caps = self.video_id_regex.captures(input.trim())?;

        // Try group 1 (URL format) then group 2 (bare ID)
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    }

    /// Fetch metadata and caption-track lists using yt-dlp.
    async fn fetch_metadata_ytdlp(&self, video_id: &str) -> Result<RawMedia> {
        let url = format!("https://www.youtube.com/watch?v={}", video_id);

        let output = tokio::process::Command::new("yt-dlp")
            .args([
                "--dump-json",
                "--no-download",
                "--no-warnings",
                "--ignore-errors",
                &url,
            ])
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PensumError::ToolNotFound("yt-dlp".to_string())
                } else {
                    PensumError::ToolFailed(format!("Failed to run yt-dlp: {}", e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PensumError::SourceUnavailable(format!(
                "YouTube video {} is unavailable: {}",
                video_id,
                stderr.trim()
            )));
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        let json: serde_json::Value = serde_json::from_str(&json_str).map_err(|e| {
            PensumError::SourceUnavailable(format!("Failed to parse yt-dlp output: {}", e))
        })?;

        let title = json["title"]
            .as_str()
            .unwrap_or("Unknown Title")
            .to_string();

        let description = json["description"].as_str().map(|s| s.to_string());

        let duration = json["duration"].as_f64().map(|d| d as u32);

        let channel = json["channel"]
            .as_str()
            .or_else(|| json["uploader"].as_str())
            .map(|s| s.to_string());

        let thumbnail = json["thumbnail"].as_str().map(|s| s.to_string());

        let published_at = json["upload_date"].as_str().and_then(|date_str| {
            // yt-dlp returns date as YYYYMMDD
            if date_str.len() == 8 {
                chrono::NaiveDate::parse_from_str(date_str, "%Y%m%d")
                    .ok()
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
            } else {
                None
            }
        });

        let mut caption_tracks = caption_tracks_from_map(&json["subtitles"], false);
        caption_tracks.extend(caption_tracks_from_map(&json["automatic_captions"], true));
        debug!(
            "YouTube {} declares {} caption tracks",
            video_id,
            caption_tracks.len()
        );

        Ok(RawMedia {
            kind: SourceKind::YouTube,
            locator: video_id.to_string(),
            title,
            description,
            duration_seconds: duration,
            source_url: url,
            published_at,
            channel,
            thumbnail_url: thumbnail,
            caption_tracks,
        })
    }
}

/// Flatten a yt-dlp caption map (`lang -> [{ext, url}]`) into tracks,
/// preferring a parseable format per language.
fn caption_tracks_from_map(map: &serde_json::Value, auto_generated: bool) -> Vec<CaptionTrack> {
    let Some(by_language) = map.as_object() else {
        return Vec::new();
    };

    let mut tracks = Vec::new();
    for (language, entries) in by_language {
        let Some(entries) = entries.as_array() else {
            continue;
        };

        let preferred = entries
            .iter()
            .find(|e| e["ext"].as_str() == Some("vtt"))
            .or_else(|| entries.iter().find(|e| e["ext"].as_str() == Some("srv1")))
            .or_else(|| entries.first());

        if let Some(entry) = preferred {
            if let Some(url) = entry["url"].as_str() {
                tracks.push(CaptionTrack {
                    language: language.clone(),
                    location: url.to_string(),
                    format: entry["ext"].as_str().map(|s| s.to_string()),
                    auto_generated,
                });
            }
        }
    }
    tracks
}

impl Default for YoutubeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for YoutubeAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::YouTube
    }

    fn parse_reference(&self, input: &str) -> Option<String> {
        self.extract_video_id(input)
    }

    async fn resolve(&self, locator: &str) -> Result<RawMedia> {
        self.fetch_metadata_ytdlp(locator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_url_shapes() {
        let adapter = YoutubeAdapter::new();

        assert_eq!(
            adapter.parse_reference("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            adapter.parse_reference("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            adapter.parse_reference("https://youtube.com/embed/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            adapter.parse_reference("dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );

        assert_eq!(adapter.parse_reference("not-a-video-id"), None);
        assert_eq!(adapter.parse_reference(""), None);
    }

    #[test]
    fn test_caption_tracks_prefer_vtt() {
        let map = serde_json::json!({
            "en": [
                {"ext": "json3", "url": "http://x/en.json3"},
                {"ext": "vtt", "url": "http://x/en.vtt"},
                {"ext": "srv1", "url": "http://x/en.srv1"}
            ],
            "no": [
                {"ext": "srv1", "url": "http://x/no.srv1"}
            ]
        });

        let mut tracks = caption_tracks_from_map(&map, false);
        tracks.sort_by(|a, b| a.language.cmp(&b.language));

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].location, "http://x/en.vtt");
        assert_eq!(tracks[0].format.as_deref(), Some("vtt"));
        assert_eq!(tracks[1].location, "http://x/no.srv1");
        assert!(!tracks[0].auto_generated);
    }

    #[test]
    fn test_caption_tracks_empty_map() {
        assert!(caption_tracks_from_map(&serde_json::Value::Null, false).is_empty());
    }
}
