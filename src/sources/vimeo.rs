//! Vimeo source adapter.
//!
//! Metadata comes from the public oEmbed endpoint; caption tracks come from
//! the player config document when it is readable. A missing player config is
//! not fatal, the video just resolves with no declared tracks and transcript
//! extraction falls through to paid transcription.

use super::{CaptionTrack, RawMedia, SourceAdapter, SourceKind};
use crate::error::{PensumError, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// Vimeo embed adapter.
pub struct VimeoAdapter {
    video_id_regex: Regex,
    client: reqwest::Client,
}

impl VimeoAdapter {
    pub fn new() -> Self {
        let video_id_regex = Regex::new(
            r"(?x)
            (?:
                (?:https?://)?
                (?:www\.)?
                (?:vimeo\.com/|player\.vimeo\.com/video/)
                (\d+)
            )
            |
            ^(\d{6,12})$
        ",
        )
        .expect("Invalid regex");

        Self {
            video_id_regex,
            client: reqwest::Client::new(),
        }
    }

    fn extract_video_id(&self, input: &str) -> Option<String> {
        let caps = self.video_id_regex.captures(input.trim())?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    }

    async fn fetch_oembed(&self, video_id: &str) -> Result<serde_json::Value> {
        let video_url = format!("https://vimeo.com/{}", video_id);

        let response = self
            .client
            .get("https://vimeo.com/api/oembed.json")
            .query(&[("url", video_url.as_str())])
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            // oEmbed returns 404 for deleted and 403 for private videos
            if status.as_u16() == 404 || status.as_u16() == 403 {
                return Err(PensumError::SourceUnavailable(format!(
                    "Vimeo video {} is private or deleted (HTTP {})",
                    video_id,
                    status.as_u16()
                )));
            }
            return Err(PensumError::from_status(
                status.as_u16(),
                format!("Vimeo oEmbed request failed for {}", video_id),
            ));
        }

        Ok(response.json().await?)
    }

    /// Read declared text tracks from the player config. Errors are swallowed;
    /// tracks are an optional enrichment.
    async fn fetch_text_tracks(&self, video_id: &str) -> Vec<CaptionTrack> {
        let config_url = format!("https://player.vimeo.com/video/{}/config", video_id);

        let config: serde_json::Value = match self.client.get(&config_url).send().await {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(json) => json,
                Err(e) => {
                    debug!("Vimeo player config for {} was not JSON: {}", video_id, e);
                    return Vec::new();
                }
            },
            Ok(response) => {
                debug!(
                    "Vimeo player config for {} returned HTTP {}",
                    video_id,
                    response.status().as_u16()
                );
                return Vec::new();
            }
            Err(e) => {
                debug!("Vimeo player config fetch for {} failed: {}", video_id, e);
                return Vec::new();
            }
        };

        let Some(entries) = config["request"]["text_tracks"].as_array() else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let language = entry["lang"].as_str()?;
                let url = entry["url"].as_str()?;
                // Track URLs in the config document are site-relative
                let location = if url.starts_with("http") {
                    url.to_string()
                } else {
                    format!("https://vimeo.com{}", url)
                };
                Some(CaptionTrack {
                    language: language.to_string(),
                    location,
                    format: Some("vtt".to_string()),
                    auto_generated: false,
                })
            })
            .collect()
    }
}

impl Default for VimeoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for VimeoAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Vimeo
    }

    fn parse_reference(&self, input: &str) -> Option<String> {
        self.extract_video_id(input)
    }

    async fn resolve(&self, locator: &str) -> Result<RawMedia> {
        let oembed = self.fetch_oembed(locator).await?;

        let title = oembed["title"]
            .as_str()
            .unwrap_or("Unknown Title")
            .to_string();
        let description = oembed["description"].as_str().map(|s| s.to_string());
        let duration = oembed["duration"].as_f64().map(|d| d as u32);
        let channel = oembed["author_name"].as_str().map(|s| s.to_string());
        let thumbnail = oembed["thumbnail_url"].as_str().map(|s| s.to_string());

        let published_at = oembed["upload_date"].as_str().and_then(|date_str| {
            chrono::NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|d| d.and_utc())
        });

        let caption_tracks = self.fetch_text_tracks(locator).await;

        Ok(RawMedia {
            kind: SourceKind::Vimeo,
            locator: locator.to_string(),
            title,
            description,
            duration_seconds: duration,
            source_url: format!("https://vimeo.com/{}", locator),
            published_at,
            channel,
            thumbnail_url: thumbnail,
            caption_tracks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_url_shapes() {
        let adapter = VimeoAdapter::new();

        assert_eq!(
            adapter.parse_reference("https://vimeo.com/76979871"),
            Some("76979871".to_string())
        );
        assert_eq!(
            adapter.parse_reference("https://player.vimeo.com/video/76979871"),
            Some("76979871".to_string())
        );
        assert_eq!(
            adapter.parse_reference("76979871"),
            Some("76979871".to_string())
        );

        // Too short to be an unambiguous bare id
        assert_eq!(adapter.parse_reference("123"), None);
        assert_eq!(adapter.parse_reference("not-a-number"), None);
    }
}
