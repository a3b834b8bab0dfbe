//! Mux hosted-video adapter.
//!
//! Mux playback ids are resolved against the public HLS endpoint, which
//! answers without credentials for public assets and rejects signed or
//! deleted ones. Caption tracks are read from the master playlist's
//! subtitle renditions.

use super::{CaptionTrack, RawMedia, SourceAdapter, SourceKind};
use crate::error::{PensumError, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use url::Url;

/// Mux hosted-provider adapter.
pub struct MuxAdapter {
    playback_id_regex: Regex,
    client: reqwest::Client,
    preferred_languages: Vec<String>,
}

impl MuxAdapter {
    pub fn new(preferred_languages: Vec<String>) -> Self {
        let playback_id_regex = Regex::new(
            r"(?x)
            (?:
                (?:https?://)?
                stream\.mux\.com/
                ([A-Za-z0-9]{20,})
            )
            |
            ^([A-Za-z0-9]{20,})$
        ",
        )
        .expect("Invalid regex");

        Self {
            playback_id_regex,
            client: reqwest::Client::new(),
            preferred_languages,
        }
    }

    fn extract_playback_id(&self, input: &str) -> Option<String> {
        let caps = self.playback_id_regex.captures(input.trim())?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    }
}

/// Read subtitle renditions out of an HLS master playlist.
///
/// Mux serves each text track both as an HLS rendition and as a plain
/// `.vtt` document at the same path, so the rendition URI is rewritten
/// to the `.vtt` form the caption parser understands.
fn subtitle_tracks_from_playlist(playlist: &str, playback_id: &str) -> Vec<CaptionTrack> {
    let language_re = Regex::new(r#"LANGUAGE="([^"]+)""#).expect("Invalid regex");
    let uri_re = Regex::new(r#"URI="([^"]+)""#).expect("Invalid regex");

    // Relative rendition URIs resolve against the asset's directory
    let Ok(base) = Url::parse(&format!("https://stream.mux.com/{}/", playback_id)) else {
        return Vec::new();
    };

    playlist
        .lines()
        .filter(|line| line.starts_with("#EXT-X-MEDIA:") && line.contains("TYPE=SUBTITLES"))
        .filter_map(|line| {
            let language = language_re.captures(line)?.get(1)?.as_str().to_string();
            let uri = uri_re.captures(line)?.get(1)?.as_str();

            let absolute = base.join(uri).ok()?.to_string();
            let location = if let Some(stem) = absolute.strip_suffix(".m3u8") {
                format!("{}.vtt", stem)
            } else {
                absolute
            };

            Some(CaptionTrack {
                language,
                location,
                format: Some("vtt".to_string()),
                auto_generated: false,
            })
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for MuxAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Mux
    }

    fn parse_reference(&self, input: &str) -> Option<String> {
        self.extract_playback_id(input)
    }

    async fn resolve(&self, locator: &str) -> Result<RawMedia> {
        let playlist_url = format!("https://stream.mux.com/{}.m3u8", locator);

        let response = self.client.get(&playlist_url).send().await?;
        let status = response.status();

        if !status.is_success() {
            if status.is_client_error() {
                return Err(PensumError::SourceUnavailable(format!(
                    "Mux asset {} is signed or deleted (HTTP {})",
                    locator,
                    status.as_u16()
                )));
            }
            return Err(PensumError::from_status(
                status.as_u16(),
                format!("Mux playlist request failed for {}", locator),
            ));
        }

        let playlist = response.text().await?;
        let mut caption_tracks = subtitle_tracks_from_playlist(&playlist, locator);

        if caption_tracks.is_empty() {
            // No declared renditions; offer the conventional per-language
            // text-track paths as candidates, verified at fetch time.
            debug!("Mux asset {} declares no subtitle renditions", locator);
            caption_tracks = self
                .preferred_languages
                .iter()
                .map(|lang| CaptionTrack {
                    language: lang.clone(),
                    location: format!("https://stream.mux.com/{}/text/{}.vtt", locator, lang),
                    format: Some("vtt".to_string()),
                    auto_generated: false,
                })
                .collect();
        }

        let short_id: String = locator.chars().take(8).collect();

        Ok(RawMedia {
            kind: SourceKind::Mux,
            locator: locator.to_string(),
            title: format!("Mux asset {}", short_id),
            description: None,
            duration_seconds: None,
            source_url: playlist_url,
            published_at: None,
            channel: None,
            thumbnail_url: Some(format!("https://image.mux.com/{}/thumbnail.jpg", locator)),
            caption_tracks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYBACK_ID: &str = "DS00Spx1CV902MCtPj5WknGlR102V5HFkDe";

    #[test]
    fn test_parse_reference_shapes() {
        let adapter = MuxAdapter::new(vec!["en".to_string()]);

        assert_eq!(
            adapter.parse_reference(&format!("https://stream.mux.com/{}.m3u8", PLAYBACK_ID)),
            Some(PLAYBACK_ID.to_string())
        );
        assert_eq!(
            adapter.parse_reference(&format!("stream.mux.com/{}", PLAYBACK_ID)),
            Some(PLAYBACK_ID.to_string())
        );
        assert_eq!(
            adapter.parse_reference(PLAYBACK_ID),
            Some(PLAYBACK_ID.to_string())
        );

        // Short tokens are ambiguous with YouTube ids and rejected
        assert_eq!(adapter.parse_reference("shortid123"), None);
    }

    #[test]
    fn test_subtitle_tracks_from_playlist() {
        let playlist = "#EXTM3U\n\
            #EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"English\",LANGUAGE=\"en\",URI=\"text/en.m3u8\"\n\
            #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"Default\",URI=\"audio/default.m3u8\"\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2000000,SUBTITLES=\"subs\"\n\
            rendition.m3u8\n";

        let tracks = subtitle_tracks_from_playlist(playlist, PLAYBACK_ID);

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].language, "en");
        assert_eq!(
            tracks[0].location,
            format!("https://stream.mux.com/{}/text/en.vtt", PLAYBACK_ID)
        );
        assert!(!tracks[0].auto_generated);
    }

    #[test]
    fn test_subtitle_tracks_absolute_uri() {
        let playlist = format!(
            "#EXT-X-MEDIA:TYPE=SUBTITLES,LANGUAGE=\"no\",URI=\"https://stream.mux.com/{}/text/no.m3u8\"\n",
            PLAYBACK_ID
        );

        let tracks = subtitle_tracks_from_playlist(&playlist, PLAYBACK_ID);
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].location.ends_with("/text/no.vtt"));
    }
}
