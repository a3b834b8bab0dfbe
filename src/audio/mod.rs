//! Audio acquisition and processing utilities.
//!
//! Turns resolved media into a local audio file for paid transcription, using
//! yt-dlp for remote sources and ffmpeg for local extraction and splitting.

use crate::error::{PensumError, Result};
use crate::sources::{RawMedia, SourceKind};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Audio container extensions the transcription API accepts directly.
const DIRECT_AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg"];

/// Produces a local audio file for the given media.
///
/// Remote sources are downloaded with yt-dlp; uploads are passed through when
/// already in an accepted audio container, or have their audio track extracted
/// otherwise. Results are cached in `temp_dir` keyed by source identity.
#[instrument(skip_all, fields(kind = %media.kind, locator = %media.locator))]
pub async fn fetch_audio(media: &RawMedia, temp_dir: &Path) -> Result<PathBuf> {
    match media.kind {
        SourceKind::Upload => prepare_upload(Path::new(&media.locator), temp_dir).await,
        _ => {
            let file_id = format!("{}_{}", media.kind.as_str(), media.locator);
            download_audio(&media.source_url, &file_id, temp_dir).await
        }
    }
}

/// Prepares an uploaded file: pass through direct audio, extract otherwise.
async fn prepare_upload(path: &Path, temp_dir: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(PensumError::SourceUnavailable(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if DIRECT_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(path.to_path_buf());
    }

    std::fs::create_dir_all(temp_dir)?;

    // Stable cache key derived from the canonical path
    let cache_key = format!(
        "upload_{}",
        path.to_string_lossy().replace(['/', '\\', ' '], "_")
    );
    let target_path = temp_dir.join(format!("{cache_key}.mp3"));

    if target_path.exists() {
        info!("Using cached audio track");
        return Ok(target_path);
    }

    extract_audio_track(path, &target_path).await?;
    Ok(target_path)
}

/// Downloads audio from a URL and saves it as MP3.
///
/// Uses yt-dlp to download and extract audio. If the file already exists,
/// it will be returned without re-downloading.
async fn download_audio(url: &str, file_id: &str, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let target_path = output_dir.join(format!("{file_id}.mp3"));

    if target_path.exists() {
        info!("Using cached audio file");
        return Ok(target_path);
    }

    info!("Downloading audio from {}", url);

    let template = output_dir.join(format!("{file_id}.%(ext)s"));

    let result = Command::new("yt-dlp")
        .arg("--extract-audio")
        .arg("--audio-format").arg("mp3")
        .arg("--audio-quality").arg("0")
        .arg("--output").arg(template.to_str().unwrap_or_default())
        .arg("--no-playlist")
        .arg("--quiet")
        .arg("--no-warnings")
        .arg(url)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PensumError::ToolNotFound("yt-dlp".into()));
        }
        Err(e) => {
            return Err(PensumError::AudioFetch(format!("yt-dlp execution failed: {e}")));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PensumError::AudioFetch(format!("yt-dlp failed: {stderr}")));
    }

    // yt-dlp may output different formats; find and normalize to mp3
    let downloaded = find_downloaded_file(output_dir, file_id)?;

    if downloaded != target_path {
        extract_audio_track(&downloaded, &target_path).await?;
        let _ = std::fs::remove_file(&downloaded);
    }

    Ok(target_path)
}

/// Locates a downloaded audio file by its cache key.
fn find_downloaded_file(dir: &Path, file_id: &str) -> Result<PathBuf> {
    // Common audio formats that yt-dlp may produce
    for ext in &["mp3", "opus", "m4a", "webm", "ogg"] {
        let candidate = dir.join(format!("{file_id}.{ext}"));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // Fallback: scan directory for matching prefix
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PensumError::AudioFetch(format!("Cannot read directory: {e}")))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(file_id) {
            return Ok(entry.path());
        }
    }

    Err(PensumError::AudioFetch("Audio file not found after download".into()))
}

/// Extracts the audio track of a media file into an MP3 using ffmpeg.
async fn extract_audio_track(source: &Path, dest: &Path) -> Result<()> {
    debug!("Extracting audio track from {:?}", source);

    let result = Command::new("ffmpeg")
        .arg("-i").arg(source)
        .arg("-vn")
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(PensumError::AudioFetch(format!("ffmpeg extraction failed: {err}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PensumError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(PensumError::AudioFetch(format!("ffmpeg error: {e}"))),
    }
}

/// Segments a long audio file into smaller pieces for transcription.
///
/// Each piece will be approximately `piece_seconds` long. Returns tuples of
/// (piece_path, offset_seconds) for each segment.
#[instrument(skip_all)]
pub async fn split_audio(
    source: &Path,
    output_dir: &Path,
    piece_seconds: u32,
) -> Result<Vec<(PathBuf, f64)>> {
    std::fs::create_dir_all(output_dir)?;

    let total_duration = probe_duration(source).await?;
    info!("Total audio duration: {:.1}s", total_duration);

    let piece_len = piece_seconds as f64;

    // Short audio doesn't need splitting
    if total_duration <= piece_len {
        return Ok(vec![(source.to_path_buf(), 0.0)]);
    }

    let base_name = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");

    let mut pieces = Vec::new();
    let mut offset = 0.0;
    let mut idx = 0u32;

    while offset < total_duration {
        let piece_path = output_dir.join(format!("{}_{:04}.mp3", base_name, idx));
        let piece_len_here = piece_len.min(total_duration - offset);

        extract_segment(source, &piece_path, offset, piece_len_here).await?;

        debug!("Created piece {} at offset {:.1}s", idx, offset);
        pieces.push((piece_path, offset));

        offset += piece_len;
        idx += 1;
    }

    info!("Split audio into {} pieces", pieces.len());
    Ok(pieces)
}

/// Extracts a time segment from an audio file.
async fn extract_segment(source: &Path, dest: &Path, start: f64, length: f64) -> Result<()> {
    // First attempt: stream copy (fast, no quality loss)
    let copy_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-c").arg("copy")
        .arg("-y")
        .arg("-loglevel").arg("warning")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Ok(status) = copy_result {
        if status.success() && dest.exists() {
            return Ok(());
        }
    }

    // Fallback: re-encode to MP3
    warn!("Stream copy failed, re-encoding segment");

    let encode_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match encode_result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(PensumError::AudioFetch(format!("Segment extraction failed: {err}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PensumError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(PensumError::AudioFetch(format!("ffmpeg error: {e}"))),
    }
}

/// Queries the duration of an audio file using ffprobe with JSON output.
async fn probe_duration(path: &Path) -> Result<f64> {
    let result = Command::new("ffprobe")
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_format")
        .arg(path)
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PensumError::ToolNotFound("ffprobe".into()));
        }
        Err(e) => {
            return Err(PensumError::AudioFetch(format!("ffprobe failed: {e}")));
        }
    };

    if !output.status.success() {
        return Err(PensumError::AudioFetch("ffprobe returned error".into()));
    }

    // Parse JSON output to extract duration
    let json_str = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|_| PensumError::AudioFetch("Invalid ffprobe output".into()))?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| PensumError::AudioFetch("Could not determine audio duration".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RawMedia;

    #[tokio::test]
    async fn test_direct_audio_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("talk.mp3");
        std::fs::write(&audio, b"mp3 bytes").unwrap();

        let mut media = RawMedia::for_tests("Talk");
        media.locator = audio.to_string_lossy().to_string();

        let result = fetch_audio(&media, dir.path()).await.unwrap();
        assert_eq!(result, audio);
    }

    #[tokio::test]
    async fn test_missing_upload_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();

        let mut media = RawMedia::for_tests("Gone");
        media.locator = "/nonexistent/talk.mp3".to_string();

        let err = fetch_audio(&media, dir.path()).await.unwrap_err();
        assert!(matches!(err, PensumError::SourceUnavailable(_)));
    }

    #[test]
    fn test_find_downloaded_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("youtube_abc.opus"), b"").unwrap();

        let found = find_downloaded_file(dir.path(), "youtube_abc").unwrap();
        assert!(found.to_string_lossy().ends_with("youtube_abc.opus"));
    }
}
