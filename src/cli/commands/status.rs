//! Status command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::store::SqliteStore;
use anyhow::Result;
use uuid::Uuid;

/// Run the status command.
pub fn run_status(video_id: Uuid, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.sqlite_path())?;

    let video = store
        .get_video(video_id)?
        .ok_or_else(|| anyhow::anyhow!("Video not found: {}", video_id))?;

    Output::header(&video.title);
    Output::kv("ID", &video.id.to_string());
    Output::kv("Source", &format!("{} ({})", video.kind, video.locator));
    Output::kv("Owner", &video.creator_id);
    if let Some(course) = &video.course_id {
        Output::kv("Course", course);
    }
    Output::kv("Status", &Output::status_label(video.status).to_string());
    if let Some(error) = &video.error {
        Output::kv("Error", error);
    }
    if let Some(duration) = video.duration_seconds {
        Output::kv("Duration", &format!("{}s", duration));
    }

    match store.get_transcript(video_id)? {
        Some(transcript) => Output::kv(
            "Transcript",
            &format!(
                "{} ({} words, {})",
                transcript.tier.as_str(),
                transcript.word_count,
                transcript.language.as_deref().unwrap_or("unknown language")
            ),
        ),
        None => Output::kv("Transcript", "none"),
    }

    let chunks = store.chunks_for_video(video_id)?;
    let embedded = chunks.iter().filter(|c| c.embedding.is_some()).count();
    Output::kv("Chunks", &format!("{} ({} embedded)", chunks.len(), embedded));
    Output::kv("Citations", &video.reference_count.to_string());
    Output::kv("Updated", &video.updated_at.to_rfc3339());

    Ok(())
}
