//! List command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::store::SqliteStore;
use anyhow::Result;

/// Run the list command.
pub fn run_list(owner: Option<String>, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.sqlite_path())?;
    let videos = store.list_videos(owner.as_deref())?;

    if videos.is_empty() {
        Output::info(
            "No videos registered yet. Use 'pensum ingest <reference> --owner <id>' to add one.",
        );
        return Ok(());
    }

    Output::header(&format!("Videos ({})", videos.len()));
    println!();

    let mut total_chunks = 0;
    for video in &videos {
        let chunks = store.chunk_count(video.id)?;
        total_chunks += chunks;
        Output::video_line(
            &video.title,
            &video.id.to_string(),
            video.status,
            chunks,
            video.duration_seconds,
        );
    }

    println!();
    Output::kv("Total videos", &videos.len().to_string());
    Output::kv("Total chunks", &total_chunks.to_string());

    Ok(())
}
