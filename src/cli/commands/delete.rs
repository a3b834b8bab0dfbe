//! Delete command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::store::SqliteStore;
use anyhow::Result;
use std::io::{self, Write};
use uuid::Uuid;

/// Run the delete command.
pub fn run_delete(video_id: Uuid, yes: bool, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.sqlite_path())?;

    let video = store
        .get_video(video_id)?
        .ok_or_else(|| anyhow::anyhow!("Video not found: {}", video_id))?;

    if !yes {
        print!(
            "Delete '{}' and all its transcripts and chunks? [y/N] ",
            video.title
        );
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            Output::info("Aborted.");
            return Ok(());
        }
    }

    if store.delete_video(video_id)? {
        Output::success(&format!("Deleted '{}'", video.title));
    } else {
        Output::warning("Video was already gone.");
    }

    Ok(())
}
