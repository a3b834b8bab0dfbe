//! Reprocess command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::Pipeline;
use crate::store::ProcessingStatus;
use anyhow::Result;
use uuid::Uuid;

/// Run the reprocess command.
pub async fn run_reprocess(
    video_id: Option<Uuid>,
    all_failed: bool,
    stale: bool,
    settings: Settings,
) -> Result<()> {
    if video_id.is_some() && (all_failed || stale) {
        Output::error("Give either a video id or --all-failed/--stale, not both.");
        return Err(anyhow::anyhow!("conflicting reprocess arguments"));
    }
    if video_id.is_none() && !all_failed && !stale {
        Output::error("Nothing to do. Give a video id, or --all-failed to sweep failures.");
        return Err(anyhow::anyhow!("missing reprocess target"));
    }

    if let Err(e) = preflight::check(Operation::Ingest) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let pipeline = Pipeline::new(settings)?;

    if let Some(id) = video_id {
        let spinner = Output::spinner("Reprocessing...");
        match pipeline.reprocess(id).await {
            Ok(video) => {
                spinner.finish_and_clear();
                let chunks = pipeline.store().chunk_count(video.id)?;
                Output::success(&format!("Rebuilt '{}' ({} chunks)", video.title, chunks));
            }
            Err(e) => {
                spinner.finish_and_clear();
                Output::error(&format!("Reprocess failed: {}", e));
                return Err(e.into());
            }
        }
        return Ok(());
    }

    let scope = if stale { "failed and stale" } else { "failed" };
    Output::info(&format!("Sweeping {} videos...", scope));

    let outcomes = pipeline.reprocess_batch(stale).await?;
    if outcomes.is_empty() {
        Output::info("Nothing to reprocess.");
        return Ok(());
    }

    let mut recovered = 0;
    for outcome in &outcomes {
        if outcome.status == ProcessingStatus::Completed {
            Output::success(&format!("Recovered '{}' ({})", outcome.title, outcome.video_id));
            recovered += 1;
        } else {
            Output::error(&format!(
                "'{}' still {}: {}",
                outcome.title,
                outcome.status,
                outcome.error.as_deref().unwrap_or("no reason recorded")
            ));
        }
    }

    println!();
    Output::kv("Recovered", &format!("{}/{}", recovered, outcomes.len()));

    Ok(())
}
