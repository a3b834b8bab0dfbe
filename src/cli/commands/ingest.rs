//! Ingest command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::{IngestRequest, Pipeline};
use crate::sources::SourceKind;
use crate::store::ProcessingStatus;
use anyhow::Result;

/// Run the ingest command.
pub async fn run_ingest(
    reference: &str,
    owner: &str,
    course: Option<String>,
    kind: Option<SourceKind>,
    settings: Settings,
) -> Result<()> {
    // Pre-flight checks
    if let Err(e) = preflight::check(Operation::Ingest) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let pipeline = Pipeline::new(settings)?;

    let video = pipeline.ingest(&IngestRequest {
        creator_id: owner.to_string(),
        course_id: course,
        kind,
        reference: reference.to_string(),
    })?;

    match video.status {
        ProcessingStatus::Completed => {
            Output::warning(&format!(
                "'{}' is already indexed. Use 'pensum reprocess {}' to rebuild it.",
                video.title, video.id
            ));
            return Ok(());
        }
        ProcessingStatus::Failed => {
            Output::warning(&format!(
                "'{}' failed earlier: {}",
                video.title,
                video.error.as_deref().unwrap_or("unknown reason")
            ));
            Output::info(&format!("Use 'pensum reprocess {}' to retry it.", video.id));
            return Ok(());
        }
        _ => {}
    }

    Output::info(&format!(
        "Processing {} video {} ({})",
        video.kind, video.id, video.locator
    ));

    let spinner = Output::spinner("Running pipeline (transcribe, chunk, embed)...");

    match pipeline.process(video.id).await {
        Ok(processed) => {
            spinner.finish_and_clear();
            let chunks = pipeline.store().chunk_count(processed.id)?;
            Output::success(&format!("Indexed '{}' ({} chunks)", processed.title, chunks));
            Output::kv("Video ID", &processed.id.to_string());
        }
        Err(e) => {
            spinner.finish_and_clear();
            Output::error(&format!("Pipeline failed: {}", e));
            Output::info(&format!(
                "The video is kept as failed; 'pensum reprocess {}' retries it.",
                video.id
            ));
            return Err(e.into());
        }
    }

    Ok(())
}
