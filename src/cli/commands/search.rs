//! Search command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::retrieval::Retriever;
use crate::store::{ScopeFilter, SqliteStore};
use anyhow::Result;
use std::sync::Arc;

/// Run the search command.
pub async fn run_search(
    query: &str,
    creator: &str,
    course: Option<String>,
    limit: usize,
    settings: Settings,
) -> Result<()> {
    // Pre-flight checks
    if let Err(e) = preflight::check(Operation::Search) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let store = Arc::new(SqliteStore::new(&settings.sqlite_path())?);
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::new(&settings.embedding));

    let mut retrieval = settings.retrieval.clone();
    retrieval.top_k = limit;
    let retriever = Retriever::new(store, embedder, retrieval);

    let filter = match &course {
        Some(course) => ScopeFilter::course(creator, course),
        None => ScopeFilter::creator(creator),
    };

    let spinner = Output::spinner("Searching...");
    let results = retriever.search(query, &filter).await;
    spinner.finish_and_clear();

    match results {
        Ok(hits) if hits.is_empty() => {
            Output::warning("No results found matching your query.");
        }
        Ok(hits) => {
            Output::success(&format!("Found {} results", hits.len()));
            for hit in &hits {
                Output::search_hit(
                    &hit.video_title,
                    &hit.timestamp(),
                    hit.score,
                    &hit.text,
                    hit.url().as_deref(),
                );
            }
        }
        Err(e) => {
            Output::error(&format!("Search failed: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
