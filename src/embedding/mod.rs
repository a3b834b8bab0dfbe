//! Embedding generation for semantic search and retrieval.
//!
//! Batching and concurrency live here; the provider call itself sits behind
//! the [`Embedder`] trait. A batch either yields a vector for every input or
//! fails whole, so ordinal/vector pairing can never drift.

mod openai;

pub use openai::OpenAIEmbedder;

use crate::config::EmbeddingSettings;
use crate::error::{PensumError, Result};
use crate::retry::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Trait for embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for one batch of texts in a single request.
    ///
    /// Returns one vector per input, in input order, or fails the whole
    /// batch. Every vector has exactly `dimensions()` components.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimensions.
    fn dimensions(&self) -> usize;
}

/// Embed many texts by fanning batches out to a small worker pool.
///
/// Results come back in input order. Rate limits are retried per batch with
/// exponential backoff; any batch that still fails aborts the call so no
/// partial vector set escapes.
#[instrument(skip_all, fields(texts = texts.len()))]
pub async fn embed_in_batches(
    embedder: Arc<dyn Embedder>,
    texts: &[String],
    settings: &EmbeddingSettings,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let retry = RetryPolicy::new(settings.max_retries, settings.retry_base_ms);
    let batch_size = settings.batch_size.max(1);

    let batches: Vec<(usize, Vec<String>)> = texts
        .chunks(batch_size)
        .map(|batch| batch.to_vec())
        .enumerate()
        .collect();
    let batch_count = batches.len();

    debug!("Embedding {} texts in {} batches", texts.len(), batch_count);

    let mut in_flight = stream::iter(batches.into_iter().map(|(idx, batch)| {
        let embedder = Arc::clone(&embedder);
        async move {
            let vectors = retry_transient(&retry, "embed batch", || {
                let embedder = Arc::clone(&embedder);
                let batch = batch.clone();
                async move { embedder.embed_batch(&batch).await }
            })
            .await?;

            if vectors.len() != batch.len() {
                return Err(PensumError::Embedding(format!(
                    "Batch returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            Ok::<_, PensumError>((idx, vectors))
        }
    }))
    .buffer_unordered(settings.max_concurrent_batches.max(1));

    let mut by_batch: Vec<Option<Vec<Vec<f32>>>> = vec![None; batch_count];
    while let Some(result) = in_flight.next().await {
        let (idx, vectors) = result?;
        by_batch[idx] = Some(vectors);
    }
    drop(in_flight);

    let mut all = Vec::with_capacity(texts.len());
    for slot in by_batch {
        all.extend(slot.unwrap_or_default());
    }
    Ok(all)
}
