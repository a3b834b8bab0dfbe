//! OpenAI embeddings implementation.

use super::Embedder;
use crate::config::EmbeddingSettings;
use crate::error::{map_openai_error, PensumError, Result};
use crate::openai::create_client;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// OpenAI-based embedder.
pub struct OpenAIEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder from settings.
    pub fn new(settings: &EmbeddingSettings) -> Self {
        Self::with_config(&settings.model, settings.dimensions as usize)
    }

    /// Create a new OpenAI embedder with custom model and dimensions.
    pub fn with_config(model: &str, dimensions: usize) -> Self {
        Self {
            client: create_client(),
            model: model.to_string(),
            dimensions,
        }
    }
}

impl Default for OpenAIEmbedder {
    fn default() -> Self {
        Self::with_config("text-embedding-3-small", 1536)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting embeddings for {} texts", texts.len());

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .dimensions(self.dimensions as u32)
            .build()
            .map_err(|e| PensumError::Embedding(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        // Sort by index to ensure correct order
        let mut data: Vec<_> = response.data.into_iter().collect();
        data.sort_by_key(|e| e.index);

        let mut vectors = Vec::with_capacity(texts.len());
        for item in data {
            // Dimensionality is a hard contract; reject the whole batch on
            // any mismatch rather than store a vector that cannot be compared
            if item.embedding.len() != self.dimensions {
                return Err(PensumError::Embedding(format!(
                    "Expected {} dimensions, got {}",
                    self.dimensions,
                    item.embedding.len()
                )));
            }
            vectors.push(item.embedding);
        }

        if vectors.len() != texts.len() {
            return Err(PensumError::Embedding(format!(
                "Expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        Ok(vectors)
    }

    #[instrument(skip(self, text))]
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| PensumError::Embedding("Empty embedding response".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_creation() {
        let embedder = OpenAIEmbedder::new(&EmbeddingSettings::default());
        assert_eq!(embedder.dimensions(), 1536);

        let embedder = OpenAIEmbedder::with_config("text-embedding-3-large", 3072);
        assert_eq!(embedder.dimensions(), 3072);
    }
}
