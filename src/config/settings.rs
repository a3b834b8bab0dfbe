//! Configuration settings for Pensum.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub sources: SourceSettings,
    pub transcripts: TranscriptSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub chat: ChatSettings,
    pub pipeline: PipelineSettings,
    pub server: ServerSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary files (downloaded audio, split pieces).
    pub temp_dir: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.pensum".to_string(),
            temp_dir: "/tmp/pensum".to_string(),
        }
    }
}

/// Source adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Caption languages to prefer, in order.
    pub preferred_languages: Vec<String>,
    /// Maximum media duration to ingest (in seconds).
    pub max_duration_seconds: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            preferred_languages: vec!["en".to_string()],
            max_duration_seconds: 14400, // 4 hours
        }
    }
}

/// Transcript extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptSettings {
    /// Speech-to-text model for the paid fallback tier.
    pub stt_model: String,
    /// Duration in seconds for splitting long audio before transcription.
    pub split_seconds: u32,
    /// Maximum concurrent speech-to-text calls for split audio.
    pub max_concurrent_pieces: usize,
    /// Retry attempts per tier when rate limited.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles per retry).
    pub retry_base_ms: u64,
}

impl Default for TranscriptSettings {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            split_seconds: 1200, // 20 minutes
            max_concurrent_pieces: 3,
            max_retries: 3,
            retry_base_ms: 500,
        }
    }
}

/// Content chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Target words per chunk (useful range 500-1000).
    pub target_words: usize,
    /// Words of trailing context carried into the next chunk.
    pub overlap_words: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            target_words: 800,
            overlap_words: 100,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions; every stored vector must match.
    pub dimensions: u32,
    /// Inputs per embedding request.
    pub batch_size: usize,
    /// Concurrent embedding requests in flight.
    pub max_concurrent_batches: usize,
    /// Retry attempts when rate limited.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub retry_base_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 20,
            max_concurrent_batches: 4,
            max_retries: 3,
            retry_base_ms: 500,
        }
    }
}

/// Retrieval and ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Results returned per query.
    pub top_k: usize,
    /// Candidates fetched per result slot before re-ranking.
    pub overfetch_multiplier: usize,
    /// Weight of cosine similarity in the composite score.
    pub similarity_weight: f64,
    /// Weight of the recency boost.
    pub recency_weight: f64,
    /// Weight of the popularity boost.
    pub popularity_weight: f64,
    /// Days for the recency boost to halve.
    pub recency_half_life_days: f64,
    /// Seconds a (query, scope) result set stays cached.
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 6,
            overfetch_multiplier: 4,
            similarity_weight: 0.75,
            recency_weight: 0.15,
            popularity_weight: 0.10,
            recency_half_life_days: 90.0,
            cache_ttl_secs: 300,
        }
    }
}

/// Chat completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// LLM model for response generation.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Cap on generated tokens per answer.
    pub max_output_tokens: u32,
    /// Token budget for the retrieved-context portion of the prompt.
    pub context_token_budget: usize,
    /// Conversation history pairs replayed for continuity.
    pub history_pairs: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_output_tokens: 1024,
            context_token_budget: 8000,
            history_pairs: 5,
        }
    }
}

/// Pipeline orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound on the transcription stage, in seconds.
    pub transcribe_timeout_secs: u64,
    /// Upper bound on the chunking stage, in seconds.
    pub chunk_timeout_secs: u64,
    /// Upper bound on the embedding stage, in seconds.
    pub embed_timeout_secs: u64,
    /// Retry attempts per stage for transient failures.
    pub max_stage_retries: u32,
    /// Base backoff delay per stage, in milliseconds.
    pub retry_base_ms: u64,
    /// Age in seconds after which a non-terminal video counts as stuck.
    pub stale_after_secs: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            transcribe_timeout_secs: 900,
            chunk_timeout_secs: 60,
            embed_timeout_secs: 600,
            max_stage_retries: 3,
            retry_base_ms: 500,
            stale_after_secs: 3600,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PensumError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PENSUM_CONFIG") {
            return Self::expand_path(&path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pensum")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Path of the SQLite database inside the data directory.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir().join("pensum.db")
    }
}
