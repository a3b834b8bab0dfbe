//! Configuration module for Pensum.
//!
//! Handles loading and managing application settings.

mod settings;

pub use settings::{
    ChatSettings, ChunkingSettings, EmbeddingSettings, GeneralSettings, PipelineSettings,
    RetrievalSettings, ServerSettings, Settings, SourceSettings, TranscriptSettings,
};
