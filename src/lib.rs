//! Pensum - Video Ingestion and Retrieval-Augmented Chat
//!
//! A toolkit for course creators: ingest videos from uploads, YouTube,
//! Vimeo, or Mux, transcribe and index them, then let students chat with
//! the library and get streamed, citation-backed answers.
//!
//! The name "Pensum" is the Scandinavian word for a course's required
//! reading.
//!
//! # Overview
//!
//! Pensum allows you to:
//! - Register videos from multiple sources behind one adapter interface
//! - Extract transcripts along a cost ladder, from free captions to paid STT
//! - Chunk, embed, and index transcript text for semantic retrieval
//! - Answer student questions with streamed completions and citations
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `sources` - Source adapters (upload, YouTube, Vimeo, Mux)
//! - `audio` - Audio download and extraction for paid transcription
//! - `transcripts` - Transcript extraction tiers
//! - `chunking` - Segment-aligned transcript chunking
//! - `embedding` - Embedding generation
//! - `store` - SQLite persistence and vector search
//! - `pipeline` - Ingestion pipeline orchestration
//! - `retrieval` - Ranked, cached retrieval
//! - `chat` - Sessions, context assembly, and streamed answers
//!
//! # Example
//!
//! ```rust,no_run
//! use pensum::config::Settings;
//! use pensum::pipeline::{IngestRequest, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let pipeline = Pipeline::new(settings)?;
//!
//!     let video = pipeline.ingest(&IngestRequest {
//!         creator_id: "creator-1".to_string(),
//!         course_id: None,
//!         kind: None,
//!         reference: "https://youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
//!     })?;
//!     let processed = pipeline.process(video.id).await?;
//!     println!("Indexed '{}' ({})", processed.title, processed.status);
//!
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod chat;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod openai;
pub mod pipeline;
pub mod retrieval;
pub mod retry;
pub mod sources;
pub mod store;
pub mod transcripts;

pub use error::{PensumError, Result};
