//! CLI module for Pensum.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::sources::SourceKind;

/// Pensum - Video Ingestion and Retrieval-Augmented Chat
///
/// Ingest course videos from uploads, YouTube, Vimeo, or Mux, index their
/// transcripts, and let students ask questions with cited, streamed answers.
/// The name "Pensum" is the Scandinavian word for a course's required reading.
#[derive(Parser, Debug)]
#[command(name = "pensum")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a video and run the pipeline to completion
    Ingest {
        /// Video reference: URL, external id, or local file path
        reference: String,

        /// Creator who owns the video
        #[arg(short, long)]
        owner: String,

        /// Course the video belongs to
        #[arg(long)]
        course: Option<String>,

        /// Force the source kind (upload, youtube, vimeo, mux) instead of detecting it
        #[arg(short, long)]
        kind: Option<SourceKind>,
    },

    /// Re-run the pipeline for failed or completed videos
    Reprocess {
        /// Video ID to reprocess
        video_id: Option<Uuid>,

        /// Reprocess every failed video
        #[arg(long)]
        all_failed: bool,

        /// Also sweep videos stuck mid-pipeline past the staleness threshold
        #[arg(long)]
        stale: bool,
    },

    /// Show one video's processing status
    Status {
        /// Video ID to inspect
        video_id: Uuid,
    },

    /// List registered videos
    List {
        /// Only show videos owned by this creator
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Delete a video and everything derived from it
    Delete {
        /// Video ID to delete
        video_id: Uuid,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Search indexed chunks and show the ranked hits
    Search {
        /// Search query
        query: String,

        /// Creator whose library to search
        #[arg(long)]
        creator: String,

        /// Restrict the search to one course
        #[arg(long)]
        course: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "6")]
        limit: usize,
    },

    /// Ask a question and stream the cited answer
    Ask {
        /// The question to ask
        question: String,

        /// Student asking the question
        #[arg(long)]
        student: String,

        /// Creator whose library to answer from
        #[arg(long)]
        creator: String,

        /// Restrict retrieval to one course
        #[arg(long)]
        course: Option<String>,

        /// Continue an existing chat session
        #[arg(short, long)]
        session: Option<Uuid>,
    },

    /// Start the HTTP API server
    Serve {
        /// Host to bind to (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init,
}
