//! Persistence layer: videos, transcripts, chunks, chat sessions.
//!
//! Everything lives in one SQLite database. Chunk vectors are stored
//! alongside the chunk rows and queried by cosine similarity with a
//! creator/course scope filter.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::chunking::ContentChunk;
use crate::sources::{RawMedia, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of a video, persisted between pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Transcribing,
    Chunking,
    Embedding,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Transcribing => "transcribing",
            ProcessingStatus::Chunking => "chunking",
            ProcessingStatus::Embedding => "embedding",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Terminal states never advance on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// The happy path is strictly forward; `Failed` is reachable from any
    /// non-terminal state, and reprocessing re-enters a failed video at the
    /// stage that failed.
    pub fn can_transition(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        match (self, next) {
            (Pending, Transcribing) => true,
            (Transcribing, Chunking) => true,
            (Chunking, Embedding) => true,
            (Embedding, Completed) => true,
            (state, Failed) if !state.is_terminal() => true,
            (Failed, Transcribing) | (Failed, Chunking) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "transcribing" => Ok(ProcessingStatus::Transcribing),
            "chunking" => Ok(ProcessingStatus::Chunking),
            "embedding" => Ok(ProcessingStatus::Embedding),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(format!("Unknown processing status: {}", s)),
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered video and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Unique video ID.
    pub id: Uuid,
    /// Creator who owns the video.
    pub creator_id: String,
    /// Course the video belongs to, if any.
    pub course_id: Option<String>,
    /// Where the video came from.
    pub kind: SourceKind,
    /// Source-native identifier (video id, playback id, or file path).
    pub locator: String,
    /// Video title.
    pub title: String,
    /// Video description.
    pub description: Option<String>,
    /// Duration in seconds, when the source reports one.
    pub duration_seconds: Option<u32>,
    /// Canonical URL or path of the source.
    pub source_url: String,
    /// Channel or author name.
    pub channel: Option<String>,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// When the source says the video was published.
    pub published_at: Option<DateTime<Utc>>,
    /// Current pipeline status.
    pub status: ProcessingStatus,
    /// Stored failure reason, set when status is `Failed`.
    pub error: Option<String>,
    /// How many times chunks of this video were cited in answers.
    pub reference_count: i64,
    /// When the video was registered.
    pub created_at: DateTime<Utc>,
    /// Last status change or heartbeat.
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Register a resolved media item for a creator, starting at `Pending`.
    pub fn from_media(creator_id: &str, course_id: Option<&str>, media: &RawMedia) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            creator_id: creator_id.to_string(),
            course_id: course_id.map(|s| s.to_string()),
            kind: media.kind,
            locator: media.locator.clone(),
            title: media.title.clone(),
            description: media.description.clone(),
            duration_seconds: media.duration_seconds,
            source_url: media.source_url.clone(),
            channel: media.channel.clone(),
            thumbnail_url: media.thumbnail_url.clone(),
            published_at: media.published_at,
            status: ProcessingStatus::Pending,
            error: None,
            reference_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted chunk, optionally carrying its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk ID.
    pub id: Uuid,
    /// Video this chunk belongs to.
    pub video_id: Uuid,
    /// Order of this chunk in the video.
    pub ordinal: i64,
    /// Text content.
    pub text: String,
    /// Start time in the video (seconds).
    pub start_seconds: f64,
    /// End time in the video (seconds).
    pub end_seconds: f64,
    /// Number of words in `text`.
    pub word_count: i64,
    /// Embedding vector; null until the embedding stage commits it.
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Persistable chunk from the chunker's output, with no vector yet.
    pub fn from_content(video_id: Uuid, content: ContentChunk) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id,
            ordinal: content.ordinal,
            text: content.text,
            start_seconds: content.start_seconds,
            end_seconds: content.end_seconds,
            word_count: content.word_count as i64,
            embedding: None,
        }
    }
}

/// Scope restriction for vector search: one creator, optionally one course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    pub creator_id: String,
    pub course_id: Option<String>,
}

impl ScopeFilter {
    pub fn creator(creator_id: &str) -> Self {
        Self {
            creator_id: creator_id.to_string(),
            course_id: None,
        }
    }

    pub fn course(creator_id: &str, course_id: &str) -> Self {
        Self {
            creator_id: creator_id.to_string(),
            course_id: Some(course_id.to_string()),
        }
    }

    /// Stable key for caching per-scope results.
    pub fn cache_key(&self) -> String {
        match &self.course_id {
            Some(course) => format!("{}:{}", self.creator_id, course),
            None => format!("{}:*", self.creator_id),
        }
    }
}

/// A chunk matched by vector search, with the video fields ranking needs.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched chunk (embedding populated).
    pub chunk: Chunk,
    /// Title of the owning video.
    pub video_title: String,
    /// Source kind of the owning video.
    pub kind: SourceKind,
    /// Source locator of the owning video.
    pub locator: String,
    /// Publish date of the owning video, falling back to registration time.
    pub published_at: Option<DateTime<Utc>>,
    /// Citation count of the owning video.
    pub reference_count: i64,
    /// Cosine similarity to the query vector.
    pub similarity: f32,
}

/// A source reference attached to an assistant answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Video the cited chunk belongs to.
    pub video_id: Uuid,
    /// Video title at citation time.
    pub video_title: String,
    /// Ordinal of the cited chunk.
    pub ordinal: i64,
    /// Start of the cited passage in seconds.
    pub timestamp_seconds: f64,
    /// Composite relevance score the ranker assigned.
    pub relevance_score: f64,
    /// Short excerpt of the cited chunk.
    pub snippet: String,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(format!("Unknown message role: {}", s)),
        }
    }
}

/// A chat session between one student and one creator's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    /// Unique session ID.
    pub id: Uuid,
    /// Student who owns the session.
    pub student_id: String,
    /// Creator whose content the session queries.
    pub creator_id: String,
    /// Course scope, if the session is course-bound.
    pub course_id: Option<String>,
    /// Display title, derived lazily from the first message.
    pub title: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last message activity.
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(student_id: &str, creator_id: &str, course_id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            student_id: student_id.to_string(),
            creator_id: creator_id.to_string(),
            course_id: course_id.map(|s| s.to_string()),
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One message in a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID.
    pub id: Uuid,
    /// Session this message belongs to.
    pub session_id: Uuid,
    /// Author role.
    pub role: MessageRole,
    /// Message text. For a cancelled stream this is the partial answer.
    pub content: String,
    /// Source references, empty for user messages.
    pub citations: Vec<Citation>,
    /// Prompt tokens billed for this completion.
    pub prompt_tokens: Option<u32>,
    /// Completion tokens billed for this completion.
    pub completion_tokens: Option<u32>,
    /// Embedding API calls spent retrieving context for this answer.
    /// Zero when retrieval was served from cache.
    pub embedding_calls: Option<u32>,
    /// Computed cost in USD.
    pub cost_usd: Option<f64>,
    /// Whether the stream was cancelled before the answer finished.
    pub truncated: bool,
    /// Arrival time.
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A student's message.
    pub fn user(session_id: Uuid, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: MessageRole::User,
            content: content.to_string(),
            citations: Vec::new(),
            prompt_tokens: None,
            completion_tokens: None,
            embedding_calls: None,
            cost_usd: None,
            truncated: false,
            created_at: Utc::now(),
        }
    }

    /// An assistant answer with its citations and usage.
    pub fn assistant(session_id: Uuid, content: &str, citations: Vec<Citation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: MessageRole::Assistant,
            content: content.to_string(),
            citations,
            prompt_tokens: None,
            completion_tokens: None,
            embedding_calls: None,
            cost_usd: None,
            truncated: false,
            created_at: Utc::now(),
        }
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_happy_path_transitions() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition(Transcribing));
        assert!(Transcribing.can_transition(Chunking));
        assert!(Chunking.can_transition(Embedding));
        assert!(Embedding.can_transition(Completed));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use ProcessingStatus::*;
        for state in [Pending, Transcribing, Chunking, Embedding] {
            assert!(state.can_transition(Failed), "{} -> failed", state);
        }
        assert!(!Completed.can_transition(Failed));
        assert!(!Failed.can_transition(Failed));
    }

    #[test]
    fn test_no_skipping_stages() {
        use ProcessingStatus::*;
        assert!(!Pending.can_transition(Chunking));
        assert!(!Pending.can_transition(Completed));
        assert!(!Transcribing.can_transition(Embedding));
        assert!(!Completed.can_transition(Transcribing));
    }

    #[test]
    fn test_reprocess_reenters_at_failed_stage() {
        use ProcessingStatus::*;
        assert!(Failed.can_transition(Transcribing));
        assert!(Failed.can_transition(Chunking));
        assert!(!Failed.can_transition(Embedding));
    }

    #[test]
    fn test_status_roundtrip() {
        use ProcessingStatus::*;
        for status in [Pending, Transcribing, Chunking, Embedding, Completed, Failed] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_scope_cache_key_distinguishes_course() {
        let creator_wide = ScopeFilter::creator("c1");
        let course_bound = ScopeFilter::course("c1", "rust-101");
        assert_ne!(creator_wide.cache_key(), course_bound.cache_key());
    }
}
