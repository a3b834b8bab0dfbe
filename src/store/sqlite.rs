//! SQLite-backed store.
//!
//! Cosine similarity is computed in Rust over the scoped candidate set. At
//! the scale of tens of thousands of chunks per creator a full scan of one
//! creator's vectors stays inside the latency budget; an approximate index
//! can replace the scan later without changing the interface.

use super::{
    cosine_similarity, ChatMessage, ChatSession, Chunk, Citation, MessageRole, ProcessingStatus,
    ScopeFilter, SearchHit, Video,
};
use crate::error::{PensumError, Result};
use crate::sources::SourceKind;
use crate::transcripts::Transcript;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    id TEXT PRIMARY KEY,
    creator_id TEXT NOT NULL,
    course_id TEXT,
    kind TEXT NOT NULL,
    locator TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    duration_seconds INTEGER,
    source_url TEXT NOT NULL,
    channel TEXT,
    thumbnail_url TEXT,
    published_at TEXT,
    status TEXT NOT NULL,
    error TEXT,
    reference_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_videos_source ON videos(creator_id, kind, locator);
CREATE INDEX IF NOT EXISTS idx_videos_creator ON videos(creator_id);
CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status);

CREATE TABLE IF NOT EXISTS transcripts (
    video_id TEXT PRIMARY KEY,
    tier TEXT NOT NULL,
    language TEXT,
    transcript_json TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    duration_seconds REAL NOT NULL,
    transcribed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    content TEXT NOT NULL,
    start_seconds REAL NOT NULL,
    end_seconds REAL NOT NULL,
    word_count INTEGER NOT NULL,
    embedding BLOB
);

CREATE INDEX IF NOT EXISTS idx_chunks_video ON chunks(video_id);

CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    creator_id TEXT NOT NULL,
    course_id TEXT,
    title TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_pair ON chat_sessions(student_id, creator_id);

CREATE TABLE IF NOT EXISTS chat_messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    citations_json TEXT NOT NULL,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    embedding_calls INTEGER,
    cost_usd REAL,
    truncated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(session_id);
"#;

/// SQLite-backed store for all persisted state.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps ingestion writes from blocking chat-time reads
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PensumError::Store(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

fn parse_text_column<T: std::str::FromStr>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn parse_datetime(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn video_from_row(row: &Row<'_>) -> rusqlite::Result<Video> {
    let id: String = row.get(0)?;
    let kind: String = row.get(3)?;
    let published_at: Option<String> = row.get(11)?;
    let status: String = row.get(12)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(Video {
        id: parse_text_column(0, &id)?,
        creator_id: row.get(1)?,
        course_id: row.get(2)?,
        kind: parse_text_column::<SourceKind>(3, &kind)?,
        locator: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        duration_seconds: row.get(7)?,
        source_url: row.get(8)?,
        channel: row.get(9)?,
        thumbnail_url: row.get(10)?,
        published_at: parse_optional_datetime(published_at),
        status: parse_text_column::<ProcessingStatus>(12, &status)?,
        error: row.get(13)?,
        reference_count: row.get(14)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

const VIDEO_COLUMNS: &str = "id, creator_id, course_id, kind, locator, title, description, \
     duration_seconds, source_url, channel, thumbnail_url, published_at, status, error, \
     reference_count, created_at, updated_at";

// Video operations
impl SqliteStore {
    #[instrument(skip(self, video), fields(video_id = %video.id))]
    pub fn insert_video(&self, video: &Video) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            &format!("INSERT INTO videos ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)", VIDEO_COLUMNS),
            params![
                video.id.to_string(),
                video.creator_id,
                video.course_id,
                video.kind.as_str(),
                video.locator,
                video.title,
                video.description,
                video.duration_seconds,
                video.source_url,
                video.channel,
                video.thumbnail_url,
                video.published_at.map(|dt| dt.to_rfc3339()),
                video.status.as_str(),
                video.error,
                video.reference_count,
                video.created_at.to_rfc3339(),
                video.updated_at.to_rfc3339(),
            ],
        )?;

        debug!("Registered video {}", video.id);
        Ok(())
    }

    pub fn get_video(&self, id: Uuid) -> Result<Option<Video>> {
        let conn = self.lock()?;

        let result = conn.query_row(
            &format!("SELECT {} FROM videos WHERE id = ?1", VIDEO_COLUMNS),
            params![id.to_string()],
            video_from_row,
        );

        match result {
            Ok(video) => Ok(Some(video)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a video by its source identity, for idempotent ingestion.
    pub fn find_video_by_source(
        &self,
        creator_id: &str,
        kind: SourceKind,
        locator: &str,
    ) -> Result<Option<Video>> {
        let conn = self.lock()?;

        let result = conn.query_row(
            &format!(
                "SELECT {} FROM videos WHERE creator_id = ?1 AND kind = ?2 AND locator = ?3",
                VIDEO_COLUMNS
            ),
            params![creator_id, kind.as_str(), locator],
            video_from_row,
        );

        match result {
            Ok(video) => Ok(Some(video)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_videos(&self, creator_id: Option<&str>) -> Result<Vec<Video>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos WHERE (?1 IS NULL OR creator_id = ?1) ORDER BY created_at DESC",
            VIDEO_COLUMNS
        ))?;

        let videos = stmt.query_map(params![creator_id], video_from_row)?;
        Ok(videos.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Videos in `Failed` state, optionally for one creator.
    pub fn list_failed(&self, creator_id: Option<&str>) -> Result<Vec<Video>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos WHERE status = 'failed' AND (?1 IS NULL OR creator_id = ?1) ORDER BY updated_at",
            VIDEO_COLUMNS
        ))?;

        let videos = stmt.query_map(params![creator_id], video_from_row)?;
        Ok(videos.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Videos stuck in a non-terminal state with no heartbeat since `cutoff`.
    pub fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Video>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos \
             WHERE status NOT IN ('completed', 'failed') AND updated_at < ?1 \
             ORDER BY updated_at",
            VIDEO_COLUMNS
        ))?;

        let videos = stmt.query_map(params![cutoff.to_rfc3339()], video_from_row)?;
        Ok(videos.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Advance the status machine for one video.
    ///
    /// The update is guarded on the expected current status, so a concurrent
    /// transition loses cleanly instead of silently clobbering. The new
    /// status is durable before the caller starts the next stage.
    #[instrument(skip(self))]
    pub fn advance_status(
        &self,
        id: Uuid,
        from: ProcessingStatus,
        to: ProcessingStatus,
    ) -> Result<()> {
        if !from.can_transition(to) {
            return Err(PensumError::Store(format!(
                "Illegal status transition {} -> {} for video {}",
                from, to, id
            )));
        }

        let conn = self.lock()?;

        let updated = conn.execute(
            "UPDATE videos SET status = ?1, error = NULL, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                to.as_str(),
                Utc::now().to_rfc3339(),
                id.to_string(),
                from.as_str()
            ],
        )?;

        if updated == 0 {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM videos WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(PensumError::VideoNotFound(id.to_string()));
            }
            return Err(PensumError::Store(format!(
                "Video {} is no longer in state {}",
                id, from
            )));
        }

        debug!("Video {} moved {} -> {}", id, from, to);
        Ok(())
    }

    /// Move a video to `Failed` with a stored reason.
    ///
    /// Only non-terminal videos are touched; returns whether a row changed.
    #[instrument(skip(self, reason))]
    pub fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool> {
        let conn = self.lock()?;

        let updated = conn.execute(
            "UPDATE videos SET status = 'failed', error = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status NOT IN ('completed', 'failed')",
            params![reason, Utc::now().to_rfc3339(), id.to_string()],
        )?;

        Ok(updated > 0)
    }

    /// Put a terminal video back into a runnable stage for reprocessing.
    ///
    /// Re-entry is an explicit operator action, so unlike `advance_status`
    /// this accepts both `Failed` and `Completed` as starting points.
    pub fn reset_for_reprocess(&self, id: Uuid, to: ProcessingStatus) -> Result<()> {
        if !matches!(
            to,
            ProcessingStatus::Transcribing | ProcessingStatus::Chunking
        ) {
            return Err(PensumError::Store(format!(
                "Reprocessing can only re-enter at transcribing or chunking, not {}",
                to
            )));
        }

        let conn = self.lock()?;

        let updated = conn.execute(
            "UPDATE videos SET status = ?1, error = NULL, updated_at = ?2 \
             WHERE id = ?3 AND status IN ('completed', 'failed')",
            params![to.as_str(), Utc::now().to_rfc3339(), id.to_string()],
        )?;

        if updated == 0 {
            return match self.get_video_locked(&conn, id)? {
                Some(video) => Err(PensumError::Store(format!(
                    "Video {} is {} and cannot be reprocessed until it settles",
                    id, video.status
                ))),
                None => Err(PensumError::VideoNotFound(id.to_string())),
            };
        }

        Ok(())
    }

    fn get_video_locked(&self, conn: &Connection, id: Uuid) -> Result<Option<Video>> {
        let result = conn.query_row(
            &format!("SELECT {} FROM videos WHERE id = ?1", VIDEO_COLUMNS),
            params![id.to_string()],
            video_from_row,
        );
        match result {
            Ok(video) => Ok(Some(video)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fill in resolved source metadata on a provisionally registered video.
    ///
    /// The locator is the dedupe key and stays as ingested.
    pub fn update_video_metadata(&self, id: Uuid, media: &crate::sources::RawMedia) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "UPDATE videos SET title = ?1, description = ?2, duration_seconds = ?3, \
             source_url = ?4, channel = ?5, thumbnail_url = ?6, published_at = ?7, \
             updated_at = ?8 WHERE id = ?9",
            params![
                media.title,
                media.description,
                media.duration_seconds,
                media.source_url,
                media.channel,
                media.thumbnail_url,
                media.published_at.map(|dt| dt.to_rfc3339()),
                Utc::now().to_rfc3339(),
                id.to_string(),
            ],
        )?;

        Ok(())
    }

    /// Refresh a video's heartbeat so stale detection leaves it alone.
    pub fn touch_video(&self, id: Uuid) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE videos SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    /// Count one more citation against each listed video.
    pub fn increment_reference_counts(&self, video_ids: &[Uuid]) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        for id in video_ids {
            tx.execute(
                "UPDATE videos SET reference_count = reference_count + 1 WHERE id = ?1",
                params![id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete a video and everything derived from it.
    #[instrument(skip(self))]
    pub fn delete_video(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let id_str = id.to_string();
        tx.execute("DELETE FROM chunks WHERE video_id = ?1", params![id_str])?;
        tx.execute("DELETE FROM transcripts WHERE video_id = ?1", params![id_str])?;
        let deleted = tx.execute("DELETE FROM videos WHERE id = ?1", params![id_str])?;

        tx.commit()?;
        info!("Deleted video {} and derived rows", id);
        Ok(deleted > 0)
    }
}

// Transcript operations
impl SqliteStore {
    /// Store a transcript, replacing any previous one for the video.
    pub fn store_transcript(&self, transcript: &Transcript) -> Result<()> {
        let conn = self.lock()?;

        let transcript_json = serde_json::to_string(transcript)?;

        conn.execute(
            "INSERT OR REPLACE INTO transcripts \
             (video_id, tier, language, transcript_json, word_count, duration_seconds, transcribed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transcript.video_id.to_string(),
                transcript.tier.as_str(),
                transcript.language,
                transcript_json,
                transcript.word_count as i64,
                transcript.duration_seconds,
                Utc::now().to_rfc3339(),
            ],
        )?;

        debug!("Stored transcript for video {}", transcript.video_id);
        Ok(())
    }

    pub fn get_transcript(&self, video_id: Uuid) -> Result<Option<Transcript>> {
        let conn = self.lock()?;

        let result = conn.query_row(
            "SELECT transcript_json FROM transcripts WHERE video_id = ?1",
            params![video_id.to_string()],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// Chunk operations
impl SqliteStore {
    /// Replace a video's chunk set atomically (delete-then-recreate).
    ///
    /// This is the idempotency strategy for reprocessing: chunks are never
    /// appended next to an older generation.
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    pub fn replace_chunks(&self, video_id: Uuid, chunks: &[Chunk]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM chunks WHERE video_id = ?1",
            params![video_id.to_string()],
        )?;

        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks \
                 (id, video_id, ordinal, content, start_seconds, end_seconds, word_count, embedding) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    chunk.id.to_string(),
                    chunk.video_id.to_string(),
                    chunk.ordinal,
                    chunk.text,
                    chunk.start_seconds,
                    chunk.end_seconds,
                    chunk.word_count,
                    chunk.embedding.as_deref().map(Self::embedding_to_bytes),
                ],
            )?;
        }

        tx.commit()?;
        info!("Stored {} chunks for video {}", chunks.len(), video_id);
        Ok(chunks.len())
    }

    /// Attach embedding vectors to existing chunks, all-or-nothing.
    ///
    /// Any missing chunk row rolls the whole batch back, keeping the
    /// "no partially embedded chunk set" invariant.
    #[instrument(skip(self, vectors), fields(count = vectors.len()))]
    pub fn attach_embeddings(&self, video_id: Uuid, vectors: &[(Uuid, Vec<f32>)]) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        for (chunk_id, vector) in vectors {
            let updated = tx.execute(
                "UPDATE chunks SET embedding = ?1 WHERE id = ?2 AND video_id = ?3",
                params![
                    Self::embedding_to_bytes(vector),
                    chunk_id.to_string(),
                    video_id.to_string()
                ],
            )?;
            if updated != 1 {
                return Err(PensumError::Store(format!(
                    "Chunk {} not found while attaching embeddings",
                    chunk_id
                )));
            }
        }

        tx.commit()?;
        debug!("Attached {} embeddings for video {}", vectors.len(), video_id);
        Ok(())
    }

    pub fn chunks_for_video(&self, video_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, video_id, ordinal, content, start_seconds, end_seconds, word_count, embedding \
             FROM chunks WHERE video_id = ?1 ORDER BY ordinal",
        )?;

        let chunks = stmt.query_map(params![video_id.to_string()], chunk_from_row)?;
        Ok(chunks.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn chunk_count(&self, video_id: Uuid) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE video_id = ?1",
            params![video_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Nearest chunks to `query` within `filter`'s scope.
    ///
    /// Chunks without a committed vector are excluded, not erred. Results
    /// come back sorted by similarity descending, truncated to `limit`.
    #[instrument(skip(self, query), fields(scope = %filter.cache_key()))]
    pub fn search_chunks(
        &self,
        query: &[f32],
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT c.id, c.video_id, c.ordinal, c.content, c.start_seconds, c.end_seconds, \
                    c.word_count, c.embedding, v.title, v.kind, v.locator, \
                    COALESCE(v.published_at, v.created_at), v.reference_count \
             FROM chunks c \
             JOIN videos v ON v.id = c.video_id \
             WHERE v.creator_id = ?1 \
               AND (?2 IS NULL OR v.course_id = ?2) \
               AND c.embedding IS NOT NULL",
        )?;

        let rows = stmt.query_map(params![filter.creator_id, filter.course_id], |row| {
            let chunk = chunk_from_row(row)?;
            let video_title: String = row.get(8)?;
            let kind: String = row.get(9)?;
            let locator: String = row.get(10)?;
            let published_at: Option<String> = row.get(11)?;
            let reference_count: i64 = row.get(12)?;
            Ok((
                chunk,
                video_title,
                parse_text_column::<SourceKind>(9, &kind)?,
                locator,
                published_at,
                reference_count,
            ))
        })?;

        let mut hits: Vec<SearchHit> = rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(
                |(chunk, video_title, kind, locator, published_at, reference_count)| {
                    let similarity = chunk
                        .embedding
                        .as_deref()
                        .map(|v| cosine_similarity(query, v))
                        .unwrap_or(0.0);
                    SearchHit {
                        chunk,
                        video_title,
                        kind,
                        locator,
                        published_at: parse_optional_datetime(published_at),
                        reference_count,
                        similarity,
                    }
                },
            )
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        debug!("Found {} candidate chunks", hits.len());
        Ok(hits)
    }
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let id: String = row.get(0)?;
    let video_id: String = row.get(1)?;
    let embedding_bytes: Option<Vec<u8>> = row.get(7)?;

    Ok(Chunk {
        id: parse_text_column(0, &id)?,
        video_id: parse_text_column(1, &video_id)?,
        ordinal: row.get(2)?,
        text: row.get(3)?,
        start_seconds: row.get(4)?,
        end_seconds: row.get(5)?,
        word_count: row.get(6)?,
        embedding: embedding_bytes.map(|b| SqliteStore::bytes_to_embedding(&b)),
    })
}

// Chat session and message operations
impl SqliteStore {
    pub fn insert_session(&self, session: &ChatSession) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO chat_sessions (id, student_id, creator_id, course_id, title, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id.to_string(),
                session.student_id,
                session.creator_id,
                session.course_id,
                session.title,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;

        debug!("Created chat session {}", session.id);
        Ok(())
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>> {
        let conn = self.lock()?;

        let result = conn.query_row(
            "SELECT id, student_id, creator_id, course_id, title, created_at, updated_at \
             FROM chat_sessions WHERE id = ?1",
            params![id.to_string()],
            session_from_row,
        );

        match result {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Existing session for a (student, creator, course) scope, if any.
    pub fn find_session(
        &self,
        student_id: &str,
        creator_id: &str,
        course_id: Option<&str>,
    ) -> Result<Option<ChatSession>> {
        let conn = self.lock()?;

        let result = conn.query_row(
            "SELECT id, student_id, creator_id, course_id, title, created_at, updated_at \
             FROM chat_sessions \
             WHERE student_id = ?1 AND creator_id = ?2 AND course_id IS ?3 \
             ORDER BY created_at DESC LIMIT 1",
            params![student_id, creator_id, course_id],
            session_from_row,
        );

        match result {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_session_title(&self, id: Uuid, title: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chat_sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn touch_session(&self, id: Uuid) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        let conn = self.lock()?;

        let citations_json = serde_json::to_string(&message.citations)?;

        conn.execute(
            "INSERT INTO chat_messages \
             (id, session_id, role, content, citations_json, prompt_tokens, completion_tokens, embedding_calls, cost_usd, truncated, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id.to_string(),
                message.session_id.to_string(),
                message.role.as_str(),
                message.content,
                citations_json,
                message.prompt_tokens,
                message.completion_tokens,
                message.embedding_calls,
                message.cost_usd,
                message.truncated,
                message.created_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// All messages of a session in arrival order.
    pub fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, citations_json, prompt_tokens, \
                    completion_tokens, embedding_calls, cost_usd, truncated, created_at \
             FROM chat_messages WHERE session_id = ?1 ORDER BY rowid",
        )?;

        let messages = stmt.query_map(params![session_id.to_string()], message_from_row)?;
        Ok(messages.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The most recent `limit` messages of a session, oldest first.
    pub fn recent_messages(&self, session_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, citations_json, prompt_tokens, \
                    completion_tokens, embedding_calls, cost_usd, truncated, created_at \
             FROM chat_messages WHERE session_id = ?1 ORDER BY rowid DESC LIMIT ?2",
        )?;

        let mut messages: Vec<ChatMessage> = stmt
            .query_map(params![session_id.to_string(), limit as i64], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(ChatSession {
        id: parse_text_column(0, &id)?,
        student_id: row.get(1)?,
        creator_id: row.get(2)?,
        course_id: row.get(3)?,
        title: row.get(4)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let citations_json: String = row.get(4)?;
    let created_at: String = row.get(10)?;

    let citations: Vec<Citation> = serde_json::from_str(&citations_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ChatMessage {
        id: parse_text_column(0, &id)?,
        session_id: parse_text_column(1, &session_id)?,
        role: parse_text_column::<MessageRole>(2, &role)?,
        content: row.get(3)?,
        citations,
        prompt_tokens: row.get(5)?,
        completion_tokens: row.get(6)?,
        embedding_calls: row.get(7)?,
        cost_usd: row.get(8)?,
        truncated: row.get(9)?,
        created_at: parse_datetime(&created_at),
    })
}
