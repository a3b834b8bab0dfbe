//! Pipeline orchestrator.
//!
//! Drives a video from registration through transcription, chunking, and
//! embedding. Every status transition is persisted before the next stage
//! starts, so a crash leaves the row telling the truth about how far
//! processing got.

use crate::chunking::chunk_transcript;
use crate::config::Settings;
use crate::embedding::{embed_in_batches, Embedder, OpenAIEmbedder};
use crate::error::{PensumError, Result};
use crate::retry::{retry_transient, RetryPolicy};
use crate::sources::{RawMedia, SourceKind, SourceRegistry};
use crate::store::{Chunk, ProcessingStatus, SqliteStore, Video};
use crate::transcripts::{Transcript, TranscriptExtractor};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A request to register one video for processing.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Creator whose library the video joins.
    pub creator_id: String,
    /// Optional course the video belongs to.
    pub course_id: Option<String>,
    /// Source kind, or `None` to detect it from the reference.
    pub kind: Option<SourceKind>,
    /// The reference as submitted: URL, bare id, or file path.
    pub reference: String,
}

/// Outcome of one video inside a batch reprocess run.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub video_id: Uuid,
    pub title: String,
    pub status: ProcessingStatus,
    pub error: Option<String>,
}

/// The staged ingestion pipeline.
pub struct Pipeline {
    settings: Settings,
    store: Arc<SqliteStore>,
    registry: SourceRegistry,
    extractor: TranscriptExtractor,
    embedder: Arc<dyn Embedder>,
}

impl Pipeline {
    /// Create a pipeline with the standard components.
    pub fn new(settings: Settings) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(&settings.sqlite_path())?);
        let registry = SourceRegistry::new(&settings);
        let extractor = TranscriptExtractor::new(&settings);
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::new(&settings.embedding));

        std::fs::create_dir_all(settings.temp_dir())?;

        Ok(Self {
            settings,
            store,
            registry,
            extractor,
            embedder,
        })
    }

    /// Create a pipeline with custom components.
    pub fn with_components(
        settings: Settings,
        store: Arc<SqliteStore>,
        registry: SourceRegistry,
        extractor: TranscriptExtractor,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            settings,
            store,
            registry,
            extractor,
            embedder,
        }
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Register a video at `pending` after validating reference syntax.
    ///
    /// Idempotent per (creator, kind, locator): re-submitting a known source
    /// returns the existing row untouched. No network calls happen here;
    /// metadata is resolved when processing starts.
    #[instrument(skip(self, request), fields(creator = %request.creator_id))]
    pub fn ingest(&self, request: &IngestRequest) -> Result<Video> {
        let (kind, locator) = match request.kind {
            Some(kind) => (kind, self.registry.parse(kind, &request.reference)?),
            None => self.registry.detect(&request.reference).ok_or_else(|| {
                PensumError::InvalidReference(format!(
                    "could not match '{}' to any source kind",
                    request.reference
                ))
            })?,
        };

        if let Some(existing) = self
            .store
            .find_video_by_source(&request.creator_id, kind, &locator)?
        {
            info!(
                "Video already registered as {} ({})",
                existing.id, existing.status
            );
            return Ok(existing);
        }

        // Reference text stands in for title and URL until resolution
        let provisional = RawMedia {
            kind,
            locator,
            title: request.reference.trim().to_string(),
            description: None,
            duration_seconds: None,
            source_url: request.reference.trim().to_string(),
            published_at: None,
            channel: None,
            thumbnail_url: None,
            caption_tracks: Vec::new(),
        };

        let video = Video::from_media(
            &request.creator_id,
            request.course_id.as_deref(),
            &provisional,
        );
        self.store.insert_video(&video)?;

        info!("Registered video {} for {}", video.id, request.creator_id);
        Ok(video)
    }

    /// Run the staged pipeline for one video until `completed` or `failed`.
    ///
    /// Resumes from the persisted status, so a video re-entered at
    /// `chunking` skips transcription. Any stage error lands the video in
    /// `failed` with the reason stored, then propagates to the caller.
    #[instrument(skip(self))]
    pub async fn process(&self, video_id: Uuid) -> Result<Video> {
        let video = self.require_video(video_id)?;

        if let Err(e) = self.run_stages(video).await {
            warn!("Video {} failed: {}", video_id, e);
            let _ = self.store.mark_failed(video_id, &e.to_string());
            return Err(e);
        }

        self.require_video(video_id)
    }

    async fn run_stages(&self, video: Video) -> Result<()> {
        let id = video.id;
        let mut status = video.status;

        match status {
            ProcessingStatus::Completed => {
                info!("Video {} is already completed", id);
                return Ok(());
            }
            ProcessingStatus::Failed => {
                return Err(PensumError::InvalidInput(format!(
                    "video {} is failed; reprocess it to re-enter the pipeline",
                    id
                )));
            }
            _ => {}
        }

        if status == ProcessingStatus::Pending {
            self.store.advance_status(
                id,
                ProcessingStatus::Pending,
                ProcessingStatus::Transcribing,
            )?;
            status = ProcessingStatus::Transcribing;
        }

        if status == ProcessingStatus::Transcribing {
            let seconds = self.settings.pipeline.transcribe_timeout_secs;
            let transcript = self
                .stage("transcribing", seconds, self.transcribe(&video))
                .await?;
            self.store.store_transcript(&transcript)?;
            self.store.advance_status(
                id,
                ProcessingStatus::Transcribing,
                ProcessingStatus::Chunking,
            )?;
            status = ProcessingStatus::Chunking;
        }

        if status == ProcessingStatus::Chunking {
            let seconds = self.settings.pipeline.chunk_timeout_secs;
            self.stage("chunking", seconds, self.chunk(id)).await?;
            self.store
                .advance_status(id, ProcessingStatus::Chunking, ProcessingStatus::Embedding)?;
            status = ProcessingStatus::Embedding;
        }

        if status == ProcessingStatus::Embedding {
            let seconds = self.settings.pipeline.embed_timeout_secs;
            self.stage("embedding", seconds, self.embed(id)).await?;
            self.store.advance_status(
                id,
                ProcessingStatus::Embedding,
                ProcessingStatus::Completed,
            )?;
        }

        info!("Video {} completed", id);
        Ok(())
    }

    async fn stage<T>(
        &self,
        name: &str,
        timeout_secs: u64,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), work).await {
            Ok(result) => result,
            Err(_) => Err(PensumError::PipelineTimeout {
                stage: name.to_string(),
                seconds: timeout_secs,
            }),
        }
    }

    /// Resolve source metadata, then extract a transcript.
    async fn transcribe(&self, video: &Video) -> Result<Transcript> {
        let adapter = self.registry.adapter_for(video.kind)?;
        let retry = RetryPolicy::new(
            self.settings.pipeline.max_stage_retries,
            self.settings.pipeline.retry_base_ms,
        );
        let media = retry_transient(&retry, "resolve source", || {
            adapter.resolve(&video.locator)
        })
        .await?;

        self.store.update_video_metadata(video.id, &media)?;

        if let Some(duration) = media.duration_seconds {
            let limit = self.settings.sources.max_duration_seconds;
            if duration > limit {
                return Err(PensumError::InvalidInput(format!(
                    "duration {}s exceeds the {}s limit",
                    duration, limit
                )));
            }
        }

        self.extractor.extract(video.id, &media).await
    }

    /// Chunk the stored transcript, replacing any previous chunk set.
    async fn chunk(&self, video_id: Uuid) -> Result<usize> {
        let transcript = self.store.get_transcript(video_id)?.ok_or_else(|| {
            PensumError::NoTranscriptAvailable(format!("no stored transcript for {}", video_id))
        })?;

        let content = chunk_transcript(&transcript, &self.settings.chunking);
        let chunks: Vec<Chunk> = content
            .into_iter()
            .map(|c| Chunk::from_content(video_id, c))
            .collect();

        self.store.replace_chunks(video_id, &chunks)
    }

    /// Embed all of a video's chunks and attach the vectors.
    async fn embed(&self, video_id: Uuid) -> Result<usize> {
        let chunks = self.store.chunks_for_video(video_id)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors =
            embed_in_batches(self.embedder.clone(), &texts, &self.settings.embedding).await?;

        let pairs: Vec<(Uuid, Vec<f32>)> = chunks.iter().map(|c| c.id).zip(vectors).collect();
        self.store.attach_embeddings(video_id, &pairs)?;
        Ok(pairs.len())
    }

    /// Re-enter the pipeline for a settled video.
    ///
    /// Resumes at `chunking` when a transcript survived (transcription is
    /// the slow, paid stage) and at `transcribing` otherwise. Chunks are
    /// rebuilt with delete-then-recreate, so running this twice on an
    /// unchanged transcript yields the same chunk set.
    #[instrument(skip(self))]
    pub async fn reprocess(&self, video_id: Uuid) -> Result<Video> {
        let video = self.require_video(video_id)?;

        let target = if self.store.get_transcript(video_id)?.is_some() {
            ProcessingStatus::Chunking
        } else {
            ProcessingStatus::Transcribing
        };

        match video.status {
            ProcessingStatus::Failed => {
                self.store
                    .advance_status(video_id, ProcessingStatus::Failed, target)?;
            }
            ProcessingStatus::Completed => {
                self.store.reset_for_reprocess(video_id, target)?;
            }
            other => {
                return Err(PensumError::InvalidInput(format!(
                    "video {} is {}; reprocess applies to failed or completed videos",
                    video_id, other
                )));
            }
        }

        info!("Re-entering pipeline for {} at {}", video_id, target);
        self.process(video_id).await
    }

    /// Re-enter every failed video, optionally sweeping stuck ones first.
    ///
    /// With `include_stale`, videos stalled in a non-terminal status past
    /// the staleness threshold are marked failed (the reason names the
    /// stalled stage) and re-entered with the rest. Each video runs at most
    /// once per invocation.
    #[instrument(skip(self))]
    pub async fn reprocess_batch(&self, include_stale: bool) -> Result<Vec<BatchOutcome>> {
        let mut targets = self.store.list_failed(None)?;

        if include_stale {
            let cutoff =
                Utc::now() - chrono::Duration::seconds(self.settings.pipeline.stale_after_secs);
            for video in self.store.list_stale(cutoff)? {
                let reason = format!("Stalled in {} with no progress", video.status);
                warn!("Video {}: {}", video.id, reason);
                if self.store.mark_failed(video.id, &reason)? {
                    targets.push(video);
                }
            }
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        for video in targets {
            let result = self.reprocess(video.id).await;
            let (status, title) = match self.store.get_video(video.id)? {
                Some(v) => (v.status, v.title),
                None => (ProcessingStatus::Failed, video.title.clone()),
            };
            outcomes.push(BatchOutcome {
                video_id: video.id,
                title,
                status,
                error: result.err().map(|e| e.to_string()),
            });
        }

        info!("Batch reprocess covered {} videos", outcomes.len());
        Ok(outcomes)
    }

    fn require_video(&self, video_id: Uuid) -> Result<Video> {
        self.store
            .get_video(video_id)?
            .ok_or_else(|| PensumError::VideoNotFound(video_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceAdapter;
    use crate::transcripts::{TierOutput, TranscriptSegment, TranscriptSource, TranscriptTier};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAdapter {
        media: RawMedia,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn kind(&self) -> SourceKind {
            self.media.kind
        }

        fn parse_reference(&self, input: &str) -> Option<String> {
            Some(input.to_string())
        }

        async fn resolve(&self, _locator: &str) -> Result<RawMedia> {
            Ok(self.media.clone())
        }
    }

    struct DeletedAdapter;

    #[async_trait]
    impl SourceAdapter for DeletedAdapter {
        fn kind(&self) -> SourceKind {
            SourceKind::YouTube
        }

        fn parse_reference(&self, input: &str) -> Option<String> {
            Some(input.to_string())
        }

        async fn resolve(&self, locator: &str) -> Result<RawMedia> {
            Err(PensumError::SourceUnavailable(format!(
                "video {} has been removed by the uploader",
                locator
            )))
        }
    }

    struct FixedSegments {
        segments: Vec<TranscriptSegment>,
        calls: AtomicUsize,
    }

    impl FixedSegments {
        fn new(segments: Vec<TranscriptSegment>) -> Self {
            Self {
                segments,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TranscriptSource for FixedSegments {
        fn tier(&self) -> TranscriptTier {
            TranscriptTier::NativeCaptions
        }

        async fn fetch(&self, _media: &RawMedia) -> Result<TierOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TierOutput {
                language: Some("en".to_string()),
                segments: self.segments.clone(),
            })
        }
    }

    struct SlowTier;

    #[async_trait]
    impl TranscriptSource for SlowTier {
        fn tier(&self) -> TranscriptTier {
            TranscriptTier::NativeCaptions
        }

        async fn fetch(&self, _media: &RawMedia) -> Result<TierOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TierOutput {
                language: None,
                segments: Vec::new(),
            })
        }
    }

    struct CountingEmbedder {
        dimensions: usize,
        rate_limit_budget: AtomicUsize,
        always_fails: bool,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new(dimensions: usize) -> Self {
            Self {
                dimensions,
                rate_limit_budget: AtomicUsize::new(0),
                always_fails: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn rate_limited(dimensions: usize, failures: usize) -> Self {
            Self {
                rate_limit_budget: AtomicUsize::new(failures),
                ..Self::new(dimensions)
            }
        }

        fn failing(dimensions: usize) -> Self {
            Self {
                always_fails: true,
                ..Self::new(dimensions)
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.always_fails {
                return Err(PensumError::ProviderError {
                    message: "model deprecated".to_string(),
                    transient: false,
                });
            }
            if self.rate_limit_budget.load(Ordering::SeqCst) > 0 {
                self.rate_limit_budget.fetch_sub(1, Ordering::SeqCst);
                return Err(PensumError::RateLimited("embeddings".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.25; self.dimensions]).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            let mut batch = self.embed_batch(&[text.to_string()]).await?;
            Ok(batch.remove(0))
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.pipeline.retry_base_ms = 1;
        settings.embedding.retry_base_ms = 1;
        settings.transcripts.retry_base_ms = 1;
        settings
    }

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn pipeline_with(
        store: Arc<SqliteStore>,
        media: RawMedia,
        tier: Arc<FixedSegments>,
        embedder: Arc<CountingEmbedder>,
    ) -> Pipeline {
        let registry = SourceRegistry::with_adapters(vec![Arc::new(StaticAdapter { media })]);
        let extractor = TranscriptExtractor::with_tiers(vec![tier], RetryPolicy::new(3, 1));
        Pipeline::with_components(test_settings(), store, registry, extractor, embedder)
    }

    fn upload_request(reference: &str) -> IngestRequest {
        IngestRequest {
            creator_id: "creator-1".to_string(),
            course_id: None,
            kind: Some(SourceKind::Upload),
            reference: reference.to_string(),
        }
    }

    #[tokio::test]
    async fn test_short_transcript_yields_single_embedded_chunk() {
        // Three segments totalling 450 words, well under the chunk target
        let segments = vec![
            TranscriptSegment::new(0.0, 90.0, words(150)),
            TranscriptSegment::new(90.0, 90.0, words(150)),
            TranscriptSegment::new(180.0, 90.0, words(150)),
        ];
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let embedder = Arc::new(CountingEmbedder::new(8));
        let pipeline = pipeline_with(
            store.clone(),
            RawMedia::for_tests("Short Lecture"),
            Arc::new(FixedSegments::new(segments)),
            embedder.clone(),
        );

        let video = pipeline.ingest(&upload_request("/tmp/short_lecture.mp4")).unwrap();
        assert_eq!(video.status, ProcessingStatus::Pending);

        let done = pipeline.process(video.id).await.unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(done.title, "Short Lecture");
        assert!(done.error.is_none());

        let chunks = store.chunks_for_video(video.id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 450);
        assert!(chunks[0].embedding.is_some());

        // Processing a completed video again is a no-op
        pipeline.process(video.id).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deleted_source_fails_without_derived_rows() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = SourceRegistry::with_adapters(vec![Arc::new(DeletedAdapter)]);
        let extractor = TranscriptExtractor::with_tiers(Vec::new(), RetryPolicy::new(3, 1));
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder::new(8));
        let pipeline = Pipeline::with_components(
            test_settings(),
            store.clone(),
            registry,
            extractor,
            embedder,
        );

        let video = pipeline
            .ingest(&IngestRequest {
                creator_id: "creator-1".to_string(),
                course_id: None,
                kind: Some(SourceKind::YouTube),
                reference: "dQw4w9WgXcQ".to_string(),
            })
            .unwrap();

        let err = pipeline.process(video.id).await.unwrap_err();
        assert!(matches!(err, PensumError::SourceUnavailable(_)));

        let loaded = store.get_video(video.id).unwrap().unwrap();
        assert_eq!(loaded.status, ProcessingStatus::Failed);
        assert!(loaded.error.unwrap().contains("removed"));
        assert!(store.get_transcript(video.id).unwrap().is_none());
        assert_eq!(store.chunk_count(video.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_embedding_retries_to_completion() {
        let segments = vec![TranscriptSegment::new(0.0, 120.0, words(300))];
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let embedder = Arc::new(CountingEmbedder::rate_limited(8, 1));
        let pipeline = pipeline_with(
            store.clone(),
            RawMedia::for_tests("Retry Lecture"),
            Arc::new(FixedSegments::new(segments)),
            embedder.clone(),
        );

        let video = pipeline.ingest(&upload_request("/tmp/retry_lecture.mp4")).unwrap();
        let done = pipeline.process(video.id).await.unwrap();

        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        // The retried batch did not duplicate any chunks
        let chunks = store.chunks_for_video(video.id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].embedding.is_some());
    }

    #[tokio::test]
    async fn test_terminal_embedding_error_fails_video_keeping_transcript() {
        let segments = vec![TranscriptSegment::new(0.0, 60.0, words(200))];
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let embedder = Arc::new(CountingEmbedder::failing(8));
        let pipeline = pipeline_with(
            store.clone(),
            RawMedia::for_tests("Doomed Lecture"),
            Arc::new(FixedSegments::new(segments.clone())),
            embedder.clone(),
        );

        let video = pipeline.ingest(&upload_request("/tmp/doomed_lecture.mp4")).unwrap();
        let err = pipeline.process(video.id).await.unwrap_err();
        assert!(matches!(err, PensumError::ProviderError { transient: false, .. }));

        // A terminal provider error is not retried
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let failed = store.get_video(video.id).unwrap().unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert!(store.get_transcript(video.id).unwrap().is_some());

        // Reprocess re-enters at chunking: the transcript tier is not called again
        let tier = Arc::new(FixedSegments::new(segments));
        let recovered = pipeline_with(
            store.clone(),
            RawMedia::for_tests("Doomed Lecture"),
            tier.clone(),
            Arc::new(CountingEmbedder::new(8)),
        );
        let done = recovered.reprocess(video.id).await.unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(tier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reprocess_rebuilds_identical_chunks() {
        // 1200 words across twelve segments, enough for two chunks
        let segments: Vec<TranscriptSegment> = (0..12)
            .map(|i| TranscriptSegment::new(i as f64 * 30.0, 30.0, words(100)))
            .collect();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = pipeline_with(
            store.clone(),
            RawMedia::for_tests("Long Lecture"),
            Arc::new(FixedSegments::new(segments)),
            Arc::new(CountingEmbedder::new(8)),
        );

        let video = pipeline.ingest(&upload_request("/tmp/long_lecture.mp4")).unwrap();
        pipeline.process(video.id).await.unwrap();

        let before: Vec<(i64, String)> = store
            .chunks_for_video(video.id)
            .unwrap()
            .into_iter()
            .map(|c| (c.ordinal, c.text))
            .collect();
        assert!(before.len() > 1);

        let done = pipeline.reprocess(video.id).await.unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);

        let after: Vec<(i64, String)> = store
            .chunks_for_video(video.id)
            .unwrap()
            .into_iter()
            .map(|c| (c.ordinal, c.text))
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_marks_video_failed() {
        let mut settings = test_settings();
        settings.pipeline.transcribe_timeout_secs = 5;

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = SourceRegistry::with_adapters(vec![Arc::new(StaticAdapter {
            media: RawMedia::for_tests("Stuck Lecture"),
        })]);
        let extractor =
            TranscriptExtractor::with_tiers(vec![Arc::new(SlowTier)], RetryPolicy::new(1, 1));
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder::new(8));
        let pipeline =
            Pipeline::with_components(settings, store.clone(), registry, extractor, embedder);

        let video = pipeline.ingest(&upload_request("/tmp/stuck_lecture.mp4")).unwrap();
        let err = pipeline.process(video.id).await.unwrap_err();
        assert!(matches!(err, PensumError::PipelineTimeout { .. }));

        let failed = store.get_video(video.id).unwrap().unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert!(failed.error.unwrap().contains("transcribing"));
    }

    #[test]
    fn test_ingest_is_idempotent_per_source() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = pipeline_with(
            store.clone(),
            RawMedia::for_tests("Repeat Lecture"),
            Arc::new(FixedSegments::new(Vec::new())),
            Arc::new(CountingEmbedder::new(8)),
        );

        let first = pipeline.ingest(&upload_request("/tmp/repeat_lecture.mp4")).unwrap();
        let second = pipeline.ingest(&upload_request("/tmp/repeat_lecture.mp4")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_videos(Some("creator-1")).unwrap().len(), 1);
    }

    #[test]
    fn test_ingest_rejects_unknown_reference() {
        let settings = test_settings();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = SourceRegistry::new(&settings);
        let extractor = TranscriptExtractor::with_tiers(Vec::new(), RetryPolicy::new(1, 1));
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder::new(8));
        let pipeline = Pipeline::with_components(settings, store, registry, extractor, embedder);

        let result = pipeline.ingest(&IngestRequest {
            creator_id: "creator-1".to_string(),
            course_id: None,
            kind: None,
            reference: "not a video reference at all???".to_string(),
        });
        assert!(matches!(result, Err(PensumError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn test_batch_reprocess_covers_failed_and_stale() {
        let mut settings = test_settings();
        // Negative threshold puts the staleness cutoff in the future
        settings.pipeline.stale_after_secs = -5;

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = SourceRegistry::with_adapters(vec![Arc::new(StaticAdapter {
            media: RawMedia::for_tests("Batch Lecture"),
        })]);
        let tier = Arc::new(FixedSegments::new(vec![TranscriptSegment::new(
            0.0,
            60.0,
            words(120),
        )]));
        let extractor = TranscriptExtractor::with_tiers(vec![tier], RetryPolicy::new(3, 1));
        let pipeline = Pipeline::with_components(
            settings,
            store.clone(),
            registry,
            extractor,
            Arc::new(CountingEmbedder::new(8)),
        );

        let failed = pipeline.ingest(&upload_request("/tmp/failed_lecture.mp4")).unwrap();
        store.mark_failed(failed.id, "network down").unwrap();

        let stuck = pipeline.ingest(&upload_request("/tmp/stuck_lecture.mp4")).unwrap();
        store
            .advance_status(
                stuck.id,
                ProcessingStatus::Pending,
                ProcessingStatus::Transcribing,
            )
            .unwrap();

        let outcomes = pipeline.reprocess_batch(true).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.status == ProcessingStatus::Completed && o.error.is_none()));

        for id in [failed.id, stuck.id] {
            let video = store.get_video(id).unwrap().unwrap();
            assert_eq!(video.status, ProcessingStatus::Completed);
            assert!(video.error.is_none());
        }
    }
}
