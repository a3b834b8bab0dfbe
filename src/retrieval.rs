//! Ranked retrieval over the embedded chunk index.
//!
//! Similarity from the store is blended with recency and popularity boosts,
//! overlapping passages from the same video are collapsed, and identical
//! (query, scope) lookups are served from a short-lived cache without
//! re-embedding the query.

use crate::config::RetrievalSettings;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::sources::{timestamp_url, SourceKind};
use crate::store::{Citation, ScopeFilter, SearchHit, SqliteStore};
use crate::transcripts::format_timestamp;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};
use uuid::Uuid;

/// One retrieval result after ranking.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub video_id: Uuid,
    pub video_title: String,
    pub kind: SourceKind,
    pub locator: String,
    pub ordinal: i64,
    pub text: String,
    pub start_seconds: f64,
    /// Raw cosine similarity to the query.
    pub similarity: f32,
    /// Composite score that ordered this result.
    pub score: f64,
}

impl RankedChunk {
    /// Formatted start timestamp, e.g. "02:34".
    pub fn timestamp(&self) -> String {
        format_timestamp(self.start_seconds)
    }

    /// Playable URL at the cited moment, for sources that support one.
    pub fn url(&self) -> Option<String> {
        timestamp_url(self.kind, &self.locator, self.start_seconds)
    }

    /// Citation record for persisting alongside an answer.
    pub fn citation(&self) -> Citation {
        Citation {
            video_id: self.video_id,
            video_title: self.video_title.clone(),
            ordinal: self.ordinal,
            timestamp_seconds: self.start_seconds,
            relevance_score: self.score,
            snippet: snippet(&self.text, 160),
        }
    }
}

/// Leading words of `text`, cut at a word boundary near `max_chars`.
fn snippet(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }

    let mut out = String::new();
    for word in text.split_whitespace() {
        if out.len() + word.len() + 1 > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str("...");
    out
}

struct CachedResults {
    created: Instant,
    results: Vec<RankedChunk>,
}

/// Scoped, cached retrieval with composite ranking.
pub struct Retriever {
    store: Arc<SqliteStore>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
    cache: Mutex<HashMap<String, CachedResults>>,
}

impl Retriever {
    pub fn new(
        store: Arc<SqliteStore>,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Top results for a query within a scope.
    ///
    /// Fetches `overfetch_multiplier × top_k` candidates by similarity, then
    /// re-ranks with recency and popularity boosts before truncating.
    pub async fn search(&self, query: &str, filter: &ScopeFilter) -> Result<Vec<RankedChunk>> {
        let (results, _) = self.search_with_usage(query, filter).await?;
        Ok(results)
    }

    /// Like [`search`](Self::search), also reporting the embedding calls the
    /// lookup spent. A cache hit spends none.
    #[instrument(skip(self, query), fields(scope = %filter.cache_key()))]
    pub async fn search_with_usage(
        &self,
        query: &str,
        filter: &ScopeFilter,
    ) -> Result<(Vec<RankedChunk>, u32)> {
        let key = format!("{}|{}", filter.cache_key(), query);

        if let Some(cached) = self.cache_get(&key) {
            debug!("Serving retrieval from cache");
            return Ok((cached, 0));
        }

        let vector = self.embedder.embed_query(query).await?;
        let candidates = self.store.search_chunks(
            &vector,
            filter,
            self.settings.top_k * self.settings.overfetch_multiplier,
        )?;
        let ranked = self.rank(candidates);

        debug!("Ranked {} results", ranked.len());
        self.cache_put(key, &ranked);
        Ok((ranked, 1))
    }

    fn rank(&self, candidates: Vec<SearchHit>) -> Vec<RankedChunk> {
        let now = Utc::now();
        let mut scored: Vec<RankedChunk> = candidates
            .into_iter()
            .map(|hit| self.score(hit, now))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Neighboring chunks of one video share their overlap window; keep
        // only the best of each neighborhood
        let mut kept: Vec<RankedChunk> = Vec::with_capacity(self.settings.top_k);
        for candidate in scored {
            if kept.len() >= self.settings.top_k {
                break;
            }
            let duplicate = kept.iter().any(|k| {
                k.video_id == candidate.video_id && (k.ordinal - candidate.ordinal).abs() <= 1
            });
            if !duplicate {
                kept.push(candidate);
            }
        }
        kept
    }

    fn score(&self, hit: SearchHit, now: DateTime<Utc>) -> RankedChunk {
        let w = &self.settings;

        let recency = hit
            .published_at
            .map(|at| {
                let age_days = (now - at).num_seconds().max(0) as f64 / 86_400.0;
                0.5_f64.powf(age_days / w.recency_half_life_days)
            })
            .unwrap_or(1.0);
        let refs = hit.reference_count.max(0) as f64;
        let popularity = refs / (refs + 10.0);

        let score = hit.similarity as f64 * w.similarity_weight
            + recency * w.recency_weight
            + popularity * w.popularity_weight;

        RankedChunk {
            video_id: hit.chunk.video_id,
            video_title: hit.video_title,
            kind: hit.kind,
            locator: hit.locator,
            ordinal: hit.chunk.ordinal,
            text: hit.chunk.text,
            start_seconds: hit.chunk.start_seconds,
            similarity: hit.similarity,
            score,
        }
    }

    fn cache_get(&self, key: &str) -> Option<Vec<RankedChunk>> {
        let ttl = Duration::from_secs(self.settings.cache_ttl_secs);
        let mut cache = self.cache.lock().ok()?;
        match cache.get(key) {
            Some(entry) if entry.created.elapsed() < ttl => Some(entry.results.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, key: String, results: &[RankedChunk]) {
        let ttl = Duration::from_secs(self.settings.cache_ttl_secs);
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|_, entry| entry.created.elapsed() < ttl);
            cache.insert(
                key,
                CachedResults {
                    created: Instant::now(),
                    results: results.to_vec(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RawMedia;
    use crate::store::{Chunk, Video};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn seed_video(store: &SqliteStore, creator: &str, title: &str) -> Video {
        let mut video = Video::from_media(creator, None, &RawMedia::for_tests(title));
        video.published_at = Some(Utc::now());
        store.insert_video(&video).unwrap();
        video
    }

    fn seed_chunks(store: &SqliteStore, video_id: Uuid, specs: &[(i64, &str, [f32; 2])]) {
        let chunks: Vec<Chunk> = specs
            .iter()
            .map(|(ordinal, text, _)| Chunk {
                id: Uuid::new_v4(),
                video_id,
                ordinal: *ordinal,
                text: text.to_string(),
                start_seconds: *ordinal as f64 * 60.0,
                end_seconds: (*ordinal + 1) as f64 * 60.0,
                word_count: text.split_whitespace().count() as i64,
                embedding: None,
            })
            .collect();
        store.replace_chunks(video_id, &chunks).unwrap();

        let vectors: Vec<(Uuid, Vec<f32>)> = chunks
            .iter()
            .zip(specs)
            .map(|(chunk, (_, _, vector))| (chunk.id, vector.to_vec()))
            .collect();
        store.attach_embeddings(video_id, &vectors).unwrap();
    }

    fn retriever(store: Arc<SqliteStore>, embedder: Arc<AxisEmbedder>) -> Retriever {
        Retriever::new(store, embedder, RetrievalSettings::default())
    }

    #[tokio::test]
    async fn test_search_stays_inside_creator_scope() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mine = seed_video(&store, "creator-1", "Mine");
        let theirs = seed_video(&store, "creator-2", "Theirs");
        seed_chunks(&store, mine.id, &[(0, "ownership basics", [1.0, 0.0])]);
        seed_chunks(&store, theirs.id, &[(0, "ownership basics", [1.0, 0.0])]);

        let retriever = retriever(store, Arc::new(AxisEmbedder::default()));
        let results = retriever
            .search("ownership", &ScopeFilter::creator("creator-1"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].video_id, mine.id);
    }

    #[tokio::test]
    async fn test_results_sorted_by_non_increasing_score() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let video = seed_video(&store, "creator-1", "Lecture");
        seed_chunks(
            &store,
            video.id,
            &[
                (0, "exact match", [1.0, 0.0]),
                (2, "partial match", [0.8, 0.6]),
                (4, "unrelated", [0.0, 1.0]),
            ],
        );

        let retriever = retriever(store, Arc::new(AxisEmbedder::default()));
        let results = retriever
            .search("query", &ScopeFilter::creator("creator-1"))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[0].ordinal, 0);
        assert_eq!(results[2].ordinal, 4);
    }

    #[tokio::test]
    async fn test_adjacent_chunks_collapse_to_best() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let video = seed_video(&store, "creator-1", "Lecture");
        seed_chunks(
            &store,
            video.id,
            &[
                (3, "the key explanation", [1.0, 0.0]),
                (4, "tail of the key explanation", [0.8, 0.6]),
                (9, "a different part", [0.6, 0.8]),
            ],
        );

        let retriever = retriever(store, Arc::new(AxisEmbedder::default()));
        let results = retriever
            .search("key explanation", &ScopeFilter::creator("creator-1"))
            .await
            .unwrap();

        // Ordinal 4 shares its overlap window with the stronger ordinal 3
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ordinal, 3);
        assert_eq!(results[1].ordinal, 9);
    }

    #[tokio::test]
    async fn test_repeat_query_served_from_cache() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let video = seed_video(&store, "creator-1", "Lecture");
        seed_chunks(&store, video.id, &[(0, "content", [1.0, 0.0])]);

        let embedder = Arc::new(AxisEmbedder::default());
        let retriever = retriever(store, embedder.clone());
        let scope = ScopeFilter::creator("creator-1");

        let (first, spent) = retriever
            .search_with_usage("what is ownership", &scope)
            .await
            .unwrap();
        assert_eq!(spent, 1);

        let (second, spent) = retriever
            .search_with_usage("what is ownership", &scope)
            .await
            .unwrap();
        assert_eq!(spent, 0);
        assert_eq!(first.len(), second.len());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        // A different scope is a different cache entry
        retriever
            .search("what is ownership", &ScopeFilter::course("creator-1", "rust-101"))
            .await
            .unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let video = seed_video(&store, "creator-1", "Lecture");
        seed_chunks(&store, video.id, &[(0, "content", [1.0, 0.0])]);

        let embedder = Arc::new(AxisEmbedder::default());
        let mut settings = RetrievalSettings::default();
        settings.cache_ttl_secs = 0;
        let retriever = Retriever::new(store, embedder.clone(), settings);
        let scope = ScopeFilter::creator("creator-1");

        retriever.search("q", &scope).await.unwrap();
        retriever.search("q", &scope).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_popularity_breaks_similarity_ties() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let popular = seed_video(&store, "creator-1", "Popular");
        let obscure = seed_video(&store, "creator-1", "Obscure");
        store.increment_reference_counts(&vec![popular.id; 50]).unwrap();

        seed_chunks(&store, popular.id, &[(0, "same content", [1.0, 0.0])]);
        seed_chunks(&store, obscure.id, &[(0, "same content", [1.0, 0.0])]);

        let retriever = retriever(store, Arc::new(AxisEmbedder::default()));
        let results = retriever
            .search("content", &ScopeFilter::creator("creator-1"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].video_id, popular.id);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_recency_breaks_similarity_ties() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let mut fresh = Video::from_media("creator-1", None, &RawMedia::for_tests("Fresh"));
        fresh.published_at = Some(Utc::now());
        store.insert_video(&fresh).unwrap();

        let mut old = Video::from_media("creator-1", None, &RawMedia::for_tests("Old"));
        old.published_at = Some(Utc::now() - chrono::Duration::days(900));
        store.insert_video(&old).unwrap();

        seed_chunks(&store, fresh.id, &[(0, "same content", [1.0, 0.0])]);
        seed_chunks(&store, old.id, &[(0, "same content", [1.0, 0.0])]);

        let retriever = retriever(store, Arc::new(AxisEmbedder::default()));
        let results = retriever
            .search("content", &ScopeFilter::creator("creator-1"))
            .await
            .unwrap();

        assert_eq!(results[0].video_id, fresh.id);
    }

    #[tokio::test]
    async fn test_citation_carries_timestamp_and_snippet() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut video = Video::from_media("creator-1", None, &RawMedia::for_tests("Cited"));
        video.kind = SourceKind::YouTube;
        video.locator = "dQw4w9WgXcQ".to_string();
        store.insert_video(&video).unwrap();
        seed_chunks(&store, video.id, &[(2, "a lengthy passage worth citing", [1.0, 0.0])]);

        let retriever = retriever(store, Arc::new(AxisEmbedder::default()));
        let results = retriever
            .search("passage", &ScopeFilter::creator("creator-1"))
            .await
            .unwrap();

        let citation = results[0].citation();
        assert_eq!(citation.video_id, video.id);
        assert_eq!(citation.ordinal, 2);
        assert_eq!(citation.timestamp_seconds, 120.0);
        assert_eq!(citation.snippet, "a lengthy passage worth citing");
        assert_eq!(
            results[0].url().unwrap(),
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=120s"
        );
    }

    #[test]
    fn test_snippet_cuts_at_word_boundary() {
        let text = "one two three four five six seven eight nine ten";
        let cut = snippet(text, 20);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 24);
        assert!(text.starts_with(cut.trim_end_matches("...")));
        assert_eq!(snippet("short", 20), "short");
    }
}
