//! Word-count chunking of transcripts into searchable segments.
//!
//! Chunking is a pure function over a transcript. Segments are atomic
//! (they carry timing and are never split), chunks break at the segment
//! boundary nearest the target word count, and each chunk re-includes the
//! trailing words of its predecessor so context survives the boundary.

use crate::config::ChunkingSettings;
use crate::transcripts::{format_timestamp, Transcript, TranscriptSegment};
use serde::{Deserialize, Serialize};

/// A chunk of content from a video transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Order of this chunk in the video, starting at zero.
    pub ordinal: i64,
    /// Text content of this chunk.
    pub text: String,
    /// Start time in seconds, from the first included segment.
    pub start_seconds: f64,
    /// End time in seconds, from the last included segment.
    pub end_seconds: f64,
    /// Number of words in `text`.
    pub word_count: usize,
}

impl ContentChunk {
    /// Duration of this chunk in seconds.
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    /// Format the chunk's start time for display.
    pub fn timestamp(&self) -> String {
        format_timestamp(self.start_seconds)
    }
}

/// Split a transcript into overlapping chunks.
///
/// Accumulates segments until the target word count is in reach, then breaks
/// at whichever segment boundary lands nearest the target. The next chunk is
/// seeded with the trailing segments of the previous one, up to roughly
/// `overlap_words`. A transcript shorter than the target yields one chunk; a
/// single oversized segment is kept whole.
pub fn chunk_transcript(transcript: &Transcript, settings: &ChunkingSettings) -> Vec<ContentChunk> {
    let segments = &transcript.segments;
    if segments.is_empty() {
        return Vec::new();
    }

    let target = settings.target_words.max(1);

    let mut chunks: Vec<ContentChunk> = Vec::new();
    let mut current: Vec<&TranscriptSegment> = Vec::new();
    let mut current_words = 0usize;
    // Words in `current` re-included from the previous chunk's tail
    let mut carried = 0usize;

    let mut i = 0;
    while i < segments.len() {
        let segment = &segments[i];
        let segment_words = segment.word_count();
        let with_segment = current_words + segment_words;

        // Close the chunk once the target is reachable and the chunk holds
        // material beyond the carried overlap
        if with_segment >= target && current_words > carried {
            let overshoot = with_segment - target;
            let undershoot = target - current_words.min(target);
            if overshoot <= undershoot {
                current.push(segment);
                current_words = with_segment;
                i += 1;
            }

            chunks.push(build_chunk(chunks.len() as i64, &current));

            let (tail, tail_words) = trailing_overlap(&current, settings.overlap_words);
            current = tail;
            carried = tail_words;
            current_words = tail_words;
            continue;
        }

        current.push(segment);
        current_words = with_segment;
        i += 1;
    }

    // Whatever remains is a final chunk, unless it is overlap alone
    if current_words > carried || chunks.is_empty() {
        chunks.push(build_chunk(chunks.len() as i64, &current));
    }

    chunks
}

fn build_chunk(ordinal: i64, segments: &[&TranscriptSegment]) -> ContentChunk {
    let text = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let start_seconds = segments.first().map(|s| s.start_seconds).unwrap_or(0.0);
    let end_seconds = segments
        .last()
        .map(|s| s.end_seconds())
        .unwrap_or(start_seconds);
    let word_count = text.split_whitespace().count();

    ContentChunk {
        ordinal,
        text,
        start_seconds,
        end_seconds,
        word_count,
    }
}

/// Select a strict suffix of the chunk's segments totalling roughly
/// `overlap_words`. Single-segment chunks carry no overlap.
fn trailing_overlap<'a>(
    segments: &[&'a TranscriptSegment],
    overlap_words: usize,
) -> (Vec<&'a TranscriptSegment>, usize) {
    if overlap_words == 0 || segments.len() < 2 {
        return (Vec::new(), 0);
    }

    let mut words = 0usize;
    let mut start = segments.len();
    while start > 1 && words < overlap_words {
        start -= 1;
        words += segments[start].word_count();
    }

    (segments[start..].to_vec(), words)
}
