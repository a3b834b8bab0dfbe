//! Prompt assembly under a fixed token budget.
//!
//! Ranked chunks are folded into the system prompt as numbered excerpts.
//! A chunk is included whole or not at all; partial excerpts would cut
//! sentences mid-thought and break citation offsets.

use crate::config::ChatSettings;
use crate::retrieval::RankedChunk;
use crate::store::{ChatMessage, Citation};

const SYSTEM_PREAMBLE: &str = "You are a teaching assistant answering a student's questions \
about a creator's video library. Ground every answer in the numbered excerpts below and cite \
the excerpts you draw on, like [1] or [2]. If the excerpts do not cover the question, say so \
plainly instead of guessing.";

/// A fully assembled prompt: system text with embedded excerpts, the
/// trailing slice of conversation history, and the citations for every
/// excerpt that made the cut.
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub included: Vec<Citation>,
}

/// Assembles prompts from ranked retrieval results and session history.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    token_budget: usize,
    history_pairs: usize,
}

impl ContextBuilder {
    pub fn new(settings: &ChatSettings) -> Self {
        Self {
            token_budget: settings.context_token_budget,
            history_pairs: settings.history_pairs,
        }
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_history_pairs(mut self, pairs: usize) -> Self {
        self.history_pairs = pairs;
        self
    }

    /// Fold chunks into the prompt in ranking order until the budget runs
    /// out, then attach the most recent history pairs.
    ///
    /// An oversized chunk is skipped rather than truncated; smaller chunks
    /// further down the ranking may still fit, so scanning continues.
    pub fn build(&self, chunks: &[RankedChunk], history: &[ChatMessage]) -> BuiltContext {
        let mut remaining = self
            .token_budget
            .saturating_sub(estimate_tokens(SYSTEM_PREAMBLE));
        let mut sections: Vec<String> = Vec::new();
        let mut included: Vec<Citation> = Vec::new();

        for chunk in chunks {
            let block = excerpt_block(included.len() + 1, chunk);
            let cost = estimate_tokens(&block);
            if cost > remaining {
                continue;
            }
            remaining -= cost;
            sections.push(block);
            included.push(chunk.citation());
        }

        let system_prompt = if sections.is_empty() {
            format!(
                "{}\n\nNo excerpts matched this question; tell the student you could not find \
                 relevant content in the library.",
                SYSTEM_PREAMBLE
            )
        } else {
            format!("{}\n\nExcerpts:\n\n{}", SYSTEM_PREAMBLE, sections.join("\n\n"))
        };

        let keep = self.history_pairs * 2;
        let start = history.len().saturating_sub(keep);

        BuiltContext {
            system_prompt,
            history: history[start..].to_vec(),
            included,
        }
    }
}

fn excerpt_block(index: usize, chunk: &RankedChunk) -> String {
    format!(
        "---\n[{}] {} @ {}\n{}\n---",
        index,
        chunk.video_title,
        chunk.timestamp(),
        chunk.text
    )
}

/// Rough token count at four characters per token, rounded up.
fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;
    use uuid::Uuid;

    fn ranked(title: &str, ordinal: i64, text: &str) -> RankedChunk {
        RankedChunk {
            video_id: Uuid::new_v4(),
            video_title: title.to_string(),
            kind: SourceKind::Upload,
            locator: format!("/media/{}.mp4", ordinal),
            ordinal,
            text: text.to_string(),
            start_seconds: ordinal as f64 * 60.0,
            similarity: 0.9,
            score: 0.9,
        }
    }

    fn builder() -> ContextBuilder {
        ContextBuilder::new(&ChatSettings::default())
    }

    #[test]
    fn test_prompt_carries_numbered_excerpts() {
        let chunks = vec![
            ranked("Intro to Ownership", 1, "Ownership moves values."),
            ranked("Borrowing Basics", 2, "References borrow without moving."),
        ];
        let built = builder().build(&chunks, &[]);

        assert!(built.system_prompt.contains("[1] Intro to Ownership @ 01:00"));
        assert!(built.system_prompt.contains("[2] Borrowing Basics @ 02:00"));
        assert!(built.system_prompt.contains("Ownership moves values."));
        assert_eq!(built.included.len(), 2);
        assert_eq!(built.included[0].ordinal, 1);
    }

    #[test]
    fn test_budget_keeps_whole_chunks_only() {
        let big = "word ".repeat(200);
        let chunks = vec![ranked("First", 0, &big), ranked("Second", 1, &big)];

        // Preamble plus one block fits, two blocks do not.
        let budget = estimate_tokens(SYSTEM_PREAMBLE) + estimate_tokens(&big) + 40;
        let built = builder().with_token_budget(budget).build(&chunks, &[]);

        assert_eq!(built.included.len(), 1);
        assert_eq!(built.included[0].video_title, "First");
        assert!(!built.system_prompt.contains("Second"));
    }

    #[test]
    fn test_oversized_chunk_skipped_for_smaller_one() {
        let huge = "word ".repeat(2000);
        let chunks = vec![
            ranked("Too Big", 0, &huge),
            ranked("Fits Fine", 1, "short answer"),
        ];
        let budget = estimate_tokens(SYSTEM_PREAMBLE) + 100;
        let built = builder().with_token_budget(budget).build(&chunks, &[]);

        assert_eq!(built.included.len(), 1);
        assert_eq!(built.included[0].video_title, "Fits Fine");
        // The survivor is renumbered from one.
        assert!(built.system_prompt.contains("[1] Fits Fine"));
    }

    #[test]
    fn test_history_trimmed_to_recent_pairs() {
        let session_id = Uuid::new_v4();
        let mut history = Vec::new();
        for i in 0..7 {
            history.push(ChatMessage::user(session_id, &format!("question {}", i)));
            history.push(ChatMessage::assistant(
                session_id,
                &format!("answer {}", i),
                Vec::new(),
            ));
        }

        let built = builder().with_history_pairs(5).build(&[], &history);

        assert_eq!(built.history.len(), 10);
        assert_eq!(built.history[0].content, "question 2");
        assert_eq!(built.history[9].content, "answer 6");
    }

    #[test]
    fn test_empty_retrieval_notes_missing_excerpts() {
        let built = builder().build(&[], &[]);
        assert!(built.included.is_empty());
        assert!(built.system_prompt.contains("could not find"));
    }
}
