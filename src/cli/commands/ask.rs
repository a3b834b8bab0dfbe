//! Ask command implementation.

use crate::chat::{ChatEvent, ChatRequest, ChatService};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::store::{Citation, SqliteStore};
use crate::transcripts::format_timestamp;
use anyhow::Result;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run the ask command.
pub async fn run_ask(
    question: &str,
    student: &str,
    creator: &str,
    course: Option<String>,
    session: Option<Uuid>,
    settings: Settings,
) -> Result<()> {
    // Pre-flight checks
    if let Err(e) = preflight::check(Operation::Ask) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let store = Arc::new(SqliteStore::new(&settings.sqlite_path())?);
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::new(&settings.embedding));
    let chat = ChatService::new(&settings, store, embedder);

    let request = ChatRequest {
        session_id: session,
        student_id: student.to_string(),
        creator_id: creator.to_string(),
        course_id: course,
        message: question.to_string(),
    };

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    // Ctrl+C stops generation but keeps the partial answer.
    let interrupt_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_cancel.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        let mut citations: Vec<Citation> = Vec::new();
        let mut streamed = false;

        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Citations {
                    citations: cited, ..
                } => citations = cited,
                ChatEvent::Token { content } => {
                    streamed = true;
                    print!("{}", content);
                    let _ = io::stdout().flush();
                }
                ChatEvent::Done { .. } => {}
                ChatEvent::Error { message } => {
                    if streamed {
                        println!();
                    }
                    Output::error(&message);
                }
            }
        }
        if streamed {
            println!();
        }
        citations
    });

    let outcome = chat.ask(&request, tx, cancel).await;
    let citations = printer.await?;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => return Err(e.into()),
    };

    if outcome.truncated {
        Output::warning("Answer cancelled; the partial response was saved.");
    }

    if !citations.is_empty() {
        Output::header("Sources");
        for citation in &citations {
            Output::search_hit(
                &citation.video_title,
                &format_timestamp(citation.timestamp_seconds),
                citation.relevance_score,
                &citation.snippet,
                None,
            );
        }
    }

    println!();
    Output::kv("Session", &outcome.session_id.to_string());
    if let Some(cost) = outcome.cost_usd {
        Output::kv("Cost", &format!("${:.6}", cost));
    }

    Ok(())
}
