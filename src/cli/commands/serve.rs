//! HTTP API server for the ingestion pipeline and student chat.
//!
//! Video registration returns immediately and the pipeline runs as a
//! background job; clients poll the video record for progress. Chat streams
//! `ChatEvent`s over SSE, and a dropped connection cancels the completion
//! while keeping the partial answer.

use crate::chat::{ChatEvent, ChatRequest, ChatService};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::PensumError;
use crate::pipeline::{IngestRequest, Pipeline};
use crate::sources::SourceKind;
use crate::store::{ChatMessage, ProcessingStatus, SqliteStore, Video};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{self, KeepAlive, KeepAliveStream, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use uuid::Uuid;

/// Shared application state.
struct AppState {
    pipeline: Pipeline,
    chat: ChatService,
}

/// Run the HTTP API server.
pub async fn run_serve(
    host: Option<String>,
    port: Option<u16>,
    settings: Settings,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);

    let pipeline = Pipeline::new(settings.clone())?;
    let chat = ChatService::new(&settings, pipeline.store(), pipeline.embedder());

    let state = Arc::new(AppState { pipeline, chat });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/videos", post(create_video).get(list_videos))
        .route("/videos/reprocess-failed", post(reprocess_failed))
        .route("/videos/{id}", get(get_video).delete(delete_video))
        .route("/videos/{id}/reprocess", post(reprocess_video))
        .route("/chat", post(self::chat))
        .route("/sessions/{id}/messages", get(session_messages))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Pensum API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET    /health");
    Output::kv("Ingest", "POST   /videos");
    Output::kv("List Videos", "GET    /videos?owner_id=");
    Output::kv("Video Status", "GET    /videos/{id}");
    Output::kv("Reprocess", "POST   /videos/{id}/reprocess");
    Output::kv("Sweep Failed", "POST   /videos/reprocess-failed");
    Output::kv("Delete", "DELETE /videos/{id}");
    Output::kv("Chat (SSE)", "POST   /chat");
    Output::kv("Messages", "GET    /sessions/{id}/messages");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct CreateVideoRequest {
    /// Source kind, detected from the locator when omitted.
    source_kind: Option<SourceKind>,
    /// URL, external id, or upload path.
    source_locator: String,
    owner_id: String,
    #[serde(default)]
    course_id: Option<String>,
}

#[derive(Deserialize)]
struct ListParams {
    owner_id: Option<String>,
}

#[derive(Deserialize)]
struct ReprocessFailedRequest {
    #[serde(default)]
    include_stale: bool,
}

#[derive(Serialize)]
struct VideoSummary {
    id: Uuid,
    title: String,
    kind: SourceKind,
    source_url: String,
    course_id: Option<String>,
    status: ProcessingStatus,
    duration_seconds: Option<u32>,
    chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct VideoListResponse {
    videos: Vec<VideoSummary>,
    total: usize,
}

#[derive(Serialize)]
struct SweepResponse {
    outcomes: Vec<crate::pipeline::BatchOutcome>,
    total: usize,
    recovered: usize,
}

#[derive(Serialize)]
struct MessagesResponse {
    session_id: Uuid,
    messages: Vec<ChatMessage>,
    total: usize,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn summarize(store: &SqliteStore, video: Video) -> crate::error::Result<VideoSummary> {
    let chunk_count = store.chunk_count(video.id)?;
    Ok(VideoSummary {
        id: video.id,
        title: video.title,
        kind: video.kind,
        source_url: video.source_url,
        course_id: video.course_id,
        status: video.status,
        duration_seconds: video.duration_seconds,
        chunk_count,
        error: video.error,
        created_at: video.created_at,
        updated_at: video.updated_at,
    })
}

fn error_response(error: PensumError) -> axum::response::Response {
    let status = match &error {
        PensumError::InvalidReference(_) | PensumError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PensumError::VideoNotFound(_) | PensumError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn create_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateVideoRequest>,
) -> impl IntoResponse {
    let request = IngestRequest {
        creator_id: req.owner_id,
        course_id: req.course_id,
        kind: req.source_kind,
        reference: req.source_locator,
    };

    match state.pipeline.ingest(&request) {
        Ok(video) => {
            // Fresh registrations start their pipeline job; resubmitting a
            // known source just returns its current record.
            if video.status == ProcessingStatus::Pending {
                let worker = state.clone();
                let video_id = video.id;
                tokio::spawn(async move {
                    let _ = worker.pipeline.process(video_id).await;
                });
            }
            match summarize(&state.pipeline.store(), video) {
                Ok(summary) => (StatusCode::ACCEPTED, Json(summary)).into_response(),
                Err(e) => error_response(e),
            }
        }
        Err(e) => error_response(e),
    }
}

async fn list_videos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let store = state.pipeline.store();
    match store.list_videos(params.owner_id.as_deref()) {
        Ok(videos) => {
            let mut summaries = Vec::with_capacity(videos.len());
            for video in videos {
                match summarize(&store, video) {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => return error_response(e),
                }
            }
            Json(VideoListResponse {
                total: summaries.len(),
                videos: summaries,
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn get_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.pipeline.store();
    match store.get_video(id) {
        Ok(Some(video)) => match summarize(&store, video) {
            Ok(summary) => Json(summary).into_response(),
            Err(e) => error_response(e),
        },
        Ok(None) => error_response(PensumError::VideoNotFound(id.to_string())),
        Err(e) => error_response(e),
    }
}

async fn reprocess_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.pipeline.store();
    let video = match store.get_video(id) {
        Ok(Some(video)) => video,
        Ok(None) => return error_response(PensumError::VideoNotFound(id.to_string())),
        Err(e) => return error_response(e),
    };

    if !video.status.is_terminal() {
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!(
                    "Video {} is still {}; reprocess applies to failed or completed videos",
                    id, video.status
                ),
            }),
        )
            .into_response();
    }

    let worker = state.clone();
    tokio::spawn(async move {
        let _ = worker.pipeline.reprocess(id).await;
    });

    match summarize(&store, video) {
        Ok(summary) => (StatusCode::ACCEPTED, Json(summary)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reprocess_failed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReprocessFailedRequest>,
) -> impl IntoResponse {
    match state.pipeline.reprocess_batch(req.include_stale).await {
        Ok(outcomes) => {
            let recovered = outcomes
                .iter()
                .filter(|o| o.status == ProcessingStatus::Completed)
                .count();
            Json(SweepResponse {
                total: outcomes.len(),
                recovered,
                outcomes,
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn delete_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.pipeline.store().delete_video(id) {
        Ok(true) => Json(DeletedResponse { deleted: true }).into_response(),
        Ok(false) => error_response(PensumError::VideoNotFound(id.to_string())),
        Err(e) => error_response(e),
    }
}

/// Bridges the chat event channel to an SSE body. Dropping the stream is
/// how a client disconnect surfaces, so `Drop` cancels the completion.
struct ChatEventStream {
    receiver: mpsc::Receiver<ChatEvent>,
    cancel: CancellationToken,
}

impl Stream for ChatEventStream {
    type Item = std::result::Result<sse::Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => match sse::Event::default().json_data(&event) {
                Ok(frame) => Poll::Ready(Some(Ok(frame))),
                Err(_) => Poll::Ready(None),
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatEventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Sse<KeepAliveStream<ChatEventStream>> {
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let task_cancel = cancel.clone();
    let task_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = task_state.chat.ask(&request, tx, task_cancel).await {
            warn!("Chat request ended with error: {}", e);
        }
    });

    Sse::new(ChatEventStream {
        receiver: rx,
        cancel,
    })
    .keep_alive(KeepAlive::default())
}

async fn session_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.chat.messages(id) {
        Ok(messages) => Json(MessagesResponse {
            session_id: id,
            total: messages.len(),
            messages,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}
