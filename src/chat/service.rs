//! Streaming chat completion over retrieved context.
//!
//! `ChatService::ask` resolves the session, retrieves and ranks chunks,
//! builds the prompt, then streams the model's answer into an event sink.
//! The exchange is persisted with citations, token usage, and cost; a
//! cancelled stream keeps whatever arrived, flagged as truncated.

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionStreamOptions, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chat::context::ContextBuilder;
use crate::chat::pricing;
use crate::chat::session::SessionManager;
use crate::config::{ChatSettings, Settings};
use crate::embedding::Embedder;
use crate::error::{map_openai_error, PensumError, Result};
use crate::retrieval::Retriever;
use crate::store::{ChatMessage, ChatSession, Citation, MessageRole, ScopeFilter, SqliteStore};

/// Text sent to the client when the provider fails mid-answer. The actual
/// cause goes to the logs, never over the wire.
const PROVIDER_ERROR_TEXT: &str = "The assistant could not finish this answer. Please try again.";

/// A prompt ready for the completion API: system text, replayed history,
/// and the student's new question.
#[derive(Debug, Clone)]
pub struct PromptMessages {
    pub system: String,
    pub history: Vec<(MessageRole, String)>,
    pub user: String,
}

/// One increment from a streaming completion.
#[derive(Debug, Clone)]
pub enum CompletionDelta {
    Token(String),
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
}

/// Seam over the completion provider. The implementation streams deltas
/// into the channel and returns once the stream ends, fails, or is
/// cancelled; a closed channel means the caller has stopped listening.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_completion(
        &self,
        prompt: PromptMessages,
        deltas: mpsc::Sender<CompletionDelta>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Events emitted over the lifetime of one answer, in order: `citations`
/// once, `token` repeatedly, then exactly one of `done` or `error`. A
/// cancelled stream simply stops after the last token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Citations {
        session_id: Uuid,
        citations: Vec<Citation>,
    },
    Token {
        content: String,
    },
    Done {
        message_id: Uuid,
        prompt_tokens: u32,
        completion_tokens: u32,
        embedding_calls: u32,
        cost_usd: f64,
    },
    Error {
        message: String,
    },
}

/// A student's question, optionally continuing an existing session.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<Uuid>,
    pub student_id: String,
    pub creator_id: String,
    pub course_id: Option<String>,
    pub message: String,
}

/// What `ask` produced, whether the stream ran to completion or was cut.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub session_id: Uuid,
    /// Persisted assistant message, if any content was kept.
    pub message_id: Option<Uuid>,
    pub content: String,
    pub citations: Vec<Citation>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub embedding_calls: Option<u32>,
    pub cost_usd: Option<f64>,
    pub truncated: bool,
}

/// Answers student questions from a creator's indexed video library.
pub struct ChatService {
    store: Arc<SqliteStore>,
    retriever: Arc<Retriever>,
    sessions: SessionManager,
    model: Arc<dyn ChatModel>,
    context: ContextBuilder,
    settings: ChatSettings,
}

impl ChatService {
    /// Build a service backed by the OpenAI chat API, sharing the given
    /// store and embedder with the rest of the application.
    pub fn new(settings: &Settings, store: Arc<SqliteStore>, embedder: Arc<dyn Embedder>) -> Self {
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            embedder,
            settings.retrieval.clone(),
        ));
        let model: Arc<dyn ChatModel> = Arc::new(OpenAIChatModel::new(&settings.chat));

        Self {
            sessions: SessionManager::new(store.clone()),
            context: ContextBuilder::new(&settings.chat),
            settings: settings.chat.clone(),
            store,
            retriever,
            model,
        }
    }

    /// Build a service from pre-constructed components.
    pub fn with_components(
        settings: ChatSettings,
        store: Arc<SqliteStore>,
        retriever: Arc<Retriever>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            sessions: SessionManager::new(store.clone()),
            context: ContextBuilder::new(&settings),
            settings,
            store,
            retriever,
            model,
        }
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }

    /// Answer one question, streaming events into `events` as they happen.
    ///
    /// Cancelling the token stops generation; whatever streamed before the
    /// cut is persisted as a truncated answer and the call still returns
    /// `Ok`. Every failure emits exactly one terminal `error` event; provider
    /// failures carry generic text with the cause logged, and leave no
    /// assistant message behind.
    #[instrument(skip(self, request, events, cancel), fields(student = %request.student_id, creator = %request.creator_id))]
    pub async fn ask(
        &self,
        request: &ChatRequest,
        events: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) -> Result<ChatOutcome> {
        match self.ask_inner(request, &events, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Chat turn for student {} failed: {}", request.student_id, e);
                let _ = events
                    .send(ChatEvent::Error {
                        message: user_facing_error(&e),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn ask_inner(
        &self,
        request: &ChatRequest,
        events: &mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) -> Result<ChatOutcome> {
        let session = self.sessions.get_or_create(
            request.session_id,
            &request.student_id,
            &request.creator_id,
            request.course_id.as_deref(),
        )?;

        // Writes for one session are serialized so interleaved requests
        // cannot shuffle the message order.
        let session_lock = self.sessions.lock_for(session.id);
        let _session_guard = session_lock.lock().await;

        self.sessions.ensure_title(session.id, &request.message)?;

        // History is captured before the new question is stored so the
        // prompt replays only prior turns.
        let history = self
            .store
            .recent_messages(session.id, self.settings.history_pairs * 2)?;

        self.store
            .insert_message(&ChatMessage::user(session.id, &request.message))?;

        // Retrieval scope comes from the session, not the request, so a
        // session stays pinned to the creator it was opened against.
        let filter = match session.course_id.as_deref() {
            Some(course) => ScopeFilter::course(&session.creator_id, course),
            None => ScopeFilter::creator(&session.creator_id),
        };
        let (ranked, embedding_calls) = self
            .retriever
            .search_with_usage(&request.message, &filter)
            .await?;
        let built = self.context.build(&ranked, &history);
        let citations = built.included.clone();

        let _ = events
            .send(ChatEvent::Citations {
                session_id: session.id,
                citations: citations.clone(),
            })
            .await;

        let prompt = PromptMessages {
            system: built.system_prompt,
            history: built
                .history
                .iter()
                .map(|message| (message.role, message.content.clone()))
                .collect(),
            user: request.message.clone(),
        };

        let (delta_tx, mut delta_rx) = mpsc::channel(32);
        let model = self.model.clone();
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(async move {
            model.stream_completion(prompt, delta_tx, worker_cancel).await
        });

        let mut content = String::new();
        let mut usage: Option<(u32, u32)> = None;

        while let Some(delta) = delta_rx.recv().await {
            match delta {
                CompletionDelta::Token(token) => {
                    content.push_str(&token);
                    if events
                        .send(ChatEvent::Token { content: token })
                        .await
                        .is_err()
                    {
                        // The sink is gone; treat it like a cancellation.
                        cancel.cancel();
                        break;
                    }
                }
                CompletionDelta::Usage {
                    prompt_tokens,
                    completion_tokens,
                } => {
                    usage = Some((prompt_tokens, completion_tokens));
                }
            }
        }
        // Unblocks a worker still waiting to send before it is joined.
        drop(delta_rx);

        let stream_result = match worker.await {
            Ok(result) => result,
            Err(e) => Err(PensumError::ProviderError {
                message: format!("completion worker failed: {}", e),
                transient: false,
            }),
        };

        stream_result?;

        if cancel.is_cancelled() {
            return self.finish_cancelled(&session, content, citations, usage, embedding_calls);
        }

        self.finish_complete(&session, content, citations, usage, embedding_calls, events)
            .await
    }

    /// List a session's messages in arrival order.
    pub fn messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        let _ = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| PensumError::SessionNotFound(session_id.to_string()))?;
        self.store.list_messages(session_id)
    }

    async fn finish_complete(
        &self,
        session: &ChatSession,
        content: String,
        citations: Vec<Citation>,
        usage: Option<(u32, u32)>,
        embedding_calls: u32,
        events: &mpsc::Sender<ChatEvent>,
    ) -> Result<ChatOutcome> {
        let (prompt_tokens, completion_tokens) = match usage {
            Some(counts) => counts,
            None => {
                warn!("Provider reported no token usage; recording zero cost");
                (0, 0)
            }
        };
        let cost = pricing::completion_cost(&self.settings.model, prompt_tokens, completion_tokens);

        let mut message = ChatMessage::assistant(session.id, &content, citations.clone());
        message.prompt_tokens = Some(prompt_tokens);
        message.completion_tokens = Some(completion_tokens);
        message.embedding_calls = Some(embedding_calls);
        message.cost_usd = Some(cost);
        self.store.insert_message(&message)?;

        let mut cited: Vec<Uuid> = Vec::new();
        for citation in &citations {
            if !cited.contains(&citation.video_id) {
                cited.push(citation.video_id);
            }
        }
        if !cited.is_empty() {
            self.store.increment_reference_counts(&cited)?;
        }
        self.store.touch_session(session.id)?;

        let _ = events
            .send(ChatEvent::Done {
                message_id: message.id,
                prompt_tokens,
                completion_tokens,
                embedding_calls,
                cost_usd: cost,
            })
            .await;

        info!(
            "Answered in session {} with {} citations ({} completion tokens)",
            session.id,
            citations.len(),
            completion_tokens
        );

        Ok(ChatOutcome {
            session_id: session.id,
            message_id: Some(message.id),
            content,
            citations,
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            embedding_calls: Some(embedding_calls),
            cost_usd: Some(cost),
            truncated: false,
        })
    }

    fn finish_cancelled(
        &self,
        session: &ChatSession,
        content: String,
        citations: Vec<Citation>,
        usage: Option<(u32, u32)>,
        embedding_calls: u32,
    ) -> Result<ChatOutcome> {
        info!(
            "Stream for session {} cancelled after {} chars",
            session.id,
            content.len()
        );

        // Nothing arrived before the cut; there is no partial answer to keep.
        if content.is_empty() {
            return Ok(ChatOutcome {
                session_id: session.id,
                message_id: None,
                content,
                citations,
                prompt_tokens: usage.map(|(p, _)| p),
                completion_tokens: usage.map(|(_, c)| c),
                embedding_calls: Some(embedding_calls),
                cost_usd: None,
                truncated: true,
            });
        }

        let mut message = ChatMessage::assistant(session.id, &content, citations.clone());
        message.truncated = true;
        message.embedding_calls = Some(embedding_calls);
        if let Some((prompt_tokens, completion_tokens)) = usage {
            message.prompt_tokens = Some(prompt_tokens);
            message.completion_tokens = Some(completion_tokens);
            message.cost_usd = Some(pricing::completion_cost(
                &self.settings.model,
                prompt_tokens,
                completion_tokens,
            ));
        }
        self.store.insert_message(&message)?;
        self.store.touch_session(session.id)?;

        Ok(ChatOutcome {
            session_id: session.id,
            message_id: Some(message.id),
            content,
            citations,
            prompt_tokens: message.prompt_tokens,
            completion_tokens: message.completion_tokens,
            embedding_calls: message.embedding_calls,
            cost_usd: message.cost_usd,
            truncated: true,
        })
    }
}

/// Error text safe to put on the wire. Caller mistakes keep their message;
/// provider and internal failures collapse to the generic text.
fn user_facing_error(error: &PensumError) -> String {
    match error {
        PensumError::SessionNotFound(_) | PensumError::InvalidInput(_) => error.to_string(),
        _ => PROVIDER_ERROR_TEXT.to_string(),
    }
}

/// `ChatModel` backed by the OpenAI streaming chat completions API.
pub struct OpenAIChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl OpenAIChatModel {
    pub fn new(settings: &ChatSettings) -> Self {
        Self {
            client: crate::openai::create_client(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
        }
    }

    fn build_request(&self, prompt: &PromptMessages) -> Result<CreateChatCompletionRequest> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(prompt.history.len() + 2);

        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(prompt.system.clone())
                .build()
                .map_err(map_openai_error)?
                .into(),
        );

        for (role, content) in &prompt.history {
            let message = match role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            };
            messages.push(message);
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.user.clone())
                .build()
                .map_err(map_openai_error)?
                .into(),
        );

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_output_tokens)
            .stream(true)
            .stream_options(ChatCompletionStreamOptions {
                include_usage: true,
            })
            .build()
            .map_err(map_openai_error)
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn stream_completion(
        &self,
        prompt: PromptMessages,
        deltas: mpsc::Sender<CompletionDelta>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let request = self.build_request(&prompt)?;
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(map_openai_error)?;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = stream.next() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let response = frame.map_err(map_openai_error)?;

            // With `include_usage` the final frame carries usage and no
            // choices.
            if let Some(usage) = response.usage {
                let _ = deltas
                    .send(CompletionDelta::Usage {
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                    })
                    .await;
            }

            for choice in response.choices {
                if let Some(content) = choice.delta.content {
                    if deltas.send(CompletionDelta::Token(content)).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}
