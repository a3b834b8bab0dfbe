//! Error types for Pensum.

use async_openai::error::{ApiError, OpenAIError};
use thiserror::Error;

/// Library-level error type for Pensum operations.
#[derive(Error, Debug)]
pub enum PensumError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid video reference: {0}")]
    InvalidReference(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("No transcript available: {0}")]
    NoTranscriptAvailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider error: {message}")]
    ProviderError { message: String, transient: bool },

    #[error("Stage '{stage}' timed out after {seconds}s")]
    PipelineTimeout { stage: String, seconds: u64 },

    #[error("Stream cancelled by caller")]
    StreamCancelled,

    #[error("Audio fetch failed: {0}")]
    AudioFetch(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Chat session not found: {0}")]
    SessionNotFound(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PensumError {
    /// Whether a retry at the owning stage could plausibly succeed.
    ///
    /// Rate limits and 5xx-class provider failures are transient; everything
    /// else is terminal and propagates to the caller unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            PensumError::RateLimited(_) => true,
            PensumError::ProviderError { transient, .. } => *transient,
            PensumError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Build a `ProviderError` from an HTTP status code.
    ///
    /// 429 maps to `RateLimited`, 5xx to a transient provider error, any
    /// other 4xx to a terminal one.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 {
            PensumError::RateLimited(message)
        } else {
            PensumError::ProviderError {
                message: format!("HTTP {}: {}", status, message),
                transient: status >= 500,
            }
        }
    }
}

/// Classify an OpenAI SDK error into the crate taxonomy.
///
/// The SDK does not expose HTTP status codes directly, so classification
/// relies on the error type/code strings the API returns.
pub fn map_openai_error(err: OpenAIError) -> PensumError {
    match err {
        OpenAIError::ApiError(api) => map_api_error(api),
        OpenAIError::Reqwest(e) => PensumError::ProviderError {
            message: format!("request failed: {}", e),
            transient: true,
        },
        other => PensumError::OpenAI(other.to_string()),
    }
}

fn map_api_error(api: ApiError) -> PensumError {
    let kind = api.r#type.as_deref().unwrap_or("");
    let code = api.code.as_deref().unwrap_or("");

    if kind.contains("rate_limit")
        || code.contains("rate_limit")
        || code == "insufficient_quota"
        || api.message.to_lowercase().contains("rate limit")
    {
        return PensumError::RateLimited(api.message);
    }

    PensumError::ProviderError {
        transient: kind.contains("server_error") || code.contains("server_error"),
        message: api.message,
    }
}

/// Result type alias for Pensum operations.
pub type Result<T> = std::result::Result<T, PensumError>;
