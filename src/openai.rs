//! OpenAI client configuration with sensible defaults.

use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for OpenAI API requests (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Upper bound on the SDK's internal retry window (1 minute).
const MAX_BACKOFF_ELAPSED_SECS: u64 = 60;

/// Create an OpenAI client with configured timeout and bounded retries.
///
/// The SDK retries rate-limited requests internally; capping the elapsed
/// backoff time keeps a saturated provider from stalling a pipeline stage
/// past its own timeout.
pub fn create_client() -> Client<OpenAIConfig> {
    create_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create an OpenAI client with a custom request timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Client<OpenAIConfig> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to create HTTP client");

    let backoff = backoff::ExponentialBackoff {
        max_elapsed_time: Some(Duration::from_secs(MAX_BACKOFF_ELAPSED_SECS)),
        ..Default::default()
    };

    Client::with_config(OpenAIConfig::default())
        .with_http_client(http_client)
        .with_backoff(backoff)
}
