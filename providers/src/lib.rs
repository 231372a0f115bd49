//! Language-model inference for the summarization pipeline.
//!
//! # Architecture
//!
//! - [`InferenceClient`] - The capability the pipeline consumes: one
//!   non-streaming completion per call
//! - [`HttpInferenceClient`] - Claude (Messages API) and OpenAI (Responses API)
//!   implementation over `reqwest`
//! - [`retry`] - Exponential backoff around any inference call
//!
//! # Error Handling
//!
//! Every failure is an [`InferenceError`]. The variant carries enough to decide
//! whether another attempt can help: HTTP errors record the server's retry
//! classification and any `Retry-After` hint.

pub mod retry;

mod http;

use std::future::Future;
use std::time::Duration;

use condense_types::SummaryResult;
use thiserror::Error;

pub use condense_types::Provider;
pub use http::HttpInferenceClient;
pub use retry::RetryConfig;

/// Canonical Anthropic API base URL.
pub const CLAUDE_API_BASE_URL: &str = "https://api.anthropic.com";
/// Canonical OpenAI API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com";

const CONNECT_TIMEOUT_SECS: u64 = 30;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Sampling parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the model for a JSON object instead of prose.
    pub json_mode: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 1024,
            json_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: InferenceOptions,
}

impl InferenceRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        options: InferenceOptions,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            options,
        }
    }
}

/// Text and token usage of one successful call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<Completion> for SummaryResult {
    fn from(completion: Completion) -> Self {
        Self {
            text: completion.text,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("API error {status}: {body}")]
    Http {
        status: u16,
        body: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl InferenceError {
    /// Whether another attempt could succeed.
    ///
    /// Rate limits, 408/409/5xx, timeouts, transport failures and malformed
    /// responses are transient; other client errors are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } => *retryable,
            Self::Timeout | Self::Transport(_) | Self::MalformedResponse(_) => true,
        }
    }

    /// Server-provided delay before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A language-model backend that turns a prompt pair into a completion.
///
/// Implementations make exactly one attempt per call; retries are layered on
/// top with [`retry::retry`].
pub trait InferenceClient: Send + Sync {
    /// Model name used for pricing and logging.
    fn model(&self) -> &str;

    fn infer(
        &self,
        request: &InferenceRequest,
    ) -> impl Future<Output = Result<Completion, InferenceError>> + Send;
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
}

pub fn http_client_with_timeout(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    base_client_builder().timeout(timeout).build()
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
