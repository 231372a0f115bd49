//! HTTP inference client for the Claude Messages API and the OpenAI Responses API.
//!
//! Both backends are called non-streaming. One call is one attempt; callers
//! wrap it in [`crate::retry::retry`].

use std::time::Duration;

use serde_json::{Value, json};

use crate::retry::{parse_retry_after, should_retry};
use crate::{
    CLAUDE_API_BASE_URL, Completion, InferenceClient, InferenceError, InferenceRequest,
    OPENAI_API_BASE_URL, Provider, http_client_with_timeout, read_capped_error_body,
};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Appended to the system prompt when a JSON object is requested.
const JSON_INSTRUCTION: &str = "Respond with a single valid JSON object and nothing else.";

pub struct HttpInferenceClient {
    client: reqwest::Client,
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for HttpInferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpInferenceClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl HttpInferenceClient {
    /// Client for `provider`'s public endpoint with the default request timeout.
    pub fn new(
        provider: Provider,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, InferenceError> {
        let client = http_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?;
        let base_url = match provider {
            Provider::Claude => CLAUDE_API_BASE_URL,
            Provider::OpenAI => OPENAI_API_BASE_URL,
        };
        Ok(Self {
            client,
            provider,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.to_string(),
        })
    }

    /// Points the client at a proxy or test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, InferenceError> {
        self.client = http_client_with_timeout(timeout)?;
        Ok(self)
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn build_request(&self, request: &InferenceRequest) -> reqwest::RequestBuilder {
        let system = if request.options.json_mode {
            format!("{}\n\n{JSON_INSTRUCTION}", request.system_prompt)
        } else {
            request.system_prompt.clone()
        };

        match self.provider {
            Provider::Claude => {
                let body = json!({
                    "model": self.model,
                    "max_tokens": request.options.max_output_tokens,
                    "temperature": request.options.temperature,
                    "stream": false,
                    "system": system,
                    "messages": [
                        { "role": "user", "content": request.user_prompt }
                    ]
                });
                self.client
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .json(&body)
            }
            Provider::OpenAI => {
                // Responses API uses `input` array and `instructions` for system prompt
                let mut body = json!({
                    "model": self.model,
                    "stream": false,
                    "max_output_tokens": request.options.max_output_tokens,
                    "temperature": request.options.temperature,
                    "instructions": system,
                    "input": [
                        { "role": "user", "content": request.user_prompt }
                    ]
                });
                if request.options.json_mode {
                    body["text"] = json!({ "format": { "type": "json_object" } });
                }
                self.client
                    .post(format!("{}/v1/responses", self.base_url))
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("content-type", "application/json")
                    .json(&body)
            }
        }
    }

    async fn send(&self, request: &InferenceRequest) -> Result<Completion, InferenceError> {
        let response = self.build_request(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let retryable = should_retry(status, &headers);
            let retry_after = parse_retry_after(&headers);
            let body = read_capped_error_body(response).await;
            tracing::debug!(
                provider = self.provider.as_str(),
                status = status.as_u16(),
                retryable,
                "Inference request failed"
            );
            return Err(InferenceError::Http {
                status: status.as_u16(),
                body,
                retryable,
                retry_after,
            });
        }

        let json: Value = response.json().await?;
        let completion = match self.provider {
            Provider::Claude => parse_claude_response(&json)?,
            Provider::OpenAI => parse_openai_response(&json)?,
        };
        tracing::debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "Inference request completed"
        );
        Ok(completion)
    }
}

impl InferenceClient for HttpInferenceClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<Completion, InferenceError> {
        self.send(request).await
    }
}

fn usage_field(json: &Value, field: &str) -> u32 {
    json["usage"][field]
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// `{ content: [{ type: "text", text }], usage: { input_tokens, output_tokens } }`
fn parse_claude_response(json: &Value) -> Result<Completion, InferenceError> {
    let blocks = json["content"].as_array().ok_or_else(|| {
        InferenceError::MalformedResponse("Claude response has no content array".to_string())
    })?;

    let text: String = blocks
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();

    Ok(Completion {
        text,
        input_tokens: usage_field(json, "input_tokens"),
        output_tokens: usage_field(json, "output_tokens"),
    })
}

/// `{ output: [{ type: "message", content: [{ type: "output_text", text }] }], usage: {...} }`
fn parse_openai_response(json: &Value) -> Result<Completion, InferenceError> {
    let items = json["output"].as_array().ok_or_else(|| {
        InferenceError::MalformedResponse("OpenAI response has no output array".to_string())
    })?;

    let text: String = items
        .iter()
        .filter(|item| item["type"] == "message")
        .filter_map(|item| item["content"].as_array())
        .flatten()
        .filter(|block| block["type"] == "output_text")
        .filter_map(|block| block["text"].as_str())
        .collect();

    Ok(Completion {
        text,
        input_tokens: usage_field(json, "input_tokens"),
        output_tokens: usage_field(json, "output_tokens"),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{HttpInferenceClient, parse_claude_response, parse_openai_response};
    use crate::{InferenceClient, InferenceError, InferenceOptions, InferenceRequest, Provider};

    fn request(json_mode: bool) -> InferenceRequest {
        InferenceRequest::new(
            "You summarize code.",
            "Summarize this.",
            InferenceOptions {
                temperature: 0.2,
                max_output_tokens: 500,
                json_mode,
            },
        )
    }

    mod parsing {
        use super::*;

        #[test]
        fn claude_concatenates_text_blocks() {
            let json = json!({
                "content": [
                    { "type": "text", "text": "Hello, " },
                    { "type": "thinking", "thinking": "ignored" },
                    { "type": "text", "text": "world" }
                ],
                "usage": { "input_tokens": 10, "output_tokens": 3 }
            });
            let completion = parse_claude_response(&json).unwrap();
            assert_eq!(completion.text, "Hello, world");
            assert_eq!(completion.input_tokens, 10);
            assert_eq!(completion.output_tokens, 3);
        }

        #[test]
        fn openai_reads_output_text_only() {
            let json = json!({
                "output": [
                    { "type": "reasoning", "summary": [] },
                    {
                        "type": "message",
                        "content": [
                            { "type": "output_text", "text": "summary" },
                            { "type": "refusal", "refusal": "no" }
                        ]
                    }
                ],
                "usage": { "input_tokens": 42, "output_tokens": 7 }
            });
            let completion = parse_openai_response(&json).unwrap();
            assert_eq!(completion.text, "summary");
            assert_eq!(completion.input_tokens, 42);
        }

        #[test]
        fn missing_usage_counts_as_zero() {
            let json = json!({ "content": [{ "type": "text", "text": "x" }] });
            let completion = parse_claude_response(&json).unwrap();
            assert_eq!(completion.input_tokens, 0);
            assert_eq!(completion.output_tokens, 0);
        }

        #[test]
        fn missing_output_is_malformed() {
            let err = parse_openai_response(&json!({ "error": "nope" })).unwrap_err();
            assert!(matches!(err, InferenceError::MalformedResponse(_)));
            assert!(err.is_retryable());
        }
    }

    mod http {
        use super::*;

        #[tokio::test]
        async fn claude_request_shape_and_response() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/v1/messages"))
                .and(header("x-api-key", "test-key"))
                .and(header("anthropic-version", "2023-06-01"))
                .and(body_partial_json(json!({
                    "model": "claude-haiku-4-5",
                    "max_tokens": 500,
                    "system": "You summarize code.",
                    "messages": [{ "role": "user", "content": "Summarize this." }]
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "content": [{ "type": "text", "text": "A small CLI." }],
                    "usage": { "input_tokens": 20, "output_tokens": 4 }
                })))
                .expect(1)
                .mount(&server)
                .await;

            let client = HttpInferenceClient::new(Provider::Claude, "test-key", "claude-haiku-4-5")
                .unwrap()
                .with_base_url(server.uri());
            let completion = client.infer(&request(false)).await.unwrap();

            assert_eq!(completion.text, "A small CLI.");
            assert_eq!(completion.input_tokens, 20);
            assert_eq!(completion.output_tokens, 4);
            assert_eq!(client.model(), "claude-haiku-4-5");
        }

        #[tokio::test]
        async fn openai_json_mode_sets_text_format() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/v1/responses"))
                .and(header("authorization", "Bearer test-key"))
                .and(body_partial_json(json!({
                    "model": "gpt-4o-mini",
                    "max_output_tokens": 500,
                    "text": { "format": { "type": "json_object" } }
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "output": [{
                        "type": "message",
                        "content": [{ "type": "output_text", "text": "{\"ok\":true}" }]
                    }],
                    "usage": { "input_tokens": 30, "output_tokens": 5 }
                })))
                .expect(1)
                .mount(&server)
                .await;

            let client = HttpInferenceClient::new(Provider::OpenAI, "test-key", "gpt-4o-mini")
                .unwrap()
                .with_base_url(format!("{}/", server.uri()));
            let completion = client.infer(&request(true)).await.unwrap();

            assert_eq!(completion.text, "{\"ok\":true}");
        }

        #[tokio::test]
        async fn rate_limit_maps_to_retryable_http_error() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/v1/responses"))
                .respond_with(
                    ResponseTemplate::new(429)
                        .insert_header("retry-after", "2")
                        .set_body_string("rate limited"),
                )
                .mount(&server)
                .await;

            let client = HttpInferenceClient::new(Provider::OpenAI, "test-key", "gpt-4o-mini")
                .unwrap()
                .with_base_url(server.uri());
            let err = client.infer(&request(false)).await.unwrap_err();

            match err {
                InferenceError::Http {
                    status,
                    body,
                    retryable,
                    retry_after,
                } => {
                    assert_eq!(status, 429);
                    assert_eq!(body, "rate limited");
                    assert!(retryable);
                    assert_eq!(retry_after, Some(std::time::Duration::from_secs(2)));
                }
                other => panic!("expected Http error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn unauthorized_is_not_retryable() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/v1/messages"))
                .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
                .mount(&server)
                .await;

            let client = HttpInferenceClient::new(Provider::Claude, "bad", "claude-haiku-4-5")
                .unwrap()
                .with_base_url(server.uri());
            let err = client.infer(&request(false)).await.unwrap_err();

            assert!(!err.is_retryable());
        }

        #[tokio::test]
        async fn non_json_body_is_malformed() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/v1/messages"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
                .mount(&server)
                .await;

            let client = HttpInferenceClient::new(Provider::Claude, "k", "claude-haiku-4-5")
                .unwrap()
                .with_base_url(server.uri());
            let err = client.infer(&request(false)).await.unwrap_err();

            assert!(matches!(err, InferenceError::MalformedResponse(_)));
        }
    }
}
