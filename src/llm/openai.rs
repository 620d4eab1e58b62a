//! OpenAI-compatible chat-completions provider
//!
//! Works against any endpoint speaking the chat-completions dialect
//! (OpenRouter, OpenAI, self-hosted gateways).

use super::{ChatRequest, ChatService, LlmError, LlmErrorKind};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for one model round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// OpenAI-compatible service implementation
pub struct OpenAiCompatService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatService {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }

    /// Turn a non-2xx reply into a classified error. OpenAI-compatible
    /// endpoints wrap their detail as `{"error": {"message": ...}}`; when a
    /// 429 announced a wait via the Retry-After header, carry it along.
    fn classify_failure(status: u16, retry_after: Option<Duration>, body: &str) -> LlmError {
        let kind = match status {
            400 => LlmErrorKind::InvalidRequest,
            401 | 403 => LlmErrorKind::Auth,
            402 => LlmErrorKind::Payment,
            429 => LlmErrorKind::RateLimit,
            s if s >= 500 => LlmErrorKind::ServerError,
            _ => LlmErrorKind::Unknown,
        };

        let detail = error_detail(body);
        let mut err = LlmError::new(kind, format!("provider returned {status}: {detail}"));
        if kind == LlmErrorKind::RateLimit {
            if let Some(wait) = retry_after {
                err = err.with_retry_after(wait);
            }
        }
        err
    }
}

/// Pull `error.message` out of the standard error envelope, falling back to
/// the raw body for providers that answer with plain text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|envelope| {
            envelope
                .get("error")?
                .get("message")?
                .as_str()
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl ChatService for OpenAiCompatService {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let payload = CompletionRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::timeout(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map(Duration::from_secs_f64);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_failure(status.as_u16(), retry_after, &body));
        }

        let completion: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::unknown("Provider returned no choices"))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: WireMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds_by_status() {
        let cases = [
            (400, LlmErrorKind::InvalidRequest),
            (401, LlmErrorKind::Auth),
            (403, LlmErrorKind::Auth),
            (402, LlmErrorKind::Payment),
            (429, LlmErrorKind::RateLimit),
            (500, LlmErrorKind::ServerError),
            (503, LlmErrorKind::ServerError),
            (418, LlmErrorKind::Unknown),
        ];
        for (status, expected) in cases {
            let err = OpenAiCompatService::classify_failure(status, None, "oops");
            assert_eq!(err.kind, expected, "status {status}");
        }
    }

    #[test]
    fn test_error_envelope_message_extracted() {
        let body = r#"{"error": {"message": "model overloaded", "type": "server_error"}}"#;
        let err = OpenAiCompatService::classify_failure(503, None, body);
        assert!(err.message.contains("model overloaded"));

        // Plain-text bodies pass through untouched
        let err = OpenAiCompatService::classify_failure(502, None, "bad gateway\n");
        assert!(err.message.contains("bad gateway"));
    }

    #[test]
    fn test_retry_after_only_kept_for_rate_limits() {
        let wait = Some(Duration::from_secs(3));
        let err = OpenAiCompatService::classify_failure(429, wait, "slow down");
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));

        let err = OpenAiCompatService::classify_failure(500, wait, "boom");
        assert_eq!(err.retry_after, None);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello");
    }
}
