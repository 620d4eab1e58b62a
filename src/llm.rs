//! LLM provider abstraction
//!
//! A single choke-point for everything that talks to the model: the
//! OpenAI-compatible provider, the safety/fallback gateway and the
//! schema-constrained extraction adapter.

mod error;
pub mod extract;
mod gateway;
mod openai;
pub mod prompt;

pub use error::{LlmError, LlmErrorKind};
pub use gateway::{GenerateRequest, LlmGateway};
pub use openai::OpenAiCompatService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One turn of chat history sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A fully composed chat-completions request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatTurn>) -> Self {
        Self {
            messages,
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

/// Common interface for chat-completions providers
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for chat services
pub struct LoggingService {
    inner: std::sync::Arc<dyn ChatService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: std::sync::Arc<dyn ChatService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ChatService for LoggingService {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    response_chars = response.len(),
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
