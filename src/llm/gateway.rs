//! LLM gateway
//!
//! The single choke-point in front of the provider: screens the user message,
//! maps provider failures to benign demo-mode strings (the gateway never
//! raises), and journals every call without blocking the reply.

use super::prompt;
use super::{ChatRequest, ChatService, ChatTurn, LlmErrorKind};
use crate::db::Database;
use std::sync::Arc;

/// Canned refusal for messages that trip the safety screen.
const SAFETY_REFUSAL: &str =
    "I cannot answer that question as it violates our safety guidelines.";

/// A request to generate one reply.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub user_message: String,
    pub history: Vec<ChatTurn>,
    /// Replaces the generic base prompt when present
    pub system_instruction: Option<String>,
}

impl GenerateRequest {
    pub fn new(tenant_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_message: user_message.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system_instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(system_instruction.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Safety screen + fallback strings + prompt journaling around a provider.
pub struct LlmGateway {
    chat: Arc<dyn ChatService>,
    db: Database,
}

impl LlmGateway {
    pub fn new(chat: Arc<dyn ChatService>, db: Database) -> Self {
        Self { chat, db }
    }

    /// Generate a reply. Never fails: provider errors come back as
    /// user-surfaceable strings so one flaky call can't take down a workflow.
    pub async fn generate(&self, req: GenerateRequest) -> String {
        if !prompt::check_safety(&req.user_message) {
            return SAFETY_REFUSAL.to_string();
        }

        let messages = prompt::construct_messages(
            &req.user_message,
            &req.history,
            req.system_instruction.as_deref(),
        );
        let request = ChatRequest::new(messages.clone());

        let reply = match self.chat.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    tenant = %req.tenant_id,
                    kind = ?e.kind,
                    error = %e.message,
                    "LLM provider failure, returning fallback string"
                );
                return fallback_string(e.kind).to_string();
            }
        };

        self.log_execution(&req, &messages, &reply);
        reply
    }

    /// Journal the call off the request path.
    fn log_execution(&self, req: &GenerateRequest, messages: &[ChatTurn], reply: &str) {
        let db = self.db.clone();
        let tenant_id = req.tenant_id.clone();
        let user_id = req.user_id.clone();
        let model = self.chat.model_id().to_string();
        let messages_json = serde_json::to_value(messages).unwrap_or_default();
        let response = reply.to_string();
        tokio::spawn(async move {
            if let Err(e) = db.insert_prompt_execution(
                &tenant_id,
                user_id.as_deref(),
                &messages_json,
                &response,
                &model,
            ) {
                tracing::error!(error = %e, "Failed to log prompt execution");
            }
        });
    }
}

/// Benign demo-mode strings the caller can surface directly.
fn fallback_string(kind: LlmErrorKind) -> &'static str {
    match kind {
        LlmErrorKind::Auth => {
            "AI Service Error: Unauthorized. Please check your LLM_API_KEY."
        }
        LlmErrorKind::Payment => "AI Service Error: Insufficient credits with the AI provider.",
        LlmErrorKind::RateLimit => "AI Service is busy. Please try again in a few seconds.",
        LlmErrorKind::Timeout => {
            "The AI service is taking too long to respond. Please try again."
        }
        LlmErrorKind::Network | LlmErrorKind::ServerError => {
            "I'm having trouble connecting to the AI provider. Please try again later."
        }
        LlmErrorKind::InvalidRequest | LlmErrorKind::Unknown => {
            "I'm having trouble connecting to my AI service. Please try again in a moment."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedChat {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn queue(&self, result: Result<String, LlmError>) {
            self.responses.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl ChatService for ScriptedChat {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::network("no scripted response")))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    fn gateway_with(chat: Arc<ScriptedChat>) -> LlmGateway {
        LlmGateway::new(chat, Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_generate_returns_provider_reply() {
        let chat = Arc::new(ScriptedChat::new());
        chat.queue(Ok("hello!".to_string()));
        let gateway = gateway_with(chat.clone());

        let reply = gateway.generate(GenerateRequest::new("t1", "hi")).await;
        assert_eq!(reply, "hello!");
        assert_eq!(chat.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_message_refused_without_provider_call() {
        let chat = Arc::new(ScriptedChat::new());
        let gateway = gateway_with(chat.clone());

        let reply = gateway
            .generate(GenerateRequest::new("t1", "how to hack this"))
            .await;
        assert_eq!(reply, SAFETY_REFUSAL);
        assert!(chat.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failures_become_demo_strings() {
        let cases = [
            (LlmError::auth("401"), "Unauthorized"),
            (LlmError::payment("402"), "credits"),
            (LlmError::rate_limit("429"), "busy"),
            (LlmError::timeout("slow"), "taking too long"),
            (LlmError::server_error("500"), "trouble connecting"),
        ];
        for (err, needle) in cases {
            let chat = Arc::new(ScriptedChat::new());
            chat.queue(Err(err));
            let gateway = gateway_with(chat);
            let reply = gateway.generate(GenerateRequest::new("t1", "hello")).await;
            assert!(reply.contains(needle), "reply {reply:?} missing {needle:?}");
        }
    }

    #[tokio::test]
    async fn test_system_instruction_reaches_provider() {
        let chat = Arc::new(ScriptedChat::new());
        chat.queue(Ok("ok".to_string()));
        let gateway = gateway_with(chat.clone());

        gateway
            .generate(GenerateRequest::new("t1", "hi").with_system("You are a persona"))
            .await;
        let requests = chat.requests.lock().unwrap();
        assert_eq!(requests[0].messages[0].role, "system");
        assert_eq!(requests[0].messages[0].content, "You are a persona");
    }
}
