//! Mock ports and harness for engine tests
//!
//! These mocks enable end-to-end engine tests without real I/O: a scripted
//! chat provider and a recording outbound channel around an in-memory store.

use crate::channels::{Channel, InboundMessage, OutboundPort, Recipient};
use crate::db::{Database, TenantStatus};
use crate::engine::Engine;
use crate::llm::prompt;
use crate::llm::{ChatRequest, ChatService, LlmError, LlmGateway};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Scripted chat provider
// ============================================================================

/// Chat provider that returns queued replies in order.
#[allow(dead_code)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
    /// Record of every request for assertion
    pub requests: Mutex<Vec<ChatRequest>>,
}

#[allow(dead_code)]
impl ScriptedChat {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(reply.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatService for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::network("no scripted reply queued"))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Recording outbound channel
// ============================================================================

/// Outbound port that records sends instead of delivering them.
#[allow(dead_code)]
pub struct RecordingOutbound {
    sends: Mutex<Vec<(String, Recipient, String)>>,
    fail_next: AtomicBool,
}

#[allow(dead_code)]
impl RecordingOutbound {
    pub fn new() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next send fail with a synthetic transport error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<(String, Recipient, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sends.lock().unwrap().clear();
    }
}

impl Default for RecordingOutbound {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundPort for RecordingOutbound {
    async fn send(
        &self,
        tenant_id: &str,
        recipient: &Recipient,
        text: &str,
    ) -> Result<(), String> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err("synthetic send failure".to_string());
        }
        self.sends.lock().unwrap().push((
            tenant_id.to_string(),
            recipient.clone(),
            text.to_string(),
        ));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Engine over an in-memory store with scripted ports.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub db: Database,
    pub chat: Arc<ScriptedChat>,
    pub outbound: Arc<RecordingOutbound>,
}

impl TestEngine {
    /// Validate and persist a workflow, the way the control plane does.
    pub fn create_workflow(&self, id: &str, def: &crate::workflow::WorkflowDefinition) {
        crate::workflow::validate_definition(def).expect("test workflow must validate");
        self.db.insert_workflow(id, "t1", def).expect("insert workflow");
    }
}

/// Build a harness with tenant `t1` already present.
pub fn test_engine() -> TestEngine {
    let db = Database::open_in_memory().expect("in-memory db");
    db.create_tenant("t1", Some("Acme"), TenantStatus::Active)
        .expect("create tenant");

    let chat = Arc::new(ScriptedChat::new());
    let gateway = Arc::new(LlmGateway::new(chat.clone(), db.clone()));
    let outbound = Arc::new(RecordingOutbound::new());
    let engine = Engine::new(db.clone(), gateway, outbound.clone());

    TestEngine {
        engine,
        db,
        chat,
        outbound,
    }
}

/// A web inbound message with detected intent/sentiment, as ingress builds it.
pub fn inbound(tenant_id: &str, participant: &str, body: &str) -> InboundMessage {
    InboundMessage {
        tenant_id: tenant_id.to_string(),
        participant: participant.to_string(),
        channel: Channel::Web,
        body: body.to_string(),
        intent: prompt::detect_intent(body).to_string(),
        sentiment: prompt::analyze_sentiment(body).to_string(),
    }
}
