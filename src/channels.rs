//! Channel abstraction
//!
//! Inbound traffic is normalized into `InboundMessage` before arbitration;
//! outbound replies go through the `OutboundPort` so the engine never knows
//! which transport a participant lives on.

pub mod whatsapp;

use crate::db::{Database, StoreMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Supported channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    WhatsApp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::WhatsApp => "whatsapp",
        }
    }
}

/// A normalized inbound customer message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub tenant_id: String,
    pub participant: String,
    pub channel: Channel,
    pub body: String,
    pub intent: String,
    pub sentiment: String,
}

impl InboundMessage {
    /// The trigger-event document seeded into execution contexts.
    ///
    /// Carries both `message` and `message_body` plus the channel-specific
    /// participant key so node configs can address either alias.
    pub fn to_trigger_event(&self) -> Value {
        let mut event = json!({
            "message": self.body,
            "message_body": self.body,
            "platform": self.channel.as_str(),
            "tenant_id": self.tenant_id,
            "intent": self.intent,
            "sentiment": self.sentiment,
        });
        let key = match self.channel {
            Channel::WhatsApp => "from_number",
            Channel::Web => "user_id",
        };
        event[key] = Value::String(self.participant.clone());
        event
    }
}

/// Where a reply should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// WhatsApp phone number
    WhatsApp(String),
    /// Web participant (session/cookie id)
    Web(String),
}

/// Outbound send capability: fire-and-forget with synchronous error return.
#[async_trait]
pub trait OutboundPort: Send + Sync {
    async fn send(&self, tenant_id: &str, recipient: &Recipient, text: &str)
        -> Result<(), String>;
}

#[async_trait]
impl<T: OutboundPort + ?Sized> OutboundPort for std::sync::Arc<T> {
    async fn send(
        &self,
        tenant_id: &str,
        recipient: &Recipient,
        text: &str,
    ) -> Result<(), String> {
        (**self).send(tenant_id, recipient, text).await
    }
}

/// Production sender: WhatsApp goes out through the Graph API, web replies
/// are stored as agent messages on the conversation.
pub struct ChannelSender {
    db: Database,
    whatsapp: whatsapp::WhatsAppSender,
}

impl ChannelSender {
    pub fn new(db: Database, whatsapp: whatsapp::WhatsAppSender) -> Self {
        Self { db, whatsapp }
    }
}

#[async_trait]
impl OutboundPort for ChannelSender {
    async fn send(
        &self,
        tenant_id: &str,
        recipient: &Recipient,
        text: &str,
    ) -> Result<(), String> {
        match recipient {
            Recipient::WhatsApp(number) => self.whatsapp.send(tenant_id, number, text).await,
            Recipient::Web(participant) => {
                self.db
                    .store_message(&StoreMessage::new(tenant_id, participant, text, "agent", "web"))
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        }
    }
}
