//! WhatsApp (Meta Cloud API) adapter
//!
//! Normalizes webhook payloads into the engine's inbound shape and sends
//! outbound texts through the Graph API. Per-tenant credentials are decrypted
//! only here, inside the send path; the env-configured globals are the
//! fallback for tenants without their own number.

use crate::db::Database;
use crate::security::TokenCipher;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v17.0";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// A message lifted out of a Meta webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookMessage {
    pub from_number: String,
    pub body: String,
    /// Phone-number-id of the receiving business number (tenancy resolver key)
    pub phone_number_id: Option<String>,
}

/// Pull the first text message out of a Meta webhook payload, if any.
/// Status callbacks and non-text messages yield `None`.
pub fn parse_webhook_payload(payload: &Value) -> Option<WebhookMessage> {
    let value = payload
        .get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")?;

    let message = value.get("messages")?.get(0)?;
    let from_number = message.get("from")?.as_str()?.to_string();
    let body = message
        .get("text")
        .and_then(|t| t.get("body"))
        .and_then(Value::as_str)?
        .to_string();
    if body.is_empty() {
        return None;
    }

    let phone_number_id = value
        .get("metadata")
        .and_then(|m| m.get("phone_number_id"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Some(WebhookMessage {
        from_number,
        body,
        phone_number_id,
    })
}

/// Outbound Graph API sender.
pub struct WhatsAppSender {
    db: Database,
    cipher: TokenCipher,
    client: Client,
    default_api_token: Option<String>,
    default_phone_id: Option<String>,
    api_base: String,
}

impl WhatsAppSender {
    pub fn new(
        db: Database,
        cipher: TokenCipher,
        default_api_token: Option<String>,
        default_phone_id: Option<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            db,
            cipher,
            client,
            default_api_token,
            default_phone_id,
            api_base: GRAPH_API_BASE.to_string(),
        }
    }

    /// Resolve the tenant's credentials, falling back to the globals.
    fn resolve_credentials(&self, tenant_id: &str) -> Result<(String, String), String> {
        if let Ok(Some(config)) = self.db.get_whatsapp_config(tenant_id) {
            if config.is_active {
                let token = config
                    .access_token
                    .as_deref()
                    .map(|ct| self.cipher.decrypt(ct))
                    .transpose()
                    .map_err(|e| format!("credential decryption failed: {e}"))?;
                if let (Some(token), Some(phone_id)) = (token, config.phone_number_id) {
                    return Ok((token, phone_id));
                }
            }
        }
        match (&self.default_api_token, &self.default_phone_id) {
            (Some(token), Some(phone_id)) => Ok((token.clone(), phone_id.clone())),
            _ => Err(format!("WhatsApp credentials missing for tenant {tenant_id}")),
        }
    }

    pub async fn send(&self, tenant_id: &str, to_number: &str, text: &str) -> Result<(), String> {
        let (api_token, phone_id) = self.resolve_credentials(tenant_id)?;

        let url = format!("{}/{phone_id}/messages", self.api_base);
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to_number,
            "text": { "body": text }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("WhatsApp send failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "WhatsApp send failed");
            return Err(format!("WhatsApp send failed with status {status}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook(body: &str) -> Value {
        json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": { "phone_number_id": "PH1" },
                        "messages": [{
                            "from": "15550001111",
                            "text": { "body": body }
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn test_parse_text_message() {
        let parsed = parse_webhook_payload(&webhook("hello")).unwrap();
        assert_eq!(parsed.from_number, "15550001111");
        assert_eq!(parsed.body, "hello");
        assert_eq!(parsed.phone_number_id.as_deref(), Some("PH1"));
    }

    #[test]
    fn test_status_callback_ignored() {
        let payload = json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "x" }] } }] }]
        });
        assert!(parse_webhook_payload(&payload).is_none());
    }

    #[test]
    fn test_empty_body_ignored() {
        assert!(parse_webhook_payload(&webhook("")).is_none());
    }

    #[test]
    fn test_malformed_payload_ignored() {
        assert!(parse_webhook_payload(&json!({ "object": "whatsapp" })).is_none());
        assert!(parse_webhook_payload(&json!(null)).is_none());
    }

    #[tokio::test]
    async fn test_send_without_credentials_errors() {
        let db = Database::open_in_memory().unwrap();
        let sender = WhatsAppSender::new(db, TokenCipher::from_secret("s"), None, None);
        let err = sender.send("t1", "155500", "hi").await.unwrap_err();
        assert!(err.contains("credentials missing"));
    }

    #[tokio::test]
    async fn test_tenant_credentials_decrypted() {
        use crate::db::{TenantStatus, WhatsAppConfig};
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("t1", None, TenantStatus::Active).unwrap();
        let cipher = TokenCipher::from_secret("s");
        db.upsert_whatsapp_config(&WhatsAppConfig {
            tenant_id: "t1".to_string(),
            phone_number_id: Some("PH9".to_string()),
            business_account_id: None,
            app_id: None,
            app_secret: None,
            access_token: Some(cipher.encrypt("tenant-token").unwrap()),
            is_active: true,
        })
        .unwrap();

        let sender = WhatsAppSender::new(db, cipher, None, None);
        let (token, phone_id) = sender.resolve_credentials("t1").unwrap();
        assert_eq!(token, "tenant-token");
        assert_eq!(phone_id, "PH9");
    }
}
