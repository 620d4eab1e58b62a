//! CRM side-effect emitters
//!
//! Typed wrappers over the lead/ticket tables. Lead mutations journal
//! activities; a status change additionally surfaces a `lead_status_update`
//! event that the caller feeds back through the arbitration front door.

use crate::channels::{OutboundPort, Recipient};
use crate::db::{Database, DbResult, FieldChange, Lead, LeadInput, LeadUpdate, StoreMessage};
use serde_json::{json, Value};

/// A lead status transition other workflows may trigger on.
#[derive(Debug, Clone)]
pub struct LeadStatusChange {
    pub lead_id: i64,
    pub old_status: Option<String>,
    pub new_status: String,
    pub lead_name: Option<String>,
    pub lead_email: Option<String>,
    pub lead_phone: Option<String>,
}

impl LeadStatusChange {
    /// The trigger-event document for `lead_status_update` arbitration.
    pub fn to_trigger_event(&self, tenant_id: &str) -> Value {
        json!({
            "lead_id": self.lead_id,
            "tenant_id": tenant_id,
            "old_status": self.old_status,
            "new_status": self.new_status,
            "lead_name": self.lead_name,
            "lead_email": self.lead_email,
            "lead_phone": self.lead_phone,
        })
    }
}

/// Outcome of a reliable lead message send.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LeadMessageResult {
    pub success: bool,
    pub message_id: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct Crm {
    db: Database,
}

impl Crm {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new lead and journal its creation.
    pub fn save_lead(&self, tenant_id: &str, lead: &LeadInput, created_by: &str) -> DbResult<i64> {
        let lead_id = self.db.save_lead(tenant_id, lead)?;
        self.db.insert_lead_activity(
            tenant_id,
            lead_id,
            "lead_created",
            &json!({ "source": lead.source, "name": lead.name }),
            created_by,
        )?;
        tracing::info!(tenant = %tenant_id, lead_id, "Lead saved");
        Ok(lead_id)
    }

    /// Update a lead. Changed tracked fields are journaled inside the update
    /// transaction; a status change is returned for event fan-out.
    pub fn update_lead(
        &self,
        tenant_id: &str,
        lead_id: i64,
        update: &LeadUpdate,
        actor: &str,
    ) -> DbResult<(Lead, Option<LeadStatusChange>)> {
        let (lead, changes) = self.db.apply_lead_update(tenant_id, lead_id, update, actor)?;

        let status_change = changes
            .iter()
            .find(|c| c.field == "status")
            .map(|change: &FieldChange| LeadStatusChange {
                lead_id: lead.id,
                old_status: change.old.as_str().map(ToString::to_string),
                new_status: change.new.as_str().unwrap_or_default().to_string(),
                lead_name: lead.name.clone(),
                lead_email: lead.email.clone(),
                lead_phone: lead.phone.clone(),
            });

        Ok((lead, status_change))
    }

    pub fn log_activity(
        &self,
        tenant_id: &str,
        lead_id: i64,
        activity_type: &str,
        content: &Value,
        created_by: &str,
    ) -> DbResult<i64> {
        self.db
            .insert_lead_activity(tenant_id, lead_id, activity_type, content, created_by)
    }

    pub fn create_ticket(
        &self,
        tenant_id: &str,
        subject: &str,
        description: Option<&str>,
        priority: &str,
    ) -> DbResult<i64> {
        self.db.create_ticket(tenant_id, subject, description, priority)
    }

    /// Send a message to a lead with full reliability: the message row is
    /// written as `pending` first, then flipped to `sent`/`failed` after the
    /// transport attempt, and the outcome is journaled.
    pub async fn send_lead_message(
        &self,
        tenant_id: &str,
        lead_id: i64,
        text: &str,
        actor: &str,
        outbound: &dyn OutboundPort,
    ) -> DbResult<LeadMessageResult> {
        let lead = self.db.get_lead(tenant_id, lead_id)?;

        let (recipient, participant) = match (&lead.phone, &lead.conversation_id) {
            (Some(phone), _) => (Recipient::WhatsApp(phone.clone()), phone.clone()),
            (None, Some(convo)) => {
                // Stored conversation ids are "{tenant}:{participant}"
                let participant = convo
                    .strip_prefix(&format!("{tenant_id}:"))
                    .unwrap_or(convo)
                    .to_string();
                (Recipient::Web(participant.clone()), participant)
            }
            (None, None) => {
                return Ok(LeadMessageResult {
                    success: false,
                    message_id: 0,
                    status: "failed".to_string(),
                    error: Some("No contact method available".to_string()),
                });
            }
        };

        let channel = match &recipient {
            Recipient::WhatsApp(_) => "whatsapp",
            Recipient::Web(_) => "web",
        };
        let mut message = StoreMessage::new(tenant_id, &participant, text, "agent", channel);
        message.status = "pending";
        let message_id = self.db.store_message(&message)?;

        let send_result = outbound.send(tenant_id, &recipient, text).await;
        let (status, error) = match send_result {
            Ok(()) => ("sent", None),
            Err(e) => {
                tracing::error!(tenant = %tenant_id, lead_id, error = %e, "Lead message send failed");
                ("failed", Some(e))
            }
        };
        self.db.update_message_status(message_id, status)?;

        let mut content = json!({
            "message": text,
            "recipient": participant,
            "status": status,
        });
        if let Some(err) = &error {
            content["error"] = Value::String(err.clone());
        }
        self.db.insert_lead_activity(
            tenant_id,
            lead_id,
            if error.is_none() { "message_sent" } else { "message_failed" },
            &content,
            actor,
        )?;

        Ok(LeadMessageResult {
            success: error.is_none(),
            message_id,
            status: status.to_string(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TenantStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingOutbound {
        sends: Mutex<Vec<(String, Recipient, String)>>,
        fail: bool,
    }

    impl RecordingOutbound {
        fn new(fail: bool) -> Self {
            Self {
                sends: Mutex::new(Vec::new()),
                fail,
            }
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
            self.sends.lock().unwrap().push((
                tenant_id.to_string(),
                recipient.clone(),
                text.to_string(),
            ));
            if self.fail {
                Err("network down".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn setup() -> (Database, Crm) {
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("t1", Some("Acme"), TenantStatus::Active).unwrap();
        (db.clone(), Crm::new(db))
    }

    #[test]
    fn test_save_lead_journals_creation() {
        let (db, crm) = setup();
        let lead_id = crm
            .save_lead(
                "t1",
                &LeadInput {
                    name: Some("Jo".to_string()),
                    tags: json!([]),
                    custom_fields: json!({}),
                    ..Default::default()
                },
                "ai",
            )
            .unwrap();

        let activities = db.list_lead_activities("t1", lead_id).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, "lead_created");
        assert_eq!(activities[0].created_by, "ai");
    }

    #[test]
    fn test_status_change_surfaces_event() {
        let (_db, crm) = setup();
        let lead_id = crm
            .save_lead(
                "t1",
                &LeadInput {
                    tags: json!([]),
                    custom_fields: json!({}),
                    ..Default::default()
                },
                "system",
            )
            .unwrap();

        let update = LeadUpdate {
            status: Some("qualified".to_string()),
            ..Default::default()
        };
        let (_, change) = crm.update_lead("t1", lead_id, &update, "system").unwrap();
        let change = change.expect("status change expected");
        assert_eq!(change.new_status, "qualified");
        assert_eq!(change.old_status.as_deref(), Some("new"));

        let event = change.to_trigger_event("t1");
        assert_eq!(event["new_status"], json!("qualified"));
        assert_eq!(event["lead_id"], json!(lead_id));

        // Non-status update produces no event
        let update = LeadUpdate {
            notes: Some("called".to_string()),
            ..Default::default()
        };
        let (_, change) = crm.update_lead("t1", lead_id, &update, "system").unwrap();
        assert!(change.is_none());
    }

    #[tokio::test]
    async fn test_send_lead_message_success_path() {
        let (db, crm) = setup();
        let lead_id = crm
            .save_lead(
                "t1",
                &LeadInput {
                    phone: Some("15550001111".to_string()),
                    tags: json!([]),
                    custom_fields: json!({}),
                    ..Default::default()
                },
                "system",
            )
            .unwrap();

        let outbound = RecordingOutbound::new(false);
        let result = crm
            .send_lead_message("t1", lead_id, "hello!", "system", &outbound)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.status, "sent");

        let sends = outbound.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1, Recipient::WhatsApp("15550001111".to_string()));

        let activities = db.list_lead_activities("t1", lead_id).unwrap();
        assert!(activities.iter().any(|a| a.activity_type == "message_sent"));
    }

    #[tokio::test]
    async fn test_send_lead_message_failure_recorded() {
        let (db, crm) = setup();
        let lead_id = crm
            .save_lead(
                "t1",
                &LeadInput {
                    phone: Some("15550001111".to_string()),
                    tags: json!([]),
                    custom_fields: json!({}),
                    ..Default::default()
                },
                "system",
            )
            .unwrap();

        let outbound = RecordingOutbound::new(true);
        let result = crm
            .send_lead_message("t1", lead_id, "hello!", "system", &outbound)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, "failed");
        assert!(result.error.is_some());

        let history = db.get_chat_history("t1", "15550001111", 10).unwrap();
        assert_eq!(history[0].status, "failed");

        let activities = db.list_lead_activities("t1", lead_id).unwrap();
        assert!(activities.iter().any(|a| a.activity_type == "message_failed"));
    }

    #[tokio::test]
    async fn test_send_lead_message_without_contact() {
        let (_db, crm) = setup();
        let lead_id = crm
            .save_lead(
                "t1",
                &LeadInput {
                    tags: json!([]),
                    custom_fields: json!({}),
                    ..Default::default()
                },
                "system",
            )
            .unwrap();

        let outbound = RecordingOutbound::new(false);
        let result = crm
            .send_lead_message("t1", lead_id, "hello!", "system", &outbound)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No contact method available"));
        assert!(outbound.sends.lock().unwrap().is_empty());
    }
}
