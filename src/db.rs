//! Persistence layer
//!
//! Thread-safe sqlite handle behind repository methods. JSON documents
//! (workflow configs, execution context, activity content) are stored as
//! serialized text; timestamps are RFC 3339.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Lead not found: {0}")]
    LeadNotFound(i64),
    #[error("Appointment type not found: {0}")]
    AppointmentTypeNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Tenant Operations ====================

    pub fn create_tenant(
        &self,
        id: &str,
        name: Option<&str>,
        status: TenantStatus,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tenants (id, name, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_tenant(&self, id: &str) -> DbResult<Tenant> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, status, plan_name, trial_end_at, created_at FROM tenants WHERE id = ?1",
            params![id],
            |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    status: TenantStatus::parse(&row.get::<_, String>(2)?),
                    plan_name: row.get(3)?,
                    trial_end_at: row.get::<_, Option<String>>(4)?.map(|s| parse_datetime(&s)),
                    created_at: parse_datetime(&row.get::<_, String>(5)?),
                })
            },
        )
        .optional()?
        .ok_or_else(|| DbError::TenantNotFound(id.to_string()))
    }

    pub fn set_tenant_status(&self, id: &str, status: TenantStatus) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tenants SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(DbError::TenantNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_tenant_trial(&self, id: &str, trial_end_at: DateTime<Utc>) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tenants SET status = 'trial', trial_start_at = ?1, trial_end_at = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), trial_end_at.to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(DbError::TenantNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== Business Profile ====================

    /// Joined tenant + settings view. Missing settings yield an empty profile
    /// carrying just the tenant name.
    pub fn get_business_profile(&self, tenant_id: &str) -> DbResult<BusinessProfile> {
        let conn = self.conn.lock().unwrap();
        let profile = conn
            .query_row(
                "SELECT t.name, s.industry, s.description, s.services, s.tone, s.faq,
                        s.custom_instructions, s.location, s.hours
                 FROM tenants t
                 LEFT JOIN business_settings s ON s.tenant_id = t.id
                 WHERE t.id = ?1",
                params![tenant_id],
                |row| {
                    Ok(BusinessProfile {
                        name: row.get(0)?,
                        industry: row.get(1)?,
                        description: row.get(2)?,
                        services: row.get(3)?,
                        tone: row.get(4)?,
                        faq: row.get(5)?,
                        custom_instructions: row.get(6)?,
                        location: row.get(7)?,
                        hours: row.get(8)?,
                        knowledge_docs: Vec::new(),
                    })
                },
            )
            .optional()?;
        profile.ok_or_else(|| DbError::TenantNotFound(tenant_id.to_string()))
    }

    pub fn update_business_settings(&self, tenant_id: &str, update: &SettingsUpdate) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        if let Some(name) = &update.name {
            tx.execute(
                "UPDATE tenants SET name = ?1 WHERE id = ?2",
                params![name, tenant_id],
            )?;
        }

        tx.execute(
            "INSERT INTO business_settings
                 (tenant_id, industry, description, services, tone, faq,
                  custom_instructions, location, hours, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 industry = COALESCE(excluded.industry, industry),
                 description = COALESCE(excluded.description, description),
                 services = COALESCE(excluded.services, services),
                 tone = COALESCE(excluded.tone, tone),
                 faq = COALESCE(excluded.faq, faq),
                 custom_instructions = COALESCE(excluded.custom_instructions, custom_instructions),
                 location = COALESCE(excluded.location, location),
                 hours = COALESCE(excluded.hours, hours),
                 updated_at = excluded.updated_at",
            params![
                tenant_id,
                update.industry,
                update.description,
                update.services,
                update.tone,
                update.faq,
                update.custom_instructions,
                update.location,
                update.hours,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Knowledge Base ====================

    pub fn list_knowledge_docs(&self, tenant_id: &str) -> DbResult<Vec<KnowledgeDoc>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, doc_type, title, content FROM knowledge_docs WHERE tenant_id = ?1",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok(KnowledgeDoc {
                id: row.get(0)?,
                doc_type: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn add_knowledge_doc(
        &self,
        tenant_id: &str,
        doc_type: &str,
        title: &str,
        content: &str,
    ) -> DbResult<String> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO knowledge_docs (id, tenant_id, doc_type, title, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, tenant_id, doc_type, title, content, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn delete_knowledge_doc(&self, tenant_id: &str, doc_id: &str) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM knowledge_docs WHERE id = ?1 AND tenant_id = ?2",
            params![doc_id, tenant_id],
        )?;
        Ok(deleted > 0)
    }

    // ==================== Conversations & Messages ====================

    /// Store a message, creating the conversation row when absent.
    ///
    /// Conversations are keyed `"{tenant}:{participant}"` so the same web
    /// visitor id never collides across tenants.
    pub fn store_message(&self, msg: &StoreMessage<'_>) -> DbResult<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let convo_id = conversation_id(msg.tenant_id, msg.participant);
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO conversations (id, tenant_id, customer_name, channel)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO NOTHING",
            params![convo_id, msg.tenant_id, msg.participant, msg.channel],
        )?;

        tx.execute(
            "INSERT INTO messages
                 (tenant_id, conversation_id, text, sender, channel, status, intent, sentiment, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.tenant_id,
                convo_id,
                msg.text,
                msg.sender,
                msg.channel,
                msg.status,
                msg.intent,
                msg.sentiment,
                now,
            ],
        )?;
        let message_id = tx.last_insert_rowid();

        let unread_sql = if msg.sender == "customer" {
            "unread_count + 1"
        } else {
            "0"
        };
        tx.execute(
            &format!(
                "UPDATE conversations SET
                     last_message = ?1,
                     last_timestamp = ?2,
                     channel = ?3,
                     unread_count = {unread_sql},
                     last_intent = COALESCE(?4, last_intent),
                     last_sentiment = COALESCE(?5, last_sentiment)
                 WHERE id = ?6"
            ),
            params![msg.text, now, msg.channel, msg.intent, msg.sentiment, convo_id],
        )?;

        tx.commit()?;
        Ok(message_id)
    }

    pub fn update_message_status(&self, message_id: i64, status: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status, message_id],
        )?;
        Ok(())
    }

    /// Chat history in chronological order.
    pub fn get_chat_history(
        &self,
        tenant_id: &str,
        participant: &str,
        limit: i64,
    ) -> DbResult<Vec<MessageRow>> {
        let conn = self.conn.lock().unwrap();
        let convo_id = conversation_id(tenant_id, participant);
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, text, sender, channel, status, intent, sentiment, timestamp
             FROM messages WHERE tenant_id = ?1 AND conversation_id = ?2
             ORDER BY timestamp DESC, id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![tenant_id, convo_id, limit], map_message)?;
        let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub fn list_recent_conversations(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> DbResult<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, customer_name, channel, last_message, last_timestamp,
                    unread_count, last_intent, last_sentiment
             FROM conversations WHERE tenant_id = ?1
             ORDER BY last_timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant_id, limit], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                customer_name: row.get(2)?,
                channel: row.get(3)?,
                last_message: row.get(4)?,
                last_timestamp: row.get::<_, Option<String>>(5)?.map(|s| parse_datetime(&s)),
                unread_count: row.get(6)?,
                last_intent: row.get(7)?,
                last_sentiment: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Workflow Operations ====================

    /// Persist a validated workflow with its nodes and edges in one commit.
    pub fn insert_workflow(
        &self,
        id: &str,
        tenant_id: &str,
        def: &crate::workflow::WorkflowDefinition,
    ) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO workflows
                 (id, tenant_id, name, description, is_active, trigger_kind, trigger_config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?7)",
            params![
                id,
                tenant_id,
                def.name,
                def.description,
                def.trigger_type,
                def.trigger_config.to_string(),
                now,
            ],
        )?;

        for node in &def.nodes {
            tx.execute(
                "INSERT INTO workflow_nodes (id, workflow_id, kind, label, config, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    node.id,
                    id,
                    node.kind,
                    node.label,
                    node.config.to_string(),
                    node.position.as_ref().map(ToString::to_string),
                ],
            )?;
        }

        for edge in &def.edges {
            tx.execute(
                "INSERT INTO workflow_edges (id, workflow_id, source_id, target_id, guard)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    id,
                    edge.source,
                    edge.target,
                    edge.condition,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn list_workflows(&self, tenant_id: &str) -> DbResult<Vec<WorkflowRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, description, is_active, trigger_kind, trigger_config, created_at
             FROM workflows WHERE tenant_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![tenant_id], map_workflow)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn get_workflow(&self, tenant_id: &str, id: &str) -> DbResult<WorkflowRow> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant_id, name, description, is_active, trigger_kind, trigger_config, created_at
             FROM workflows WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id],
            map_workflow,
        )
        .optional()?
        .ok_or_else(|| DbError::WorkflowNotFound(id.to_string()))
    }

    /// Delete a workflow; nodes, edges and executions cascade.
    pub fn delete_workflow(&self, tenant_id: &str, id: &str) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM workflows WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id],
        )?;
        Ok(deleted > 0)
    }

    /// Active workflows whose trigger kind is in `kinds`.
    pub fn find_active_workflows(
        &self,
        tenant_id: &str,
        kinds: &[&str],
    ) -> DbResult<Vec<WorkflowRow>> {
        let conn = self.conn.lock().unwrap();
        let placeholders = kinds
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, tenant_id, name, description, is_active, trigger_kind, trigger_config, created_at
             FROM workflows WHERE tenant_id = ?1 AND is_active = 1 AND trigger_kind IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&tenant_id];
        for kind in kinds {
            values.push(kind);
        }
        let rows = stmt.query_map(values.as_slice(), map_workflow)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn get_node(&self, id: &str) -> DbResult<NodeRow> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, workflow_id, kind, label, config FROM workflow_nodes WHERE id = ?1",
            params![id],
            map_node,
        )
        .optional()?
        .ok_or_else(|| DbError::NodeNotFound(id.to_string()))
    }

    pub fn get_start_node(&self, workflow_id: &str) -> DbResult<Option<NodeRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, workflow_id, kind, label, config
             FROM workflow_nodes WHERE workflow_id = ?1 AND kind = 'start'",
            params![workflow_id],
            map_node,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn outgoing_edges(&self, source_id: &str) -> DbResult<Vec<EdgeRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, source_id, target_id, guard
             FROM workflow_edges WHERE source_id = ?1",
        )?;
        let rows = stmt.query_map(params![source_id], |row| {
            Ok(EdgeRow {
                id: row.get(0)?,
                workflow_id: row.get(1)?,
                source_id: row.get(2)?,
                target_id: row.get(3)?,
                guard: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Execution Operations ====================

    pub fn insert_execution(
        &self,
        id: &str,
        workflow_id: &str,
        tenant_id: &str,
        trigger_event: &Value,
        context: &Value,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO executions (id, workflow_id, tenant_id, status, trigger_event, context, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4, ?5, ?6)",
            params![
                id,
                workflow_id,
                tenant_id,
                trigger_event.to_string(),
                context.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> DbResult<ExecutionRow> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, workflow_id, tenant_id, status, trigger_event, context, resume_payload,
                    started_at, completed_at, error_message
             FROM executions WHERE id = ?1",
            params![id],
            map_execution,
        )
        .optional()?
        .ok_or_else(|| DbError::ExecutionNotFound(id.to_string()))
    }

    pub fn list_executions(
        &self,
        tenant_id: &str,
        workflow_id: Option<&str>,
        limit: i64,
    ) -> DbResult<Vec<ExecutionRow>> {
        let conn = self.conn.lock().unwrap();
        let mut rows = Vec::new();
        match workflow_id {
            Some(wf) => {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, tenant_id, status, trigger_event, context, resume_payload,
                            started_at, completed_at, error_message
                     FROM executions WHERE tenant_id = ?1 AND workflow_id = ?2
                     ORDER BY started_at DESC LIMIT ?3",
                )?;
                let mapped = stmt.query_map(params![tenant_id, wf, limit], map_execution)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, tenant_id, status, trigger_event, context, resume_payload,
                            started_at, completed_at, error_message
                     FROM executions WHERE tenant_id = ?1
                     ORDER BY started_at DESC LIMIT ?2",
                )?;
                let mapped = stmt.query_map(params![tenant_id, limit], map_execution)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        Ok(rows)
    }

    pub fn update_execution_context(&self, id: &str, context: &Value) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE executions SET context = ?1 WHERE id = ?2",
            params![context.to_string(), id],
        )?;
        if updated == 0 {
            return Err(DbError::ExecutionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Park an execution until a correlated event arrives.
    pub fn suspend_execution(
        &self,
        id: &str,
        context: &Value,
        resume_payload: &Value,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE executions SET status = 'suspended', context = ?1, resume_payload = ?2 WHERE id = ?3",
            params![context.to_string(), resume_payload.to_string(), id],
        )?;
        if updated == 0 {
            return Err(DbError::ExecutionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Wake a suspended execution: back to running, suspension cleared.
    pub fn resume_execution(&self, id: &str, context: &Value) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE executions SET status = 'running', context = ?1, resume_payload = NULL WHERE id = ?2",
            params![context.to_string(), id],
        )?;
        if updated == 0 {
            return Err(DbError::ExecutionNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn complete_execution(&self, id: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE executions SET status = 'completed', completed_at = ?1
             WHERE id = ?2 AND status NOT IN ('completed', 'failed')",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn fail_execution(&self, id: &str, error: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE executions SET status = 'failed', completed_at = ?1, error_message = ?2
             WHERE id = ?3 AND status NOT IN ('completed', 'failed')",
            params![Utc::now().to_rfc3339(), error, id],
        )?;
        Ok(())
    }

    pub fn find_suspended_executions(&self, tenant_id: &str) -> DbResult<Vec<ExecutionRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, tenant_id, status, trigger_event, context, resume_payload,
                    started_at, completed_at, error_message
             FROM executions WHERE tenant_id = ?1 AND status = 'suspended'
             ORDER BY started_at ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id], map_execution)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Step Operations ====================

    pub fn insert_step(&self, execution_id: &str, node_id: &str, input: &Value) -> DbResult<String> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO execution_steps (id, execution_id, node_id, status, input, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4, ?5)",
            params![id, execution_id, node_id, input.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn finish_step(
        &self,
        step_id: &str,
        status: StepStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE execution_steps SET status = ?1, output = ?2, error = ?3, completed_at = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                output.map(ToString::to_string),
                error,
                Utc::now().to_rfc3339(),
                step_id,
            ],
        )?;
        Ok(())
    }

    pub fn list_steps(&self, execution_id: &str) -> DbResult<Vec<StepRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, node_id, status, output, error, started_at, completed_at
             FROM execution_steps WHERE execution_id = ?1 ORDER BY started_at ASC",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok(StepRow {
                id: row.get(0)?,
                execution_id: row.get(1)?,
                node_id: row.get(2)?,
                status: StepStatus::parse(&row.get::<_, String>(3)?),
                output: row.get::<_, Option<String>>(4)?.map(|s| json_or_null(&s)),
                error: row.get(5)?,
                started_at: parse_datetime(&row.get::<_, String>(6)?),
                completed_at: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Task Queue ====================

    pub fn enqueue_task(
        &self,
        execution_id: &str,
        node_id: &str,
        run_at: DateTime<Utc>,
    ) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (execution_id, node_id, run_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![execution_id, node_id, run_at.to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomically claim due tasks. The status flip and the read happen in one
    /// statement so two pollers never claim the same row.
    pub fn claim_due_tasks(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<TaskRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "UPDATE tasks SET status = 'claimed'
             WHERE id IN (
                 SELECT id FROM tasks WHERE status = 'queued' AND run_at <= ?1
                 ORDER BY run_at ASC LIMIT ?2
             )
             RETURNING id, execution_id, node_id, run_at",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339(), limit], |row| {
            Ok(TaskRow {
                id: row.get(0)?,
                execution_id: row.get(1)?,
                node_id: row.get(2)?,
                run_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn finish_task(&self, task_id: i64) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }

    /// Return claimed-but-unfinished tasks to the queue. Run at startup so a
    /// crash mid-step re-dispatches (at-least-once).
    pub fn reset_claimed_tasks(&self) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("UPDATE tasks SET status = 'queued' WHERE status = 'claimed'", [])?;
        Ok(n)
    }

    pub fn pending_task_count(&self) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM tasks WHERE status = 'queued'", [], |row| {
            row.get(0)
        })
        .map_err(DbError::from)
    }

    // ==================== CRM: Leads ====================

    pub fn save_lead(&self, tenant_id: &str, lead: &LeadInput) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO leads
                 (tenant_id, name, contact, email, phone, source, notes, status, tags,
                  custom_fields, conversation_id, value, last_interaction_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                tenant_id,
                lead.name,
                lead.contact,
                lead.email,
                lead.phone,
                lead.source,
                lead.notes,
                lead.status.as_deref().unwrap_or("new"),
                lead.tags.to_string(),
                lead.custom_fields.to_string(),
                lead.conversation_id,
                lead.value,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_lead(&self, tenant_id: &str, lead_id: i64) -> DbResult<Lead> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant_id, name, contact, email, phone, source, notes, status, tags,
                    custom_fields, conversation_id, value, created_at
             FROM leads WHERE id = ?1 AND tenant_id = ?2",
            params![lead_id, tenant_id],
            map_lead,
        )
        .optional()?
        .ok_or(DbError::LeadNotFound(lead_id))
    }

    pub fn list_leads(&self, tenant_id: &str) -> DbResult<Vec<Lead>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, contact, email, phone, source, notes, status, tags,
                    custom_fields, conversation_id, value, created_at
             FROM leads WHERE tenant_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![tenant_id], map_lead)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Apply a lead update, journaling one activity per changed tracked field
    /// (`status`, `value`, `tags`) in the same transaction. Returns the
    /// changes so callers can raise follow-on events.
    pub fn apply_lead_update(
        &self,
        tenant_id: &str,
        lead_id: i64,
        update: &LeadUpdate,
        actor: &str,
    ) -> DbResult<(Lead, Vec<FieldChange>)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let lead = tx
            .query_row(
                "SELECT id, tenant_id, name, contact, email, phone, source, notes, status, tags,
                        custom_fields, conversation_id, value, created_at
                 FROM leads WHERE id = ?1 AND tenant_id = ?2",
                params![lead_id, tenant_id],
                map_lead,
            )
            .optional()?
            .ok_or(DbError::LeadNotFound(lead_id))?;

        let mut changes = Vec::new();
        if let Some(status) = &update.status {
            if *status != lead.status {
                changes.push(FieldChange {
                    field: "status",
                    old: Value::String(lead.status.clone()),
                    new: Value::String(status.clone()),
                });
            }
        }
        if let Some(value) = update.value {
            if Some(value) != lead.value {
                changes.push(FieldChange {
                    field: "value",
                    old: lead.value.map_or(Value::Null, Value::from),
                    new: Value::from(value),
                });
            }
        }
        if let Some(tags) = &update.tags {
            if *tags != lead.tags {
                changes.push(FieldChange {
                    field: "tags",
                    old: lead.tags.clone(),
                    new: tags.clone(),
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE leads SET
                 name = COALESCE(?1, name),
                 email = COALESCE(?2, email),
                 phone = COALESCE(?3, phone),
                 notes = COALESCE(?4, notes),
                 status = COALESCE(?5, status),
                 value = COALESCE(?6, value),
                 tags = COALESCE(?7, tags),
                 last_interaction_at = ?8
             WHERE id = ?9",
            params![
                update.name,
                update.email,
                update.phone,
                update.notes,
                update.status,
                update.value,
                update.tags.as_ref().map(ToString::to_string),
                now,
                lead_id,
            ],
        )?;

        for change in &changes {
            tx.execute(
                "INSERT INTO lead_activities (lead_id, tenant_id, activity_type, content, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    lead_id,
                    tenant_id,
                    format!("{}_change", change.field),
                    serde_json::json!({ "old": change.old, "new": change.new }).to_string(),
                    actor,
                    now,
                ],
            )?;
        }

        let updated = tx.query_row(
            "SELECT id, tenant_id, name, contact, email, phone, source, notes, status, tags,
                    custom_fields, conversation_id, value, created_at
             FROM leads WHERE id = ?1",
            params![lead_id],
            map_lead,
        )?;
        tx.commit()?;
        Ok((updated, changes))
    }

    pub fn insert_lead_activity(
        &self,
        tenant_id: &str,
        lead_id: i64,
        activity_type: &str,
        content: &Value,
        created_by: &str,
    ) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO lead_activities (lead_id, tenant_id, activity_type, content, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                lead_id,
                tenant_id,
                activity_type,
                content.to_string(),
                created_by,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_lead_activities(&self, tenant_id: &str, lead_id: i64) -> DbResult<Vec<LeadActivity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, lead_id, activity_type, content, created_by, created_at
             FROM lead_activities WHERE lead_id = ?1 AND tenant_id = ?2
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![lead_id, tenant_id], |row| {
            Ok(LeadActivity {
                id: row.get(0)?,
                lead_id: row.get(1)?,
                activity_type: row.get(2)?,
                content: json_or_null(&row.get::<_, String>(3)?),
                created_by: row.get(4)?,
                created_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== CRM: Tickets ====================

    pub fn create_ticket(
        &self,
        tenant_id: &str,
        subject: &str,
        description: Option<&str>,
        priority: &str,
    ) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tickets (tenant_id, subject, description, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tenant_id, subject, description, priority, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn assign_ticket(&self, tenant_id: &str, ticket_id: i64, agent_id: &str) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tickets SET status = 'assigned',
                    description = COALESCE(description, '') || ?1
             WHERE id = ?2 AND tenant_id = ?3",
            params![format!(" [Assigned to {agent_id}]"), ticket_id, tenant_id],
        )?;
        Ok(updated > 0)
    }

    // ==================== Scheduling ====================

    pub fn create_appointment_type(
        &self,
        tenant_id: &str,
        name: &str,
        description: Option<&str>,
        duration_minutes: i64,
    ) -> DbResult<String> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO appointment_types (id, tenant_id, name, description, duration_minutes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, tenant_id, name, description, duration_minutes, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn get_appointment_type(&self, tenant_id: &str, id: &str) -> DbResult<AppointmentType> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant_id, name, description, duration_minutes, is_active
             FROM appointment_types WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id],
            map_appointment_type,
        )
        .optional()?
        .ok_or_else(|| DbError::AppointmentTypeNotFound(id.to_string()))
    }

    pub fn list_appointment_types(&self, tenant_id: &str) -> DbResult<Vec<AppointmentType>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, description, duration_minutes, is_active
             FROM appointment_types WHERE tenant_id = ?1",
        )?;
        let rows = stmt.query_map(params![tenant_id], map_appointment_type)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn first_active_appointment_type(&self, tenant_id: &str) -> DbResult<Option<AppointmentType>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tenant_id, name, description, duration_minutes, is_active
             FROM appointment_types WHERE tenant_id = ?1 AND is_active = 1 LIMIT 1",
            params![tenant_id],
            map_appointment_type,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn create_availability_rule(
        &self,
        tenant_id: &str,
        day_of_week: u32,
        start_time: &str,
        end_time: &str,
    ) -> DbResult<String> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO availability_rules (id, tenant_id, day_of_week, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, tenant_id, day_of_week, start_time, end_time],
        )?;
        Ok(id)
    }

    /// Active rules for one weekday (0 = Monday).
    pub fn availability_rules_for_day(
        &self,
        tenant_id: &str,
        day_of_week: u32,
    ) -> DbResult<Vec<AvailabilityRule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, day_of_week, start_time, end_time, is_active
             FROM availability_rules
             WHERE tenant_id = ?1 AND day_of_week = ?2 AND is_active = 1",
        )?;
        let rows = stmt.query_map(params![tenant_id, day_of_week], map_availability_rule)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn list_availability_rules(&self, tenant_id: &str) -> DbResult<Vec<AvailabilityRule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, day_of_week, start_time, end_time, is_active
             FROM availability_rules WHERE tenant_id = ?1 ORDER BY day_of_week, start_time",
        )?;
        let rows = stmt.query_map(params![tenant_id], map_availability_rule)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Appointments overlapping the given day in blocking statuses.
    pub fn appointments_for_day(
        &self,
        tenant_id: &str,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> DbResult<Vec<Appointment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, lead_id, conversation_id, appointment_type_id,
                    start_at, end_at, status, notes
             FROM appointments
             WHERE tenant_id = ?1 AND start_at >= ?2 AND start_at <= ?3
               AND status IN ('scheduled', 'confirmed')",
        )?;
        let rows = stmt.query_map(
            params![tenant_id, day_start.to_rfc3339(), day_end.to_rfc3339()],
            map_appointment,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Insert an appointment iff no blocking appointment overlaps the
    /// interval. The re-check and insert share one transaction, so two
    /// concurrent bookings of the same slot cannot both succeed.
    pub fn book_appointment_checked(&self, apt: &AppointmentInsert<'_>) -> DbResult<Option<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let conflicts: i64 = tx.query_row(
            "SELECT COUNT(*) FROM appointments
             WHERE tenant_id = ?1 AND status IN ('scheduled', 'confirmed')
               AND start_at < ?2 AND end_at > ?3",
            params![apt.tenant_id, apt.end_at.to_rfc3339(), apt.start_at.to_rfc3339()],
            |row| row.get(0),
        )?;
        if conflicts > 0 {
            return Ok(None);
        }

        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO appointments
                 (id, tenant_id, lead_id, conversation_id, appointment_type_id,
                  start_at, end_at, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                apt.tenant_id,
                apt.lead_id,
                apt.conversation_id,
                apt.appointment_type_id,
                apt.start_at.to_rfc3339(),
                apt.end_at.to_rfc3339(),
                apt.notes,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if let Some(lead_id) = apt.lead_id {
            tx.execute(
                "INSERT INTO lead_activities (lead_id, tenant_id, activity_type, content, created_by, created_at)
                 VALUES (?1, ?2, 'appointment_booked', ?3, 'system', ?4)",
                params![
                    lead_id,
                    apt.tenant_id,
                    serde_json::json!({
                        "appointment_id": id,
                        "start_at": apt.start_at.to_rfc3339(),
                    })
                    .to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(Some(id))
    }

    pub fn list_appointments(&self, tenant_id: &str, lead_id: Option<i64>) -> DbResult<Vec<Appointment>> {
        let conn = self.conn.lock().unwrap();
        let mut rows = Vec::new();
        match lead_id {
            Some(lead) => {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, lead_id, conversation_id, appointment_type_id,
                            start_at, end_at, status, notes
                     FROM appointments WHERE tenant_id = ?1 AND lead_id = ?2 ORDER BY start_at ASC",
                )?;
                let mapped = stmt.query_map(params![tenant_id, lead], map_appointment)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, tenant_id, lead_id, conversation_id, appointment_type_id,
                            start_at, end_at, status, notes
                     FROM appointments WHERE tenant_id = ?1 ORDER BY start_at ASC",
                )?;
                let mapped = stmt.query_map(params![tenant_id], map_appointment)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        Ok(rows)
    }

    // ==================== WhatsApp Configuration ====================

    pub fn get_whatsapp_config(&self, tenant_id: &str) -> DbResult<Option<WhatsAppConfig>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT tenant_id, phone_number_id, business_account_id, app_id, app_secret,
                    access_token, is_active
             FROM whatsapp_configs WHERE tenant_id = ?1",
            params![tenant_id],
            map_whatsapp_config,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn upsert_whatsapp_config(&self, config: &WhatsAppConfig) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO whatsapp_configs
                 (tenant_id, phone_number_id, business_account_id, app_id, app_secret, access_token, is_active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 phone_number_id = COALESCE(excluded.phone_number_id, phone_number_id),
                 business_account_id = COALESCE(excluded.business_account_id, business_account_id),
                 app_id = COALESCE(excluded.app_id, app_id),
                 app_secret = COALESCE(excluded.app_secret, app_secret),
                 access_token = COALESCE(excluded.access_token, access_token),
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
            params![
                config.tenant_id,
                config.phone_number_id,
                config.business_account_id,
                config.app_id,
                config.app_secret,
                config.access_token,
                config.is_active,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Tenancy resolver for webhook ingress.
    pub fn find_tenant_by_phone_number_id(&self, phone_number_id: &str) -> DbResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT tenant_id FROM whatsapp_configs WHERE phone_number_id = ?1",
            params![phone_number_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(DbError::from)
    }

    // ==================== Prompt Execution Log ====================

    pub fn insert_prompt_execution(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        messages: &Value,
        response: &str,
        model: &str,
    ) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO prompt_executions (tenant_id, user_id, messages, response, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tenant_id,
                user_id,
                messages.to_string(),
                response,
                model,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

/// Composite conversation key; prevents cross-tenant collision of web ids.
pub fn conversation_id(tenant_id: &str, participant: &str) -> String {
    format!("{tenant_id}:{participant}")
}

// ============================================================================
// Input types
// ============================================================================

/// Message insert parameters.
#[derive(Debug, Clone, Copy)]
pub struct StoreMessage<'a> {
    pub tenant_id: &'a str,
    pub participant: &'a str,
    pub text: &'a str,
    /// "customer" or "agent"
    pub sender: &'a str,
    pub channel: &'a str,
    pub status: &'a str,
    pub intent: Option<&'a str>,
    pub sentiment: Option<&'a str>,
}

impl<'a> StoreMessage<'a> {
    pub fn new(
        tenant_id: &'a str,
        participant: &'a str,
        text: &'a str,
        sender: &'a str,
        channel: &'a str,
    ) -> Self {
        Self {
            tenant_id,
            participant,
            text,
            sender,
            channel,
            status: "sent",
            intent: None,
            sentiment: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeadInput {
    pub name: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub tags: Value,
    pub custom_fields: Value,
    pub conversation_id: Option<String>,
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LeadUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub value: Option<i64>,
    pub tags: Option<Value>,
}

/// One tracked-field change produced by `apply_lead_update`.
#[derive(Debug, Clone)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SettingsUpdate {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub services: Option<String>,
    pub tone: Option<String>,
    pub faq: Option<String>,
    pub custom_instructions: Option<String>,
    pub location: Option<String>,
    pub hours: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct AppointmentInsert<'a> {
    pub tenant_id: &'a str,
    pub lead_id: Option<i64>,
    pub conversation_id: Option<&'a str>,
    pub appointment_type_id: &'a str,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub notes: Option<&'a str>,
}

// ============================================================================
// Row mappers
// ============================================================================

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        text: row.get(2)?,
        sender: row.get(3)?,
        channel: row.get(4)?,
        status: row.get(5)?,
        intent: row.get(6)?,
        sentiment: row.get(7)?,
        timestamp: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn map_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        trigger_kind: row.get(5)?,
        trigger_config: json_or_null(&row.get::<_, String>(6)?),
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn map_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        kind: row.get(2)?,
        label: row.get(3)?,
        config: json_or_null(&row.get::<_, String>(4)?),
    })
}

fn map_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        tenant_id: row.get(2)?,
        status: ExecutionStatus::parse(&row.get::<_, String>(3)?),
        trigger_event: json_or_null(&row.get::<_, String>(4)?),
        context: json_or_null(&row.get::<_, String>(5)?),
        resume_payload: row.get::<_, Option<String>>(6)?.map(|s| json_or_null(&s)),
        started_at: parse_datetime(&row.get::<_, String>(7)?),
        completed_at: row.get::<_, Option<String>>(8)?.map(|s| parse_datetime(&s)),
        error_message: row.get(9)?,
    })
}

fn map_lead(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        contact: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        source: row.get(6)?,
        notes: row.get(7)?,
        status: row.get(8)?,
        tags: json_or_null(&row.get::<_, String>(9)?),
        custom_fields: json_or_null(&row.get::<_, String>(10)?),
        conversation_id: row.get(11)?,
        value: row.get(12)?,
        created_at: parse_datetime(&row.get::<_, String>(13)?),
    })
}

fn map_appointment_type(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppointmentType> {
    Ok(AppointmentType {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        duration_minutes: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn map_availability_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<AvailabilityRule> {
    Ok(AvailabilityRule {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        day_of_week: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn map_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        lead_id: row.get(2)?,
        conversation_id: row.get(3)?,
        appointment_type_id: row.get(4)?,
        start_at: parse_datetime(&row.get::<_, String>(5)?),
        end_at: parse_datetime(&row.get::<_, String>(6)?),
        status: row.get(7)?,
        notes: row.get(8)?,
    })
}

fn map_whatsapp_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<WhatsAppConfig> {
    Ok(WhatsAppConfig {
        tenant_id: row.get(0)?,
        phone_number_id: row.get(1)?,
        business_account_id: row.get(2)?,
        app_id: row.get(3)?,
        app_secret: row.get(4)?,
        access_token: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_or_null(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db_with_tenant() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("t1", Some("Acme"), TenantStatus::Active).unwrap();
        db
    }

    #[test]
    fn test_store_message_creates_conversation() {
        let db = db_with_tenant();
        let id = db
            .store_message(&StoreMessage::new("t1", "visitor-1", "hello", "customer", "web"))
            .unwrap();
        assert!(id > 0);

        let history = db.get_chat_history("t1", "visitor-1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hello");

        let convos = db.list_recent_conversations("t1", 10).unwrap();
        assert_eq!(convos.len(), 1);
        assert_eq!(convos[0].id, "t1:visitor-1");
        assert_eq!(convos[0].unread_count, 1);
    }

    #[test]
    fn test_same_participant_two_tenants_distinct_conversations() {
        let db = db_with_tenant();
        db.create_tenant("t2", Some("Beta"), TenantStatus::Active).unwrap();

        db.store_message(&StoreMessage::new("t1", "visitor-1", "for t1", "customer", "web"))
            .unwrap();
        db.store_message(&StoreMessage::new("t2", "visitor-1", "for t2", "customer", "web"))
            .unwrap();

        let h1 = db.get_chat_history("t1", "visitor-1", 10).unwrap();
        let h2 = db.get_chat_history("t2", "visitor-1", 10).unwrap();
        assert_eq!(h1.len(), 1);
        assert_eq!(h2.len(), 1);
        assert_eq!(h1[0].text, "for t1");
        assert_eq!(h2[0].text, "for t2");
    }

    #[test]
    fn test_agent_message_resets_unread() {
        let db = db_with_tenant();
        db.store_message(&StoreMessage::new("t1", "v", "hi", "customer", "web")).unwrap();
        db.store_message(&StoreMessage::new("t1", "v", "yo", "customer", "web")).unwrap();
        db.store_message(&StoreMessage::new("t1", "v", "hello!", "agent", "web")).unwrap();
        let convos = db.list_recent_conversations("t1", 10).unwrap();
        assert_eq!(convos[0].unread_count, 0);
    }

    #[test]
    fn test_workflow_roundtrip_and_cascade() {
        let db = db_with_tenant();
        let def: crate::workflow::WorkflowDefinition = serde_json::from_value(json!({
            "name": "Pricing",
            "trigger_type": "keyword",
            "trigger_config": { "keyword": "pricing" },
            "nodes": [
                { "id": "n1", "type": "start", "config": {} },
                { "id": "n2", "type": "action", "config": { "template": "Hi" } }
            ],
            "edges": [ { "source": "n1", "target": "n2" } ]
        }))
        .unwrap();
        db.insert_workflow("wf1", "t1", &def).unwrap();

        let listed = db.list_workflows("t1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].trigger_kind, "keyword");

        let start = db.get_start_node("wf1").unwrap().unwrap();
        assert_eq!(start.id, "n1");
        let edges = db.outgoing_edges("n1").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, "n2");

        assert!(db.delete_workflow("t1", "wf1").unwrap());
        assert!(db.get_start_node("wf1").unwrap().is_none());
        assert!(db.get_node("n2").is_err());
    }

    #[test]
    fn test_execution_lifecycle() {
        let db = db_with_tenant();
        let def: crate::workflow::WorkflowDefinition = serde_json::from_value(json!({
            "name": "wf", "trigger_type": "manual",
            "nodes": [ { "id": "s", "type": "start", "config": {} } ],
            "edges": []
        }))
        .unwrap();
        db.insert_workflow("wf1", "t1", &def).unwrap();

        db.insert_execution("e1", "wf1", "t1", &json!({"x": 1}), &json!({"trigger": {"x": 1}}))
            .unwrap();
        let exec = db.get_execution("e1").unwrap();
        assert_eq!(exec.status, ExecutionStatus::Running);

        db.suspend_execution("e1", &json!({"k": "v"}), &json!({"node_id": "s"})).unwrap();
        let exec = db.get_execution("e1").unwrap();
        assert_eq!(exec.status, ExecutionStatus::Suspended);
        assert_eq!(exec.resume_payload, Some(json!({"node_id": "s"})));

        let suspended = db.find_suspended_executions("t1").unwrap();
        assert_eq!(suspended.len(), 1);

        db.resume_execution("e1", &json!({"k": "v", "latest_reply": "yes"})).unwrap();
        let exec = db.get_execution("e1").unwrap();
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.resume_payload.is_none());

        db.complete_execution("e1").unwrap();
        let exec = db.get_execution("e1").unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.completed_at.is_some());

        // Terminal is immutable
        db.fail_execution("e1", "late error").unwrap();
        assert_eq!(db.get_execution("e1").unwrap().status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_task_claim_is_exclusive_and_delay_aware() {
        let db = db_with_tenant();
        let now = Utc::now();
        db.enqueue_task("e1", "n1", now).unwrap();
        db.enqueue_task("e1", "n2", now + chrono::Duration::seconds(60)).unwrap();

        let due = db.claim_due_tasks(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].node_id, "n1");

        // Already claimed; nothing due
        assert!(db.claim_due_tasks(now, 10).unwrap().is_empty());

        // The delayed task becomes due later
        let later = now + chrono::Duration::seconds(61);
        let due = db.claim_due_tasks(later, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].node_id, "n2");
    }

    #[test]
    fn test_reset_claimed_tasks_requeues() {
        let db = db_with_tenant();
        let now = Utc::now();
        db.enqueue_task("e1", "n1", now).unwrap();
        assert_eq!(db.claim_due_tasks(now, 10).unwrap().len(), 1);
        assert_eq!(db.pending_task_count().unwrap(), 0);

        // Simulated crash before finish_task
        assert_eq!(db.reset_claimed_tasks().unwrap(), 1);
        assert_eq!(db.pending_task_count().unwrap(), 1);
        assert_eq!(db.claim_due_tasks(now, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_lead_update_journals_changes() {
        let db = db_with_tenant();
        let lead_id = db
            .save_lead(
                "t1",
                &LeadInput {
                    name: Some("Jo".to_string()),
                    status: Some("new".to_string()),
                    tags: json!([]),
                    custom_fields: json!({}),
                    ..Default::default()
                },
            )
            .unwrap();

        let update = LeadUpdate {
            status: Some("qualified".to_string()),
            value: Some(5000),
            ..Default::default()
        };
        let (lead, changes) = db.apply_lead_update("t1", lead_id, &update, "system").unwrap();
        assert_eq!(lead.status, "qualified");
        assert_eq!(changes.len(), 2);

        let activities = db.list_lead_activities("t1", lead_id).unwrap();
        assert_eq!(activities.len(), 2);
        assert!(activities.iter().any(|a| a.activity_type == "status_change"));

        // No-op update journals nothing
        let (_, changes) = db.apply_lead_update("t1", lead_id, &update, "system").unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_booking_overlap_rejected() {
        let db = db_with_tenant();
        let start = Utc::now() + chrono::Duration::days(1);
        let end = start + chrono::Duration::minutes(30);
        let apt = AppointmentInsert {
            tenant_id: "t1",
            lead_id: None,
            conversation_id: None,
            appointment_type_id: "at1",
            start_at: start,
            end_at: end,
            notes: None,
        };
        assert!(db.book_appointment_checked(&apt).unwrap().is_some());
        // Same interval conflicts
        assert!(db.book_appointment_checked(&apt).unwrap().is_none());
        // Adjacent interval does not
        let next = AppointmentInsert {
            start_at: end,
            end_at: end + chrono::Duration::minutes(30),
            ..apt
        };
        assert!(db.book_appointment_checked(&next).unwrap().is_some());
    }

    #[test]
    fn test_whatsapp_tenant_resolution() {
        let db = db_with_tenant();
        db.upsert_whatsapp_config(&WhatsAppConfig {
            tenant_id: "t1".to_string(),
            phone_number_id: Some("PH123".to_string()),
            business_account_id: None,
            app_id: None,
            app_secret: None,
            access_token: Some("ciphertext".to_string()),
            is_active: true,
        })
        .unwrap();

        assert_eq!(
            db.find_tenant_by_phone_number_id("PH123").unwrap(),
            Some("t1".to_string())
        );
        assert!(db.find_tenant_by_phone_number_id("PH999").unwrap().is_none());
    }
}
