//! Database schema and row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full schema, executed as one batch on open.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    plan_name TEXT NOT NULL DEFAULT 'starter',
    trial_start_at TEXT,
    trial_end_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS business_settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL UNIQUE REFERENCES tenants(id) ON DELETE CASCADE,
    industry TEXT,
    description TEXT,
    services TEXT,
    tone TEXT,
    faq TEXT,
    custom_instructions TEXT,
    location TEXT,
    hours TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_docs (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    doc_type TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    customer_name TEXT,
    channel TEXT NOT NULL,
    last_message TEXT,
    last_timestamp TEXT,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_intent TEXT,
    last_sentiment TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    sender TEXT NOT NULL,
    channel TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'sent',
    intent TEXT,
    sentiment TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp);

CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    trigger_kind TEXT NOT NULL,
    trigger_config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_nodes (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    label TEXT,
    config TEXT NOT NULL DEFAULT '{}',
    position TEXT
);
CREATE INDEX IF NOT EXISTS idx_nodes_workflow ON workflow_nodes(workflow_id);

CREATE TABLE IF NOT EXISTS workflow_edges (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    guard TEXT
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON workflow_edges(source_id);

CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    tenant_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    trigger_event TEXT NOT NULL DEFAULT '{}',
    context TEXT NOT NULL DEFAULT '{}',
    resume_payload TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_executions_tenant_status ON executions(tenant_id, status);

CREATE TABLE IF NOT EXISTS execution_steps (
    id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    node_id TEXT NOT NULL,
    status TEXT NOT NULL,
    input TEXT,
    output TEXT,
    error TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_steps_execution ON execution_steps(execution_id);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    run_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, run_at);

CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    name TEXT,
    contact TEXT,
    email TEXT,
    phone TEXT,
    source TEXT,
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    tags TEXT NOT NULL DEFAULT '[]',
    custom_fields TEXT NOT NULL DEFAULT '{}',
    conversation_id TEXT,
    value INTEGER,
    last_interaction_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_leads_tenant ON leads(tenant_id, created_at);

CREATE TABLE IF NOT EXISTS lead_activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lead_id INTEGER NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
    tenant_id TEXT NOT NULL,
    activity_type TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '{}',
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activities_lead ON lead_activities(lead_id, created_at);

CREATE TABLE IF NOT EXISTS tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    subject TEXT NOT NULL,
    description TEXT,
    priority TEXT NOT NULL DEFAULT 'medium',
    status TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS appointment_types (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    duration_minutes INTEGER NOT NULL DEFAULT 30,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS availability_rules (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    day_of_week INTEGER NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    lead_id INTEGER,
    conversation_id TEXT,
    appointment_type_id TEXT NOT NULL,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled',
    notes TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_appointments_tenant_start ON appointments(tenant_id, start_at);

CREATE TABLE IF NOT EXISTS whatsapp_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL UNIQUE REFERENCES tenants(id) ON DELETE CASCADE,
    phone_number_id TEXT,
    business_account_id TEXT,
    app_id TEXT,
    app_secret TEXT,
    access_token TEXT,
    is_active INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prompt_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    user_id TEXT,
    messages TEXT NOT NULL,
    response TEXT NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

// ============================================================================
// Status enums
// ============================================================================

/// Tenant subscription status. Gates all ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Trial,
    Suspended,
    Expired,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Trial => "trial",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "trial" => TenantStatus::Trial,
            "suspended" => TenantStatus::Suspended,
            "expired" => TenantStatus::Expired,
            _ => TenantStatus::Active,
        }
    }
}

/// Execution lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Suspended => "suspended",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ExecutionStatus::Running,
            "suspended" => ExecutionStatus::Suspended,
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// One visit to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Suspended => "suspended",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => StepStatus::Suspended,
            "completed" => StepStatus::Completed,
            "failed" => StepStatus::Failed,
            _ => StepStatus::Running,
        }
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: String,
    pub name: Option<String>,
    pub status: TenantStatus,
    pub plan_name: String,
    pub trial_end_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Joined tenant + settings view consumed by the prompt builder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusinessProfile {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub services: Option<String>,
    pub tone: Option<String>,
    pub faq: Option<String>,
    pub custom_instructions: Option<String>,
    pub location: Option<String>,
    pub hours: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub knowledge_docs: Vec<KnowledgeDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeDoc {
    pub id: String,
    pub doc_type: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub customer_name: Option<String>,
    pub channel: String,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub last_intent: Option<String>,
    pub last_sentiment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub text: String,
    pub sender: String,
    pub channel: String,
    pub status: String,
    pub intent: Option<String>,
    pub sentiment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRow {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub trigger_kind: String,
    pub trigger_config: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: String,
    pub workflow_id: String,
    pub kind: String,
    pub label: Option<String>,
    pub config: Value,
}

#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub id: String,
    pub workflow_id: String,
    pub source_id: String,
    pub target_id: String,
    pub guard: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRow {
    pub id: String,
    pub workflow_id: String,
    pub tenant_id: String,
    pub status: ExecutionStatus,
    pub trigger_event: Value,
    pub context: Value,
    pub resume_payload: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRow {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A queued node-step dispatch.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub execution_id: String,
    pub node_id: String,
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub id: i64,
    pub tenant_id: String,
    pub name: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub tags: Value,
    pub custom_fields: Value,
    pub conversation_id: Option<String>,
    pub value: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadActivity {
    pub id: i64,
    pub lead_id: i64,
    pub activity_type: String,
    pub content: Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentType {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityRule {
    pub id: String,
    pub tenant_id: String,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    /// "HH:MM" wall-clock times
    pub start_time: String,
    pub end_time: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: String,
    pub tenant_id: String,
    pub lead_id: Option<i64>,
    pub conversation_id: Option<String>,
    pub appointment_type_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: String,
    pub notes: Option<String>,
}

/// Per-tenant WhatsApp credentials. Secret fields hold ciphertext.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub tenant_id: String,
    pub phone_number_id: Option<String>,
    pub business_account_id: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub access_token: Option<String>,
    pub is_active: bool,
}
