//! API request and response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tenant scoping for every control-plane endpoint.
#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: String,
}

/// Request for the web chat endpoint
#[derive(Debug, Deserialize)]
pub struct WebChatRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub message: String,
}

/// Response for the web chat endpoint
#[derive(Debug, Serialize)]
pub struct WebChatResponse {
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub tenant_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Value>,
}

/// Response after creating a workflow
#[derive(Debug, Serialize)]
pub struct WorkflowCreatedResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub tenant_id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionListResponse {
    pub executions: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct TriggeredResponse {
    pub execution_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LeadActorQuery {
    pub tenant_id: String,
    #[serde(default = "default_actor")]
    pub user_id: String,
}

fn default_actor() -> String {
    "system".to_string()
}

#[derive(Debug, Deserialize)]
pub struct LeadMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeDocRequest {
    pub title: String,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    pub content: String,
}

fn default_doc_type() -> String {
    "file".to_string()
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppConfigRequest {
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default)]
    pub business_account_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

/// WhatsApp config view; secrets are reported as presence flags only.
#[derive(Debug, Serialize)]
pub struct WhatsAppConfigResponse {
    pub phone_number_id: Option<String>,
    pub business_account_id: Option<String>,
    pub app_id: Option<String>,
    pub has_app_secret: bool,
    pub has_access_token: bool,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentTypeRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i64,
}

fn default_duration() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRuleRequest {
    pub day_of_week: u32,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub tenant_id: String,
    /// ISO date, e.g. "2026-08-03"
    pub date: String,
    pub appointment_type_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentsQuery {
    pub tenant_id: String,
    #[serde(default)]
    pub lead_id: Option<i64>,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Generic id response
#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
