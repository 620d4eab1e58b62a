//! HTTP request handlers

use super::types::{
    AppointmentTypeRequest, AppointmentsQuery, AvailabilityRuleRequest, ConversationListResponse,
    ErrorResponse, ExecutionListResponse, ExecutionsQuery, HistoryQuery, HistoryResponse,
    IdResponse, KnowledgeDocRequest, LeadActorQuery, LeadMessageRequest, SlotsQuery,
    SuccessResponse, TenantQuery, TriggeredResponse, WebChatRequest, WebChatResponse,
    WhatsAppConfigRequest, WhatsAppConfigResponse, WorkflowCreatedResponse, WorkflowListResponse,
};
use super::AppState;
use crate::channels::{whatsapp, Channel, InboundMessage, Recipient};
use crate::db::{LeadInput, LeadUpdate, SettingsUpdate, StoreMessage, WhatsAppConfig};
use crate::engine::Arbitrated;
use crate::llm::{prompt, ChatTurn, GenerateRequest};
use crate::workflow::{validate_definition, WorkflowDefinition};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Notice for tenants whose subscription lapsed, pointing at the dashboard.
fn blocked_notice(frontend_url: &str) -> String {
    format!(
        "Your trial has ended. Upgrade your plan at {} to continue using Flowline.",
        frontend_url.trim_end_matches('/')
    )
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(read_root))
        .route("/health", get(health_check))
        // Chat ingress
        .route("/api/web-chat", post(web_chat))
        .route("/api/web-chat/history", get(web_chat_history))
        .route("/api/conversations", get(list_conversations))
        // WhatsApp webhook (Meta)
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        // Workflow control plane
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route("/api/workflows/:id", delete(delete_workflow))
        .route("/api/workflows/:id/trigger", post(trigger_workflow))
        .route("/api/executions", get(list_executions))
        // CRM
        .route("/api/leads", get(list_leads))
        .route("/api/leads/:id", patch(update_lead))
        .route("/api/leads/:id/activity", get(lead_activity))
        .route("/api/leads/:id/message", post(send_lead_message))
        // Business profile & knowledge base
        .route(
            "/api/business-profile",
            get(get_business_profile).post(update_business_profile),
        )
        .route("/api/knowledge", get(list_knowledge).post(add_knowledge))
        .route("/api/knowledge/:doc_id", delete(delete_knowledge))
        // WhatsApp configuration
        .route(
            "/api/whatsapp/config",
            get(get_whatsapp_config).post(update_whatsapp_config),
        )
        // Scheduling
        .route(
            "/api/scheduling/types",
            get(list_appointment_types).post(create_appointment_type),
        )
        .route(
            "/api/scheduling/availability",
            get(list_availability).post(create_availability),
        )
        .route("/api/scheduling/slots", get(list_slots))
        .route("/api/scheduling/appointments", get(list_appointments))
        .with_state(state)
}

async fn read_root() -> Json<Value> {
    Json(json!({ "service": "flowline", "version": env!("CARGO_PKG_VERSION") }))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================
// Chat ingress
// ============================================================

async fn web_chat(
    State(state): State<AppState>,
    Json(body): Json<WebChatRequest>,
) -> Result<Json<WebChatResponse>, AppError> {
    let tenant_id = &body.tenant_id;

    // History snapshot before the new message so the model sees a clean
    // "previous turns" window
    let history = state
        .db
        .get_chat_history(tenant_id, &body.user_id, 5)
        .unwrap_or_default();

    let intent = prompt::detect_intent(&body.message);
    let sentiment = prompt::analyze_sentiment(&body.message);

    let msg = InboundMessage {
        tenant_id: tenant_id.clone(),
        participant: body.user_id.clone(),
        channel: Channel::Web,
        body: body.message.clone(),
        intent: intent.to_string(),
        sentiment: sentiment.to_string(),
    };

    let arbitrated = state
        .engine
        .handle_inbound(&msg)
        .await
        .map_err(AppError::Internal)?;

    // Blocked tenants get the canned notice only; nothing is stored
    if arbitrated != Arbitrated::Blocked {
        let mut inbound_msg =
            StoreMessage::new(tenant_id, &body.user_id, &body.message, "customer", "web");
        inbound_msg.intent = Some(intent);
        inbound_msg.sentiment = Some(sentiment);
        if let Err(e) = state.db.store_message(&inbound_msg) {
            tracing::error!(error = %e, "Failed to store inbound message");
        }
    }

    match arbitrated {
        Arbitrated::Blocked => Ok(Json(WebChatResponse {
            reply: Some(blocked_notice(&state.frontend_url)),
            status: Some("blocked".to_string()),
            executions: None,
        })),
        Arbitrated::Resumed(ids) | Arbitrated::Started(ids) => {
            tracing::info!(tenant = %tenant_id, executions = ?ids, "Workflow owns the reply; fallback suppressed");
            Ok(Json(WebChatResponse {
                reply: None,
                status: Some("workflow_processing".to_string()),
                executions: Some(ids),
            }))
        }
        Arbitrated::Fallback => {
            let reply = fallback_reply(&state, &msg, &history).await;
            Ok(Json(WebChatResponse {
                reply: Some(reply),
                status: None,
                executions: None,
            }))
        }
    }
}

/// Run the fallback AI for an unclaimed message: persona prompt, generation,
/// action-tag side effects, and the stored agent reply.
async fn fallback_reply(
    state: &AppState,
    msg: &InboundMessage,
    history: &[crate::db::MessageRow],
) -> String {
    let tenant_id = &msg.tenant_id;

    let mut profile = state.db.get_business_profile(tenant_id).unwrap_or_default();
    if let Ok(docs) = state.db.list_knowledge_docs(tenant_id) {
        profile.knowledge_docs = docs;
    }
    let persona = prompt::build_persona_prompt(&profile);

    let turns: Vec<ChatTurn> = history
        .iter()
        .map(|m| {
            let role = if m.sender == "customer" { "user" } else { "assistant" };
            ChatTurn::new(role, m.text.clone())
        })
        .collect();

    let raw_reply = state
        .engine
        .gateway()
        .generate(
            GenerateRequest::new(tenant_id, &msg.body)
                .with_system(persona)
                .with_history(turns)
                .with_user(&msg.participant),
        )
        .await;

    let processed = prompt::process_reply(&raw_reply);

    if let Some(lead) = &processed.lead {
        let input = LeadInput {
            name: lead.get("name").and_then(Value::as_str).map(ToString::to_string),
            email: lead.get("email").and_then(Value::as_str).map(ToString::to_string),
            phone: lead.get("phone").and_then(Value::as_str).map(ToString::to_string),
            notes: lead.get("notes").and_then(Value::as_str).map(ToString::to_string),
            source: Some(msg.channel.as_str().to_string()),
            tags: json!([]),
            custom_fields: lead.clone(),
            conversation_id: Some(crate::db::conversation_id(tenant_id, &msg.participant)),
            ..Default::default()
        };
        if let Err(e) = state.engine.crm().save_lead(tenant_id, &input, "ai") {
            tracing::error!(error = %e, "Lead capture from fallback reply failed");
        }
    }

    let intent = processed.intent.clone().unwrap_or_else(|| msg.intent.clone());
    let sentiment = processed
        .sentiment
        .clone()
        .unwrap_or_else(|| msg.sentiment.clone());

    let mut agent_msg = StoreMessage::new(
        tenant_id,
        &msg.participant,
        &processed.text,
        "agent",
        msg.channel.as_str(),
    );
    agent_msg.intent = Some(&intent);
    agent_msg.sentiment = Some(&sentiment);
    if let Err(e) = state.db.store_message(&agent_msg) {
        tracing::error!(error = %e, "Failed to store fallback reply");
    }

    processed.text
}

async fn web_chat_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let messages = state
        .db
        .get_chat_history(&query.tenant_id, &query.user_id, 50)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let messages = messages
        .iter()
        .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
        .collect();
    Ok(Json(HistoryResponse { messages }))
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let conversations = state
        .db
        .list_recent_conversations(&query.tenant_id, 20)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let conversations = conversations
        .iter()
        .map(|c| {
            let mut v = serde_json::to_value(c).unwrap_or(Value::Null);
            // Surface the bare participant id for display
            if let Some(participant) = c.id.split_once(':').map(|(_, p)| p) {
                v["participant"] = Value::String(participant.to_string());
            }
            v
        })
        .collect();
    Ok(Json(ConversationListResponse { conversations }))
}

// ============================================================
// WhatsApp webhook
// ============================================================

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    match (params.mode.as_deref(), params.verify_token, params.challenge) {
        (Some("subscribe"), Some(token), Some(challenge))
            if token == state.whatsapp_verify_token =>
        {
            tracing::info!("Webhook verified successfully");
            challenge.into_response()
        }
        _ => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Verification failed")),
        )
            .into_response(),
    }
}

async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let Some(message) = whatsapp::parse_webhook_payload(&payload) else {
        return Json(json!({ "status": "ignored" }));
    };

    // Tenancy resolution from the receiving business number
    let tenant_id = message
        .phone_number_id
        .as_deref()
        .and_then(|phone_id| state.db.find_tenant_by_phone_number_id(phone_id).ok().flatten());
    let Some(tenant_id) = tenant_id else {
        tracing::warn!(phone_id = ?message.phone_number_id, "No tenant for webhook phone id");
        return Json(json!({ "status": "ignored" }));
    };

    let intent = prompt::detect_intent(&message.body);
    let sentiment = prompt::analyze_sentiment(&message.body);

    let history = state
        .db
        .get_chat_history(&tenant_id, &message.from_number, 5)
        .unwrap_or_default();

    let msg = InboundMessage {
        tenant_id: tenant_id.clone(),
        participant: message.from_number.clone(),
        channel: Channel::WhatsApp,
        body: message.body.clone(),
        intent: intent.to_string(),
        sentiment: sentiment.to_string(),
    };

    let arbitrated = state.engine.handle_inbound(&msg).await;

    if !matches!(arbitrated, Ok(Arbitrated::Blocked)) {
        let mut inbound_msg = StoreMessage::new(
            &tenant_id,
            &message.from_number,
            &message.body,
            "customer",
            "whatsapp",
        );
        inbound_msg.intent = Some(intent);
        inbound_msg.sentiment = Some(sentiment);
        if let Err(e) = state.db.store_message(&inbound_msg) {
            tracing::error!(error = %e, "Failed to store webhook message");
        }
    }

    match arbitrated {
        Ok(Arbitrated::Blocked) => {
            let recipient = Recipient::WhatsApp(message.from_number.clone());
            let notice = blocked_notice(&state.frontend_url);
            if let Err(e) = state
                .engine
                .outbound()
                .send(&tenant_id, &recipient, &notice)
                .await
            {
                tracing::error!(error = %e, "Failed to send blocked notice");
            }
            Json(json!({ "status": "blocked" }))
        }
        Ok(Arbitrated::Resumed(ids) | Arbitrated::Started(ids)) => {
            tracing::info!(tenant = %tenant_id, executions = ?ids, "Workflow owns the reply; fallback suppressed");
            Json(json!({ "status": "workflow_processing", "executions": ids }))
        }
        Ok(Arbitrated::Fallback) => {
            let reply = fallback_reply(&state, &msg, &history).await;
            let recipient = Recipient::WhatsApp(message.from_number.clone());
            if let Err(e) = state.engine.outbound().send(&tenant_id, &recipient, &reply).await {
                tracing::error!(error = %e, "Failed to send fallback reply");
            }
            Json(json!({ "status": "received" }))
        }
        Err(e) => {
            tracing::error!(error = %e, "Webhook arbitration failed");
            Json(json!({ "status": "error" }))
        }
    }
}

// ============================================================
// Workflow control plane
// ============================================================

async fn create_workflow(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    Json(def): Json<WorkflowDefinition>,
) -> Result<Json<WorkflowCreatedResponse>, AppError> {
    validate_definition(&def).map_err(|e| AppError::UnprocessableEntity(e.to_string()))?;

    let id = uuid::Uuid::new_v4().to_string();
    state
        .db
        .insert_workflow(&id, &query.tenant_id, &def)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::info!(tenant = %query.tenant_id, workflow = %id, name = %def.name, "Workflow created");
    Ok(Json(WorkflowCreatedResponse { id }))
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<WorkflowListResponse>, AppError> {
    let workflows = state
        .db
        .list_workflows(&query.tenant_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let workflows = workflows
        .iter()
        .map(|w| serde_json::to_value(w).unwrap_or(Value::Null))
        .collect();
    Ok(Json(WorkflowListResponse { workflows }))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    let deleted = state
        .db
        .delete_workflow(&query.tenant_id, &id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !deleted {
        return Err(AppError::NotFound(format!("Workflow not found: {id}")));
    }
    Ok(Json(SuccessResponse { success: true }))
}

async fn trigger_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TenantQuery>,
    Json(payload): Json<Value>,
) -> Result<Json<TriggeredResponse>, AppError> {
    let execution_id = state
        .engine
        .trigger_workflow(&query.tenant_id, &id, &payload)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::UnprocessableEntity("Workflow has no start node".to_string()))?;
    Ok(Json(TriggeredResponse { execution_id }))
}

async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<ExecutionListResponse>, AppError> {
    let executions = state
        .db
        .list_executions(&query.tenant_id, query.workflow_id.as_deref(), 50)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let executions = executions
        .iter()
        .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
        .collect();
    Ok(Json(ExecutionListResponse { executions }))
}

// ============================================================
// CRM
// ============================================================

async fn list_leads(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Value>, AppError> {
    let leads = state
        .db
        .list_leads(&query.tenant_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "leads": leads })))
}

async fn update_lead(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LeadActorQuery>,
    Json(update): Json<LeadUpdate>,
) -> Result<Json<Value>, AppError> {
    let (lead, status_change) = state
        .engine
        .crm()
        .update_lead(&query.tenant_id, id, &update, &query.user_id)
        .map_err(|e| match e {
            crate::db::DbError::LeadNotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::Internal(other.to_string()),
        })?;

    // Status transitions go back through the trigger front door
    if let Some(change) = status_change {
        match state.engine.handle_lead_status_change(&query.tenant_id, &change) {
            Ok(started) if !started.is_empty() => {
                tracing::info!(lead = id, executions = ?started, "Lead status workflows started");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Lead status trigger failed"),
        }
    }

    Ok(Json(serde_json::to_value(&lead).unwrap_or(Value::Null)))
}

async fn lead_activity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Value>, AppError> {
    let activities = state
        .db
        .list_lead_activities(&query.tenant_id, id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "activities": activities })))
}

async fn send_lead_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<LeadActorQuery>,
    Json(body): Json<LeadMessageRequest>,
) -> Result<Json<Value>, AppError> {
    let result = state
        .engine
        .crm()
        .send_lead_message(
            &query.tenant_id,
            id,
            &body.message,
            &query.user_id,
            state.engine.outbound(),
        )
        .await
        .map_err(|e| match e {
            crate::db::DbError::LeadNotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::Internal(other.to_string()),
        })?;
    Ok(Json(serde_json::to_value(&result).unwrap_or(Value::Null)))
}

// ============================================================
// Business profile & knowledge base
// ============================================================

async fn get_business_profile(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Value>, AppError> {
    let profile = state
        .db
        .get_business_profile(&query.tenant_id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    Ok(Json(serde_json::to_value(&profile).unwrap_or(Value::Null)))
}

async fn update_business_profile(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .db
        .update_business_settings(&query.tenant_id, &update)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn list_knowledge(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Value>, AppError> {
    let docs = state
        .db
        .list_knowledge_docs(&query.tenant_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "documents": docs })))
}

async fn add_knowledge(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<KnowledgeDocRequest>,
) -> Result<Json<IdResponse>, AppError> {
    let id = state
        .db
        .add_knowledge_doc(&query.tenant_id, &body.doc_type, &body.title, &body.content)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(IdResponse { id }))
}

async fn delete_knowledge(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    let deleted = state
        .db
        .delete_knowledge_doc(&query.tenant_id, &doc_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !deleted {
        return Err(AppError::NotFound(format!("Document not found: {doc_id}")));
    }
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// WhatsApp configuration
// ============================================================

async fn get_whatsapp_config(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<WhatsAppConfigResponse>, AppError> {
    let config = state
        .db
        .get_whatsapp_config(&query.tenant_id)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("No WhatsApp configuration".to_string()))?;

    Ok(Json(WhatsAppConfigResponse {
        phone_number_id: config.phone_number_id,
        business_account_id: config.business_account_id,
        app_id: config.app_id,
        has_app_secret: config.app_secret.is_some(),
        has_access_token: config.access_token.is_some(),
        is_active: config.is_active,
    }))
}

async fn update_whatsapp_config(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<WhatsAppConfigRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    // Secrets are encrypted before they touch the store
    let app_secret = body
        .app_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| state.cipher.encrypt(s))
        .transpose()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let access_token = body
        .access_token
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| state.cipher.encrypt(s))
        .transpose()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    state
        .db
        .upsert_whatsapp_config(&WhatsAppConfig {
            tenant_id: query.tenant_id.clone(),
            phone_number_id: body.phone_number_id,
            business_account_id: body.business_account_id,
            app_id: body.app_id,
            app_secret,
            access_token,
            is_active: body.is_active,
        })
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Scheduling
// ============================================================

async fn list_appointment_types(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Value>, AppError> {
    let types = state
        .db
        .list_appointment_types(&query.tenant_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "types": types })))
}

async fn create_appointment_type(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<AppointmentTypeRequest>,
) -> Result<Json<IdResponse>, AppError> {
    let id = state
        .db
        .create_appointment_type(
            &query.tenant_id,
            &body.name,
            body.description.as_deref(),
            body.duration_minutes,
        )
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(IdResponse { id }))
}

async fn list_availability(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Value>, AppError> {
    let rules = state
        .db
        .list_availability_rules(&query.tenant_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "rules": rules })))
}

async fn create_availability(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<AvailabilityRuleRequest>,
) -> Result<Json<IdResponse>, AppError> {
    if body.day_of_week > 6 {
        return Err(AppError::UnprocessableEntity(
            "day_of_week must be 0 (Monday) through 6 (Sunday)".to_string(),
        ));
    }
    let id = state
        .db
        .create_availability_rule(&query.tenant_id, body.day_of_week, &body.start_time, &body.end_time)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(IdResponse { id }))
}

async fn list_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let date = chrono::NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| AppError::UnprocessableEntity(format!("Invalid date: {}", query.date)))?;
    let slots = state
        .engine
        .scheduler()
        .available_slots(
            &query.tenant_id,
            date,
            &query.appointment_type_id,
            chrono::Utc::now(),
        )
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let slots: Vec<Value> = slots
        .iter()
        .map(|s| {
            json!({
                "start_at": s.start_at.to_rfc3339(),
                "end_at": s.end_at.to_rfc3339(),
                "display": s.display(),
            })
        })
        .collect();
    Ok(Json(json!({ "slots": slots })))
}

async fn list_appointments(
    State(state): State<AppState>,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state
        .db
        .list_appointments(&query.tenant_id, query.lead_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "appointments": appointments })))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    NotFound(String),
    UnprocessableEntity(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::UnprocessableEntity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
