//! Node executors
//!
//! One handler per node kind. Executors fold transient external failures
//! (send errors, HTTP errors, unparseable extractions) into typed output
//! fields instead of failing the step; only genuine invariant violations
//! surface as `Err`.

use crate::channels::Recipient;
use crate::context::Context;
use crate::db::{LeadInput, NodeRow};
use crate::engine::Engine;
use crate::llm::extract;
use crate::llm::prompt;
use crate::llm::GenerateRequest;
use crate::scheduling::Slot;
use crate::workflow::{
    ActionConfig, BookingConfig, ConditionConfig, ExtractConfig, HttpConfig, InferenceConfig,
    LeadCaptureConfig, NodeSpec, Operator,
};
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// How many upcoming days the booking proposer scans.
const PROPOSAL_WINDOW_DAYS: i64 = 3;
/// How many slots one proposal offers.
const PROPOSAL_SLOT_COUNT: usize = 3;

/// What a node asks the dispatcher to do besides merging its output.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Suspend { continuation: Continuation },
    Delay { seconds: i64 },
}

/// Where a suspended execution picks up when its event arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    /// Proceed along the node's outgoing edges (wait_for_reply)
    AdvancePast { node_id: String },
    /// Run the node again (two-phase executors, e.g. booking confirm)
    Reenter { node_id: String },
}

impl Continuation {
    pub fn node_id(&self) -> &str {
        match self {
            Continuation::AdvancePast { node_id } | Continuation::Reenter { node_id } => node_id,
        }
    }

    pub fn to_payload(&self) -> Value {
        match self {
            Continuation::AdvancePast { node_id } => {
                json!({ "node_id": node_id, "mode": "advance_past" })
            }
            Continuation::Reenter { node_id } => {
                json!({ "node_id": node_id, "mode": "reenter" })
            }
        }
    }

    pub fn from_payload(payload: &Value) -> Option<Self> {
        let node_id = payload.get("node_id")?.as_str()?.to_string();
        match payload.get("mode").and_then(Value::as_str) {
            Some("reenter") => Some(Continuation::Reenter { node_id }),
            // Older rows carry only node_id; advancing is the original shape
            _ => Some(Continuation::AdvancePast { node_id }),
        }
    }
}

/// Output document of one node visit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub values: Map<String, Value>,
    pub signal: Option<Signal>,
}

impl NodeOutput {
    pub fn from_values(values: Map<String, Value>) -> Self {
        Self {
            values,
            signal: None,
        }
    }

    fn of(value: Value) -> Self {
        match value {
            Value::Object(values) => Self::from_values(values),
            _ => Self::default(),
        }
    }

    /// Full document for the step journal, orchestration keys included.
    pub fn to_journal_value(&self) -> Value {
        let mut doc = self.values.clone();
        match &self.signal {
            Some(Signal::Suspend { continuation }) => {
                doc.insert("orchestration_signal".to_string(), json!("suspend"));
                doc.insert("resume_node_id".to_string(), json!(continuation.node_id()));
            }
            Some(Signal::Delay { seconds }) => {
                doc.insert("orchestration_signal".to_string(), json!("delay"));
                doc.insert("seconds".to_string(), json!(seconds));
            }
            None => {}
        }
        Value::Object(doc)
    }

    pub fn delay_seconds(&self) -> i64 {
        match &self.signal {
            Some(Signal::Delay { seconds }) => (*seconds).max(0),
            _ => 0,
        }
    }
}

/// Execute one node against the current context.
pub async fn execute_node(
    engine: &Engine,
    node: &NodeRow,
    spec: &NodeSpec,
    ctx: &Context,
) -> Result<NodeOutput, String> {
    match spec {
        NodeSpec::Start => Ok(NodeOutput::of(json!({ "status": "started" }))),
        NodeSpec::End => Ok(NodeOutput::default()),
        NodeSpec::WaitForReply => Ok(NodeOutput {
            values: Map::new(),
            signal: Some(Signal::Suspend {
                continuation: Continuation::AdvancePast {
                    node_id: node.id.clone(),
                },
            }),
        }),
        NodeSpec::Action(config) => execute_action(engine, config, ctx).await,
        NodeSpec::AiInference(config) => execute_ai_inference(engine, config, ctx).await,
        NodeSpec::AiExtract(config) => execute_ai_extract(engine, config, ctx).await,
        NodeSpec::Condition(config) => Ok(execute_condition(config, ctx)),
        NodeSpec::TimeDelay(config) => Ok(NodeOutput {
            values: Map::new(),
            signal: Some(Signal::Delay {
                seconds: config.seconds,
            }),
        }),
        NodeSpec::HttpRequest(config) => Ok(execute_http_request(engine, config, ctx).await),
        NodeSpec::LeadCapture(config) => execute_lead_capture(engine, config, ctx, node),
        NodeSpec::AppointmentBooking(config) => {
            execute_appointment_booking(engine, config, ctx, node).await
        }
    }
}

/// WhatsApp `from_number` wins over the web `user_id`.
fn resolve_recipient(ctx: &Context) -> Option<Recipient> {
    let trigger = ctx.trigger()?;
    if let Some(number) = trigger.get("from_number").and_then(Value::as_str) {
        return Some(Recipient::WhatsApp(number.to_string()));
    }
    trigger
        .get("user_id")
        .and_then(Value::as_str)
        .map(|id| Recipient::Web(id.to_string()))
}

// ============================================================================
// action
// ============================================================================

async fn execute_action(
    engine: &Engine,
    config: &ActionConfig,
    ctx: &Context,
) -> Result<NodeOutput, String> {
    match config {
        ActionConfig::SendMessage { template } => {
            let message_body = ctx.hydrate(template);
            let Some(recipient) = resolve_recipient(ctx) else {
                return Ok(NodeOutput::of(json!({
                    "action_result": "failed",
                    "error": "No target number or user_id found",
                })));
            };

            // A send failure never fails the execution; it is recorded in
            // the step for operators.
            match engine
                .outbound()
                .send(ctx.tenant_id(), &recipient, &message_body)
                .await
            {
                Ok(()) => {
                    let result = match recipient {
                        Recipient::WhatsApp(_) => "sent",
                        Recipient::Web(_) => "sent_web",
                    };
                    Ok(NodeOutput::of(json!({
                        "action_result": result,
                        "message_body": message_body,
                    })))
                }
                Err(e) => Ok(NodeOutput::of(json!({
                    "action_result": "failed",
                    "error": e,
                    "message_body": message_body,
                }))),
            }
        }

        ActionConfig::CreateTicket {
            subject,
            description,
            priority,
        } => {
            let trigger_context = ctx.trigger().cloned().unwrap_or(Value::Null);
            let description = format!(
                "{}\nContext: {trigger_context}",
                description.as_deref().unwrap_or("Created via Automation")
            );
            let ticket_id = engine
                .crm()
                .create_ticket(
                    ctx.tenant_id(),
                    subject.as_deref().unwrap_or("New Workflow Ticket"),
                    Some(&description),
                    priority.as_deref().unwrap_or("medium"),
                )
                .map_err(|e| e.to_string())?;
            Ok(NodeOutput::of(json!({
                "ticket_id": ticket_id,
                "action_result": "ticket_created",
            })))
        }

        ActionConfig::AssignAgent { agent_id } => {
            let ticket_id = ctx.get("ticket_id").and_then(Value::as_i64);
            match (ticket_id, agent_id) {
                (Some(ticket_id), Some(agent_id)) => {
                    engine
                        .db()
                        .assign_ticket(ctx.tenant_id(), ticket_id, agent_id)
                        .map_err(|e| e.to_string())?;
                    Ok(NodeOutput::of(json!({
                        "assigned_to": agent_id,
                        "action_result": "assigned",
                    })))
                }
                _ => Ok(NodeOutput::of(json!({
                    "action_result": "skipped",
                    "reason": "missing_id",
                }))),
            }
        }
    }
}

// ============================================================================
// ai_inference
// ============================================================================

async fn execute_ai_inference(
    engine: &Engine,
    config: &InferenceConfig,
    ctx: &Context,
) -> Result<NodeOutput, String> {
    let tenant_id = ctx.tenant_id().to_string();

    let mut profile = engine
        .db()
        .get_business_profile(&tenant_id)
        .unwrap_or_default();
    if let Ok(docs) = engine.db().list_knowledge_docs(&tenant_id) {
        profile.knowledge_docs = docs;
    }
    let persona = prompt::build_persona_prompt(&profile);

    let node_goal = config
        .prompt_template
        .as_deref()
        .unwrap_or("You are a helpful assistant.");
    let trigger = ctx.trigger().cloned().unwrap_or(Value::Null);
    let trigger_summary = format!(
        "User Input: {}\nFrom: {}",
        trigger
            .get("message_body")
            .and_then(Value::as_str)
            .unwrap_or(""),
        ctx.participant().unwrap_or("Unknown"),
    );

    let system_instruction = format!(
        "{persona}\n\n*** WORKFLOW GOAL ***\nYour current specific objective in this workflow is:\n{node_goal}\n\n*** CONTEXT ***\n{trigger_summary}\nCurrent Workflow State: {}\n\nRespond directly to the user to achieve the WORKFLOW GOAL.",
        ctx.to_value()
    );

    let user_message = config
        .input_text
        .clone()
        .or_else(|| ctx.get_str("trigger.message_body").map(ToString::to_string))
        .unwrap_or_else(|| "Continue".to_string());

    let response = engine
        .gateway()
        .generate(
            GenerateRequest::new(&tenant_id, user_message).with_system(system_instruction),
        )
        .await;

    if config.auto_send {
        if let Some(recipient) = resolve_recipient(ctx) {
            if let Err(e) = engine.outbound().send(&tenant_id, &recipient, &response).await {
                tracing::error!(tenant = %tenant_id, error = %e, "Auto-send of AI reply failed");
            }
        }
    }

    Ok(NodeOutput::of(json!({ "ai_output": response })))
}

// ============================================================================
// ai_extract
// ============================================================================

async fn execute_ai_extract(
    engine: &Engine,
    config: &ExtractConfig,
    ctx: &Context,
) -> Result<NodeOutput, String> {
    let latest = ctx
        .get_str("latest_reply")
        .or_else(|| ctx.get_str("trigger.message_body"))
        .or_else(|| ctx.get_str("trigger.message"))
        .unwrap_or_default();
    let previous_ai = ctx.get_str("ai_output").unwrap_or_default();
    let text_to_analyze =
        format!("Latest Message: {latest}\n\nPrevious AI Output: {previous_ai}");

    match extract::extract_fields(engine.gateway(), ctx.tenant_id(), &config.fields, &text_to_analyze)
        .await
    {
        Ok(extracted) => {
            // Top level for direct condition access, plus a stable mirror
            // under `extracted`. Model-chosen field names never shadow the
            // engine's own keys.
            let mut values: Map<String, Value> = extracted
                .iter()
                .filter(|(k, _)| !crate::context::EXTRACTION_RESERVED_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            values.insert("extracted".to_string(), Value::Object(extracted));
            Ok(NodeOutput::from_values(values))
        }
        Err(_) => Ok(NodeOutput::of(json!({
            "extraction_error": extract::PARSE_FAILURE,
        }))),
    }
}

// ============================================================================
// condition
// ============================================================================

fn execute_condition(config: &ConditionConfig, ctx: &Context) -> NodeOutput {
    let actual = ctx.get(&config.variable);
    let target = config.value.as_ref();

    let result = match config.operator {
        Operator::Exists => match actual {
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
            None => false,
        },
        // Null never compares
        _ if actual.is_none() => false,
        Operator::Equals => {
            let actual = display_string(actual.unwrap_or(&Value::Null));
            let target = target.map(display_string).unwrap_or_default();
            actual.to_lowercase() == target.to_lowercase()
        }
        Operator::Contains => match target {
            Some(t) => {
                let needle = display_string(t).to_lowercase();
                !needle.is_empty()
                    && display_string(actual.unwrap_or(&Value::Null))
                        .to_lowercase()
                        .contains(&needle)
            }
            None => false,
        },
        Operator::GreaterThan => {
            let actual_str = display_string(actual.unwrap_or(&Value::Null));
            let target_str = target.map(display_string).unwrap_or_default();
            match (parse_loose_number(&actual_str), parse_loose_number(&target_str)) {
                (Some(a), Some(t)) => a > t,
                // String comparison fallback, kept from the source system
                _ => actual_str > target_str,
            }
        }
    };

    let eval = if result { "true" } else { "false" };
    NodeOutput::of(json!({ "condition_eval": eval }))
}

fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// "$10,000" → 10000.0. Empty after stripping → no parse.
fn parse_loose_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

// ============================================================================
// http_request
// ============================================================================

async fn execute_http_request(engine: &Engine, config: &HttpConfig, ctx: &Context) -> NodeOutput {
    let Some(url) = config.url.as_deref().map(|u| ctx.hydrate(u)) else {
        return NodeOutput::of(json!({ "error": "Missing URL" }));
    };
    if url.is_empty() {
        return NodeOutput::of(json!({ "error": "Missing URL" }));
    }

    let method = match reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes()) {
        Ok(m) => m,
        Err(_) => return NodeOutput::of(json!({ "error": format!("Invalid method: {}", config.method) })),
    };

    let mut request = engine.http().request(method, &url);
    for (name, value) in &config.headers {
        if let Some(value) = value.as_str() {
            request = request.header(name.as_str(), ctx.hydrate(value));
        }
    }
    if let Some(body) = &config.body {
        request = request.json(&ctx.hydrate_value(body));
    }

    match request.send().await {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let is_json = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map_or(false, |ct| ct.contains("application/json"));
            let text = response.text().await.unwrap_or_default();
            let response_body = if is_json {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            };
            NodeOutput::of(json!({
                "status_code": status_code,
                "response_body": response_body,
            }))
        }
        Err(e) => NodeOutput::of(json!({ "error": e.to_string() })),
    }
}

// ============================================================================
// lead_capture
// ============================================================================

fn execute_lead_capture(
    engine: &Engine,
    config: &LeadCaptureConfig,
    ctx: &Context,
    node: &NodeRow,
) -> Result<NodeOutput, String> {
    let name_template = config.name.as_deref().unwrap_or("{{customer_name}}");
    let mut name = ctx.hydrate(name_template);
    if name.contains("{{") {
        name = ctx
            .get_str("customer_name")
            .unwrap_or("Unknown")
            .to_string();
    }

    let notes_template = config
        .notes
        .clone()
        .unwrap_or_else(|| format!("Captured via Workflow {}", node.workflow_id));
    let notes = ctx.hydrate(&notes_template);

    let contact = ctx.participant().map(ToString::to_string);

    // Earlier ai_extract output feeds contact details and qualification
    let ai_data = ctx
        .get("extracted")
        .or_else(|| ctx.get("ai_output"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let from_ai = |key: &str| ai_data.get(key).and_then(Value::as_str).map(ToString::to_string);
    let email = from_ai("email").or_else(|| {
        contact
            .as_deref()
            .filter(|c| c.contains('@'))
            .map(ToString::to_string)
    });
    let phone = from_ai("phone").or_else(|| {
        contact
            .as_deref()
            .filter(|c| !c.contains('@'))
            .map(ToString::to_string)
    });
    let value = ai_data
        .get("budget")
        .or_else(|| ai_data.get("value"))
        .and_then(coerce_i64);

    let lead = LeadInput {
        name: Some(name),
        contact,
        email,
        phone,
        source: Some("workflow_automation".to_string()),
        notes: Some(notes),
        status: config.status.clone(),
        tags: ai_data.get("tags").cloned().unwrap_or_else(|| json!([])),
        custom_fields: Value::Object(ai_data),
        conversation_id: ctx
            .participant()
            .map(|p| crate::db::conversation_id(ctx.tenant_id(), p)),
        value,
    };

    let lead_id = engine
        .crm()
        .save_lead(ctx.tenant_id(), &lead, "system")
        .map_err(|e| e.to_string())?;

    Ok(NodeOutput::of(json!({
        "lead_id": lead_id,
        "lead_status": "captured",
    })))
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_loose_number(s).map(|f| f as i64),
        _ => None,
    }
}

// ============================================================================
// appointment_booking
// ============================================================================

async fn execute_appointment_booking(
    engine: &Engine,
    config: &BookingConfig,
    ctx: &Context,
    node: &NodeRow,
) -> Result<NodeOutput, String> {
    let tenant_id = ctx.tenant_id().to_string();

    let latest_reply = ctx.get_str("latest_reply").map(ToString::to_string);
    let pending_slots = ctx.get("pending_slots").and_then(Value::as_array).cloned();

    match (latest_reply, pending_slots) {
        (Some(reply), Some(slots)) if !slots.is_empty() => {
            confirm_booking(engine, config, ctx, node, &tenant_id, &reply, &slots).await
        }
        _ => propose_slots(engine, config, ctx, node, &tenant_id).await,
    }
}

async fn propose_slots(
    engine: &Engine,
    config: &BookingConfig,
    ctx: &Context,
    node: &NodeRow,
    tenant_id: &str,
) -> Result<NodeOutput, String> {
    let apt_type_id = match &config.appointment_type_id {
        Some(id) => id.clone(),
        None => match engine
            .db()
            .first_active_appointment_type(tenant_id)
            .map_err(|e| e.to_string())?
        {
            Some(apt_type) => apt_type.id,
            None => {
                return Ok(NodeOutput::of(json!({ "error": "No appointment types found" })));
            }
        },
    };

    let now = Utc::now();
    let mut all_slots: Vec<Slot> = Vec::new();
    for day in 1..=PROPOSAL_WINDOW_DAYS {
        let date = (now + Duration::days(day)).date_naive();
        let slots = engine
            .scheduler()
            .available_slots(tenant_id, date, &apt_type_id, now)
            .map_err(|e| e.to_string())?;
        all_slots.extend(slots);
    }

    let proposed: Vec<Value> = all_slots
        .iter()
        .take(PROPOSAL_SLOT_COUNT)
        .map(|s| {
            json!({
                "start": s.start_at.to_rfc3339(),
                "display": s.display(),
            })
        })
        .collect();

    if proposed.is_empty() {
        return Ok(NodeOutput::of(json!({
            "booking_result": "no_slots",
            "ai_output": "I'm sorry, we don't have any available slots right now.",
        })));
    }

    let slots_text = proposed
        .iter()
        .filter_map(|s| s.get("display").and_then(Value::as_str))
        .map(|d| format!("- {d}"))
        .collect::<Vec<_>>()
        .join("\n");
    let proposal_prompt = format!(
        "Invite the user to book an appointment. Offer these slots and ask them to pick one:\n{slots_text}"
    );
    let proposal = engine
        .gateway()
        .generate(GenerateRequest::new(tenant_id, proposal_prompt))
        .await;

    if let Some(recipient) = resolve_recipient(ctx) {
        if let Err(e) = engine.outbound().send(tenant_id, &recipient, &proposal).await {
            tracing::error!(tenant = %tenant_id, error = %e, "Slot proposal send failed");
        }
    }

    Ok(NodeOutput {
        values: json!({
            "pending_slots": proposed,
            "appointment_type_id": apt_type_id,
            "ai_output": proposal,
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
        signal: Some(Signal::Suspend {
            continuation: Continuation::Reenter {
                node_id: node.id.clone(),
            },
        }),
    })
}

#[allow(clippy::too_many_arguments)]
async fn confirm_booking(
    engine: &Engine,
    config: &BookingConfig,
    ctx: &Context,
    node: &NodeRow,
    tenant_id: &str,
    reply: &str,
    slots: &[Value],
) -> Result<NodeOutput, String> {
    let match_prompt = format!(
        "Identify which of these slots the user selected.\nSLOTS: {}\nUSER REPLY: \"{reply}\"\n\nReturn ONLY the index (0, 1, 2...) of the slot, or \"none\" if no match.",
        Value::Array(slots.to_vec())
    );
    let raw_index = engine
        .gateway()
        .generate(
            GenerateRequest::new(tenant_id, match_prompt).with_system(
                "You are a precise slot matcher. Return ONLY the index or 'none'.",
            ),
        )
        .await;

    let selected = parse_slot_index(&raw_index).and_then(|idx| slots.get(idx));

    let Some(slot) = selected else {
        // Unmatched reply: nudge and wait for another turn
        let retry_msg =
            "I'm sorry, I didn't quite catch that. Which of those times works best for you?";
        if let Some(recipient) = resolve_recipient(ctx) {
            if let Err(e) = engine.outbound().send(tenant_id, &recipient, retry_msg).await {
                tracing::error!(tenant = %tenant_id, error = %e, "Booking retry send failed");
            }
        }
        return Ok(NodeOutput {
            values: json!({
                "pending_slots": slots,
                "ai_output": retry_msg,
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            signal: Some(Signal::Suspend {
                continuation: Continuation::Reenter {
                    node_id: node.id.clone(),
                },
            }),
        });
    };

    let Some(start_at) = slot
        .get("start")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
    else {
        return Ok(NodeOutput::of(json!({
            "booking_result": "failed",
            "error": "malformed pending slot",
        })));
    };

    let apt_type_id = config
        .appointment_type_id
        .clone()
        .or_else(|| ctx.get_str("appointment_type_id").map(ToString::to_string))
        .unwrap_or_default();
    let lead_id = ctx.get("lead_id").and_then(Value::as_i64);
    let conversation_id = ctx
        .participant()
        .map(|p| crate::db::conversation_id(tenant_id, p));

    match engine.scheduler().book(
        tenant_id,
        &apt_type_id,
        start_at,
        lead_id,
        conversation_id.as_deref(),
        Some(&format!("Booked via Workflow: {}", node.workflow_id)),
    ) {
        Ok(appointment_id) => {
            let display = slot.get("display").and_then(Value::as_str).unwrap_or_default();
            let confirmation = format!("Confirmed! You are booked for {display}.");
            if let Some(recipient) = resolve_recipient(ctx) {
                if let Err(e) = engine.outbound().send(tenant_id, &recipient, &confirmation).await
                {
                    tracing::error!(tenant = %tenant_id, error = %e, "Confirmation send failed");
                }
            }
            Ok(NodeOutput::of(json!({
                "booking_result": "success",
                "appointment_id": appointment_id,
                "booked_slot": slot,
            })))
        }
        Err(e) => Ok(NodeOutput::of(json!({
            "booking_result": "failed",
            "error": e.to_string(),
        }))),
    }
}

/// "1", "Slot 2 please", " 0." → index. "none" or prose → None.
fn parse_slot_index(reply: &str) -> Option<usize> {
    let digits: String = reply.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slot_index() {
        assert_eq!(parse_slot_index("0"), Some(0));
        assert_eq!(parse_slot_index("Slot 2 please"), Some(2));
        assert_eq!(parse_slot_index("none"), None);
        assert_eq!(parse_slot_index("the first one"), None);
    }

    #[test]
    fn test_parse_loose_number() {
        assert_eq!(parse_loose_number("$10,000"), Some(10000.0));
        assert_eq!(parse_loose_number("19.99"), Some(19.99));
        assert_eq!(parse_loose_number("abc"), None);
        assert_eq!(parse_loose_number(""), None);
    }

    #[test]
    fn test_condition_exists() {
        let config = ConditionConfig {
            variable: "email".to_string(),
            operator: Operator::Exists,
            value: None,
        };
        let ctx = Context::from_value(serde_json::json!({ "email": "a@b.c" }));
        assert_eq!(
            execute_condition(&config, &ctx).values["condition_eval"],
            serde_json::json!("true")
        );

        let empty = Context::from_value(serde_json::json!({ "email": "" }));
        assert_eq!(
            execute_condition(&config, &empty).values["condition_eval"],
            serde_json::json!("false")
        );

        let missing = Context::default();
        assert_eq!(
            execute_condition(&config, &missing).values["condition_eval"],
            serde_json::json!("false")
        );
    }

    #[test]
    fn test_condition_equals_case_insensitive() {
        let config = ConditionConfig {
            variable: "intent".to_string(),
            operator: Operator::Equals,
            value: Some(serde_json::json!("Pricing")),
        };
        let ctx = Context::from_value(serde_json::json!({ "intent": "pricing" }));
        assert_eq!(
            execute_condition(&config, &ctx).values["condition_eval"],
            serde_json::json!("true")
        );
    }

    #[test]
    fn test_condition_contains() {
        let config = ConditionConfig {
            variable: "trigger.message_body".to_string(),
            operator: Operator::Contains,
            value: Some(serde_json::json!("PRICING")),
        };
        let ctx = Context::from_value(
            serde_json::json!({ "trigger": { "message_body": "what is pricing?" } }),
        );
        assert_eq!(
            execute_condition(&config, &ctx).values["condition_eval"],
            serde_json::json!("true")
        );
    }

    #[test]
    fn test_condition_greater_than_numeric_with_currency() {
        let config = ConditionConfig {
            variable: "budget".to_string(),
            operator: Operator::GreaterThan,
            value: Some(serde_json::json!(5000)),
        };
        let rich = Context::from_value(serde_json::json!({ "budget": "$10,000" }));
        assert_eq!(
            execute_condition(&config, &rich).values["condition_eval"],
            serde_json::json!("true")
        );
        let modest = Context::from_value(serde_json::json!({ "budget": "$1,000" }));
        assert_eq!(
            execute_condition(&config, &modest).values["condition_eval"],
            serde_json::json!("false")
        );
    }

    #[test]
    fn test_condition_greater_than_string_fallback() {
        let config = ConditionConfig {
            variable: "tier".to_string(),
            operator: Operator::GreaterThan,
            value: Some(serde_json::json!("alpha")),
        };
        let ctx = Context::from_value(serde_json::json!({ "tier": "beta" }));
        assert_eq!(
            execute_condition(&config, &ctx).values["condition_eval"],
            serde_json::json!("true")
        );
    }

    #[test]
    fn test_condition_null_is_false_for_all_but_exists() {
        for operator in [Operator::Equals, Operator::Contains, Operator::GreaterThan] {
            let config = ConditionConfig {
                variable: "missing".to_string(),
                operator,
                value: Some(serde_json::json!("x")),
            };
            assert_eq!(
                execute_condition(&config, &Context::default()).values["condition_eval"],
                serde_json::json!("false"),
                "operator {operator:?}"
            );
        }
    }

    #[test]
    fn test_continuation_payload_roundtrip() {
        for continuation in [
            Continuation::AdvancePast { node_id: "w1".to_string() },
            Continuation::Reenter { node_id: "b1".to_string() },
        ] {
            let payload = continuation.to_payload();
            assert_eq!(Continuation::from_payload(&payload), Some(continuation));
        }
    }

    #[test]
    fn test_legacy_payload_defaults_to_advance() {
        let payload = serde_json::json!({ "node_id": "w1" });
        assert_eq!(
            Continuation::from_payload(&payload),
            Some(Continuation::AdvancePast { node_id: "w1".to_string() })
        );
    }

    #[test]
    fn test_journal_value_carries_signal() {
        let output = NodeOutput {
            values: Map::new(),
            signal: Some(Signal::Delay { seconds: 120 }),
        };
        let journal = output.to_journal_value();
        assert_eq!(journal["orchestration_signal"], serde_json::json!("delay"));
        assert_eq!(journal["seconds"], serde_json::json!(120));
    }
}
