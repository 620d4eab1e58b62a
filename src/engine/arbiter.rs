//! Arbitration & resume resolution
//!
//! For each inbound message exactly one of these happens: a suspended run
//! resumes, new runs start, the tenant is subscription-blocked, or the
//! message falls through to the fallback AI. Callers MUST NOT invoke the
//! fallback when this returns `Resumed` or `Started`; that rule is what
//! prevents double replies on a channel.

use crate::channels::InboundMessage;
use crate::context::Context;
use crate::db::{ExecutionRow, TenantStatus};
use crate::engine::executor::Continuation;
use crate::engine::{navigator, trigger, Engine};
use chrono::Utc;
use serde_json::{json, Value};

/// The outcome of arbitrating one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Arbitrated {
    /// A suspended execution resumed; it owns the reply.
    Resumed(Vec<String>),
    /// New executions started; they own the reply.
    Started(Vec<String>),
    /// Tenant is expired or suspended; caller sends one canned notice.
    Blocked,
    /// Nobody claimed the message; caller invokes the fallback AI.
    Fallback,
}

/// Arbitrate one inbound message. Serialized per `(tenant, participant)` so
/// replies from the same human are processed in arrival order.
pub async fn arbitrate(engine: &Engine, msg: &InboundMessage) -> Result<Arbitrated, String> {
    if !subscription_allows(engine, &msg.tenant_id) {
        return Ok(Arbitrated::Blocked);
    }

    let lock_key = format!("{}:{}", msg.tenant_id, msg.participant);
    let lock = engine.participant_lock(&lock_key);
    let _guard = lock.lock().await;

    // 1. A suspended run waiting on this participant wins outright
    if let Some(resumed) = try_resume(engine, msg).await? {
        return Ok(Arbitrated::Resumed(vec![resumed]));
    }

    // 2. Otherwise any matching workflows each start a fresh run
    let event = msg.to_trigger_event();
    let started = start_matching_workflows(engine, &msg.tenant_id, "message_created", &event)?;
    if !started.is_empty() {
        return Ok(Arbitrated::Started(started));
    }

    Ok(Arbitrated::Fallback)
}

/// Subscription gate. A trial past its end flips to expired here.
fn subscription_allows(engine: &Engine, tenant_id: &str) -> bool {
    let Ok(tenant) = engine.db().get_tenant(tenant_id) else {
        tracing::warn!(tenant = %tenant_id, "Subscription check: tenant not found");
        return false;
    };

    match tenant.status {
        TenantStatus::Expired | TenantStatus::Suspended => false,
        TenantStatus::Trial => {
            if let Some(trial_end) = tenant.trial_end_at {
                if Utc::now() > trial_end {
                    tracing::info!(tenant = %tenant_id, "Trial expired; updating status");
                    if let Err(e) = engine.db().set_tenant_status(tenant_id, TenantStatus::Expired) {
                        tracing::error!(error = %e, "Failed to expire trial");
                    }
                    return false;
                }
            }
            true
        }
        TenantStatus::Active => true,
    }
}

/// Resume the suspended execution correlated to this participant, if any.
async fn try_resume(engine: &Engine, msg: &InboundMessage) -> Result<Option<String>, String> {
    let suspended = engine
        .db()
        .find_suspended_executions(&msg.tenant_id)
        .map_err(|e| e.to_string())?;

    let Some(execution) = suspended.into_iter().find(|e| belongs_to(e, &msg.participant)) else {
        return Ok(None);
    };

    let Some(continuation) = execution
        .resume_payload
        .as_ref()
        .and_then(Continuation::from_payload)
    else {
        tracing::error!(execution = %execution.id, "Suspended execution has no usable resume payload");
        engine
            .db()
            .fail_execution(&execution.id, "missing resume payload")
            .map_err(|e| e.to_string())?;
        return Ok(None);
    };

    let mut ctx = Context::from_value(execution.context.clone());
    ctx.insert("latest_reply", Value::String(msg.body.clone()));
    ctx.insert("latest_trigger", msg.to_trigger_event());

    match continuation {
        Continuation::AdvancePast { node_id } => {
            // The wait node's saved output is the user's reply
            ctx.insert("user_reply", Value::String(msg.body.clone()));
            engine
                .db()
                .resume_execution(&execution.id, &ctx.to_value())
                .map_err(|e| e.to_string())?;

            let edges = engine.db().outgoing_edges(&node_id).map_err(|e| e.to_string())?;
            let wait_output = json!({ "user_reply": msg.body })
                .as_object()
                .cloned()
                .unwrap_or_default();
            let successors = navigator::select_successors(&edges, &wait_output);
            if successors.is_empty() {
                tracing::info!(execution = %execution.id, node = %node_id, "Resumed wait node has no outgoing edges");
                engine
                    .db()
                    .complete_execution(&execution.id)
                    .map_err(|e| e.to_string())?;
            }
            for successor in successors {
                engine
                    .queue()
                    .enqueue(&execution.id, &successor, 0)
                    .map_err(|e| e.to_string())?;
            }
        }
        Continuation::Reenter { node_id } => {
            engine
                .db()
                .resume_execution(&execution.id, &ctx.to_value())
                .map_err(|e| e.to_string())?;
            engine
                .queue()
                .enqueue(&execution.id, &node_id, 0)
                .map_err(|e| e.to_string())?;
        }
    }

    tracing::info!(execution = %execution.id, participant = %msg.participant, "Execution resumed");
    Ok(Some(execution.id))
}

/// Does a suspended execution belong to this participant?
fn belongs_to(execution: &ExecutionRow, participant: &str) -> bool {
    let trigger = execution.context.get("trigger");
    let stored = trigger
        .and_then(|t| t.get("from_number"))
        .or_else(|| trigger.and_then(|t| t.get("user_id")))
        .and_then(Value::as_str);
    stored == Some(participant)
}

/// Start a run of every active workflow whose trigger matches the event.
/// Shared by message arbitration and the lead-status event path.
pub fn start_matching_workflows(
    engine: &Engine,
    tenant_id: &str,
    event_kind: &str,
    event: &Value,
) -> Result<Vec<String>, String> {
    let kinds = trigger::compatible_kinds(event_kind);
    if kinds.is_empty() {
        return Ok(Vec::new());
    }

    let workflows = engine
        .db()
        .find_active_workflows(tenant_id, kinds)
        .map_err(|e| e.to_string())?;

    let mut started = Vec::new();
    for workflow in workflows {
        if !trigger::matches(&workflow.trigger_config, event) {
            tracing::debug!(workflow = %workflow.id, "Trigger config mismatch");
            continue;
        }
        if let Some(execution_id) = engine.seed_execution(&workflow, event)? {
            started.push(execution_id);
        }
    }
    Ok(started)
}
