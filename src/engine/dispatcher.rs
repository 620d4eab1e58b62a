//! Step dispatcher
//!
//! Consumes one queued `(execution, node)` task: journals a step, runs the
//! executor, merges output into the execution context, and schedules
//! successors. Writes commit before successors are enqueued, so a crash
//! between commit and enqueue leaves a reconcilable record rather than a
//! lost update.

use crate::context::Context;
use crate::db::{DbError, StepStatus};
use crate::engine::executor::{self, Signal};
use crate::engine::navigator;
use crate::engine::Engine;
use crate::workflow::NodeSpec;

/// Run one node step. Missing or terminal executions drop the task quietly;
/// executor failures mark the step failed without failing the execution.
pub async fn run_step(engine: &Engine, execution_id: &str, node_id: &str) -> Result<(), String> {
    let execution = match engine.db().get_execution(execution_id) {
        Ok(execution) => execution,
        Err(DbError::ExecutionNotFound(_)) => {
            tracing::warn!(execution = %execution_id, "Dropping task: execution missing");
            return Ok(());
        }
        Err(e) => return Err(e.to_string()),
    };
    if execution.status.is_terminal() {
        tracing::debug!(execution = %execution_id, status = ?execution.status, "Dropping task: execution terminal");
        return Ok(());
    }

    let node = match engine.db().get_node(node_id) {
        Ok(node) => node,
        Err(DbError::NodeNotFound(_)) => {
            tracing::warn!(execution = %execution_id, node = %node_id, "Dropping task: node missing");
            return Ok(());
        }
        Err(e) => return Err(e.to_string()),
    };

    let mut ctx = Context::from_value(execution.context.clone());
    let step_id = engine
        .db()
        .insert_step(execution_id, node_id, &execution.context)
        .map_err(|e| e.to_string())?;

    // Unknown kinds or malformed configs are user data, not engine bugs
    let spec = match NodeSpec::parse(&node.kind, &node.config) {
        Ok(spec) => spec,
        Err(e) => {
            tracing::warn!(execution = %execution_id, node = %node_id, error = %e, "Unrunnable node");
            engine
                .db()
                .finish_step(&step_id, StepStatus::Failed, None, Some(&e.to_string()))
                .map_err(|e| e.to_string())?;
            return Ok(());
        }
    };

    let output = match executor::execute_node(engine, &node, &spec, &ctx).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!(execution = %execution_id, node = %node_id, error = %e, "Node executor failed");
            engine
                .db()
                .finish_step(&step_id, StepStatus::Failed, None, Some(&e))
                .map_err(|e| e.to_string())?;
            return Ok(());
        }
    };
    let journal = output.to_journal_value();

    if let Some(Signal::Suspend { continuation }) = &output.signal {
        // Park the run. Output values (e.g. pending slots) merge into the
        // context now so the resume turn can see them.
        ctx.merge_guarded(&output.values);
        engine
            .db()
            .suspend_execution(execution_id, &ctx.to_value(), &continuation.to_payload())
            .map_err(|e| e.to_string())?;
        engine
            .db()
            .finish_step(&step_id, StepStatus::Suspended, Some(&journal), None)
            .map_err(|e| e.to_string())?;
        tracing::info!(execution = %execution_id, node = %node_id, "Execution suspended");
        return Ok(());
    }

    ctx.merge_guarded(&output.values);
    engine
        .db()
        .update_execution_context(execution_id, &ctx.to_value())
        .map_err(|e| e.to_string())?;
    engine
        .db()
        .finish_step(&step_id, StepStatus::Completed, Some(&journal), None)
        .map_err(|e| e.to_string())?;

    let delay = output.delay_seconds();
    let edges = engine.db().outgoing_edges(node_id).map_err(|e| e.to_string())?;
    let successors = navigator::select_successors(&edges, &output.values);

    if successors.is_empty() {
        engine
            .db()
            .complete_execution(execution_id)
            .map_err(|e| e.to_string())?;
        tracing::info!(execution = %execution_id, "Execution completed");
        return Ok(());
    }

    for successor in successors {
        engine
            .queue()
            .enqueue(execution_id, &successor, delay)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}
