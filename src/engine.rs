//! Workflow engine
//!
//! Wires the store, LLM gateway, outbound channels, CRM and scheduler into
//! the dispatch loop. The `Engine` is the single entry point used by the
//! HTTP layer: inbound messages go through arbitration, lead status changes
//! and manual triggers seed executions, and the worker pool drains the
//! durable task queue.

pub mod arbiter;
pub mod dispatcher;
pub mod executor;
pub mod navigator;
pub mod queue;
pub mod trigger;

#[cfg(test)]
pub mod testing;

pub use arbiter::Arbitrated;

use crate::channels::{InboundMessage, OutboundPort};
use crate::context::Context;
use crate::crm::{Crm, LeadStatusChange};
use crate::db::{Database, TaskRow, WorkflowRow};
use crate::llm::LlmGateway;
use crate::scheduling::Scheduler;
use chrono::Utc;
use queue::{SqliteQueue, TaskQueue};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Timeout for http_request nodes.
const HTTP_NODE_TIMEOUT: Duration = Duration::from_secs(10);
/// Queue poll cadence for workers.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Max tasks claimed per poll.
const CLAIM_BATCH: i64 = 16;

/// Per-key async mutexes: per-execution step serialization and
/// per-participant arbitration ordering.
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub struct Engine {
    db: Database,
    crm: Crm,
    scheduler: Scheduler,
    gateway: Arc<LlmGateway>,
    outbound: Arc<dyn OutboundPort>,
    queue: Arc<dyn TaskQueue>,
    http: reqwest::Client,
    execution_locks: KeyedLocks,
    participant_locks: KeyedLocks,
}

impl Engine {
    pub fn new(
        db: Database,
        gateway: Arc<LlmGateway>,
        outbound: Arc<dyn OutboundPort>,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_NODE_TIMEOUT)
            .build()
            .unwrap_or_default();

        Arc::new(Self {
            crm: Crm::new(db.clone()),
            scheduler: Scheduler::new(db.clone()),
            queue: Arc::new(SqliteQueue::new(db.clone())),
            db,
            gateway,
            outbound,
            http,
            execution_locks: KeyedLocks::new(),
            participant_locks: KeyedLocks::new(),
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn crm(&self) -> &Crm {
        &self.crm
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn gateway(&self) -> &LlmGateway {
        &self.gateway
    }

    pub fn outbound(&self) -> &dyn OutboundPort {
        self.outbound.as_ref()
    }

    pub fn queue(&self) -> &dyn TaskQueue {
        self.queue.as_ref()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn participant_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.participant_locks.get(key)
    }

    // ==================== Ingress ====================

    /// Arbitrate one inbound message; see `arbiter`.
    pub async fn handle_inbound(&self, msg: &InboundMessage) -> Result<Arbitrated, String> {
        arbiter::arbitrate(self, msg).await
    }

    /// Feed a lead status change back through the trigger front door.
    pub fn handle_lead_status_change(
        &self,
        tenant_id: &str,
        change: &LeadStatusChange,
    ) -> Result<Vec<String>, String> {
        let event = change.to_trigger_event(tenant_id);
        arbiter::start_matching_workflows(self, tenant_id, "lead_status_update", &event)
    }

    /// Manually start a specific workflow.
    pub fn trigger_workflow(
        &self,
        tenant_id: &str,
        workflow_id: &str,
        payload: &Value,
    ) -> Result<Option<String>, String> {
        let workflow = self
            .db
            .get_workflow(tenant_id, workflow_id)
            .map_err(|e| e.to_string())?;
        self.seed_execution(&workflow, payload)
    }

    /// Create an execution for a workflow and enqueue its start node.
    /// The execution row commits before the enqueue so re-dispatch after a
    /// crash is reconcilable.
    pub(crate) fn seed_execution(
        &self,
        workflow: &WorkflowRow,
        trigger_event: &Value,
    ) -> Result<Option<String>, String> {
        let Some(start_node) = self
            .db
            .get_start_node(&workflow.id)
            .map_err(|e| e.to_string())?
        else {
            tracing::warn!(workflow = %workflow.id, "Workflow has no start node");
            return Ok(None);
        };

        let execution_id = uuid::Uuid::new_v4().to_string();
        let context = Context::seed(trigger_event.clone(), &workflow.tenant_id);
        self.db
            .insert_execution(
                &execution_id,
                &workflow.id,
                &workflow.tenant_id,
                trigger_event,
                &context.to_value(),
            )
            .map_err(|e| e.to_string())?;

        self.queue
            .enqueue(&execution_id, &start_node.id, 0)
            .map_err(|e| e.to_string())?;

        tracing::info!(workflow = %workflow.id, execution = %execution_id, "Execution started");
        Ok(Some(execution_id))
    }

    // ==================== Workers ====================

    /// Claim and run every task due at `now`. Returns how many ran.
    ///
    /// The effective cutoff is `max(now, wall clock)`: freshly enqueued
    /// zero-delay tasks are always claimable, while a future `now` lets
    /// tests fast-forward scheduled delays.
    pub async fn run_due_tasks(&self, now: chrono::DateTime<Utc>) -> Result<usize, String> {
        let cutoff = now.max(Utc::now());
        let tasks = self
            .queue
            .claim_due(cutoff, CLAIM_BATCH)
            .map_err(|e| e.to_string())?;
        let count = tasks.len();
        for task in tasks {
            self.process_task(&task).await;
        }
        Ok(count)
    }

    /// Run tasks until the queue has nothing due at `now`. Test aid and
    /// shutdown drain.
    pub async fn drain(&self, now: chrono::DateTime<Utc>) -> Result<usize, String> {
        let mut total = 0;
        loop {
            let ran = self.run_due_tasks(now).await?;
            if ran == 0 {
                return Ok(total);
            }
            total += ran;
        }
    }

    /// One task, serialized against other steps of the same execution.
    async fn process_task(&self, task: &TaskRow) {
        let lock = self.execution_locks.get(&task.execution_id);
        let _guard = lock.lock().await;

        if let Err(e) = dispatcher::run_step(self, &task.execution_id, &task.node_id).await {
            tracing::error!(
                execution = %task.execution_id,
                node = %task.node_id,
                error = %e,
                "Step dispatch failed"
            );
        }
        if let Err(e) = self.queue.finish(task.id) {
            tracing::error!(task = task.id, error = %e, "Failed to ack task");
        }
    }

    /// Requeue claimed tasks from a previous process, then start the polling
    /// worker pool.
    pub fn start_workers(self: &Arc<Self>, count: usize) {
        match self.queue.reset_claimed() {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "Requeued in-flight tasks from previous run"),
            Err(e) => tracing::error!(error = %e, "Failed to reset claimed tasks"),
        }

        for worker in 0..count {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                tracing::debug!(worker, "Queue worker started");
                loop {
                    match engine.run_due_tasks(Utc::now()).await {
                        Ok(0) | Err(_) => tokio::time::sleep(POLL_INTERVAL).await,
                        Ok(_) => {}
                    }
                }
            });
        }
    }
}
