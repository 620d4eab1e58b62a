//! Durable task queue
//!
//! Each queued row is one `(execution, node)` dispatch with a due time.
//! Rows live in the store, so scheduled delays survive restart; claiming
//! flips status atomically so a pool of pollers never double-runs a task.

use crate::db::{Database, DbResult, TaskRow};
use chrono::{DateTime, Duration, Utc};

/// Queue interface used by the dispatcher and the worker pool.
pub trait TaskQueue: Send + Sync {
    /// Schedule one node step, optionally delayed.
    fn enqueue(&self, execution_id: &str, node_id: &str, delay_seconds: i64) -> DbResult<()>;

    /// Claim every task due at `now`. Claimed tasks are invisible to other
    /// consumers until finished or reset.
    fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<TaskRow>>;

    /// Acknowledge a finished task.
    fn finish(&self, task_id: i64) -> DbResult<()>;

    /// Requeue claimed-but-unfinished tasks (crash recovery).
    fn reset_claimed(&self) -> DbResult<usize>;
}

/// Store-backed queue; the only production implementation.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
}

impl SqliteQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl TaskQueue for SqliteQueue {
    fn enqueue(&self, execution_id: &str, node_id: &str, delay_seconds: i64) -> DbResult<()> {
        let run_at = Utc::now() + Duration::seconds(delay_seconds.max(0));
        self.db.enqueue_task(execution_id, node_id, run_at)?;
        tracing::debug!(execution = %execution_id, node = %node_id, delay_seconds, "Task enqueued");
        Ok(())
    }

    fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<TaskRow>> {
        self.db.claim_due_tasks(now, limit)
    }

    fn finish(&self, task_id: i64) -> DbResult<()> {
        self.db.finish_task(task_id)
    }

    fn reset_claimed(&self) -> DbResult<usize> {
        self.db.reset_claimed_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_with_delay_not_claimable_early() {
        let db = Database::open_in_memory().unwrap();
        let queue = SqliteQueue::new(db);
        queue.enqueue("e1", "n1", 30).unwrap();

        assert!(queue.claim_due(Utc::now(), 10).unwrap().is_empty());
        let later = Utc::now() + Duration::seconds(31);
        assert_eq!(queue.claim_due(later, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_negative_delay_clamped() {
        let db = Database::open_in_memory().unwrap();
        let queue = SqliteQueue::new(db);
        queue.enqueue("e1", "n1", -5).unwrap();
        assert_eq!(queue.claim_due(Utc::now() + Duration::seconds(1), 10).unwrap().len(), 1);
    }
}
