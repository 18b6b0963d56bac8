//! Store contract for task persistence
//!
//! Tasks and taskers only ever talk to a [`TaskStore`]. Every mutating
//! operation is a single conditional write: it either takes effect entirely
//! or reports that its condition did not hold. No read-then-write pairs
//! are exposed to callers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::collab::AuthOutcome;
use crate::escalation::Escalation;
use crate::query::TaskQuery;
use crate::status::TaskStatus;
use crate::task::{Response, TaskRecord};

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task already exists: {0}")]
    Duplicate(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store backend unavailable: {0}")]
    Backend(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a task store
pub type SharedTaskStore = Arc<dyn TaskStore>;

/// Outcome of a conditional "mark notified" write (escalation or challenge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// This call set the timestamp
    Marked,
    /// Someone else already had; carries the winning timestamp
    AlreadyNotified(DateTime<Utc>),
    /// No escalation with that `(subject, delay)` exists for the task
    UnknownEscalation,
    /// The task is no longer in the status the mark requires
    WrongStatus(TaskStatus),
}

/// Persistence operations required by tasks, taskers and the reporting surface.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a newly created task with its escalation chain.
    ///
    /// Fails with [`StoreError::Duplicate`] if the hash already exists.
    async fn insert(&self, record: &TaskRecord) -> StoreResult<()>;

    /// Read one task, escalations included.
    async fn get(&self, hash: &str) -> StoreResult<Option<TaskRecord>>;

    /// Snapshot of all tasks currently in `status`, escalations included.
    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>>;

    /// Snapshot of every task.
    async fn list_all(&self) -> StoreResult<Vec<TaskRecord>>;

    /// All escalation rows of one task.
    async fn escalations(&self, hash: &str) -> StoreResult<Vec<Escalation>>;

    /// Set the status if the persisted status equals `expected`
    /// (`None` = unconditional).
    ///
    /// Returns `false` when the condition did not hold; nothing is written.
    async fn update_status(
        &self,
        hash: &str,
        expected: Option<TaskStatus>,
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Move an `InProgress` task to `Verification` and store the response
    /// fields in the same write.
    ///
    /// Returns `false` if the task was not `InProgress`.
    async fn record_response(
        &self,
        hash: &str,
        response: &Response,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Return an `InProgress` task to `Open` if it is still in the wait that
    /// started at `waiting_since`.
    ///
    /// Returns `false` when the task was answered, released or re-claimed.
    async fn reopen(
        &self,
        hash: &str,
        waiting_since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Set `notified_at` on the `(hash, subject, delay)` escalation if unset
    /// and the task is still `InProgress`.
    async fn mark_escalated(
        &self,
        hash: &str,
        subject: &str,
        delay_secs: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome>;

    /// Set `challenged_at` on a `Verification` task if unset.
    async fn mark_challenged(&self, hash: &str, at: DateTime<Utc>) -> StoreResult<MarkOutcome>;

    /// Fix the push challenge outcome of a `Verification` task.
    ///
    /// The first recorded outcome wins and is returned; `None` when the task
    /// has left `Verification`.
    async fn record_auth_outcome(
        &self,
        hash: &str,
        outcome: AuthOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AuthOutcome>>;

    /// Filtered read for the reporting surface.
    async fn query(&self, query: &TaskQuery) -> StoreResult<Vec<TaskRecord>> {
        let all = self.list_all().await?;
        Ok(query.apply(all))
    }
}
