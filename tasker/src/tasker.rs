//! Tasker: snapshot reads of tasks grouped by lifecycle state
//!
//! The scheduler depends only on the [`Tasker`] trait. Every call is a full,
//! bounded snapshot: the returned tasks carry their complete escalation
//! chains, so evaluating due escalations never needs a second round-trip.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::clock::SharedClock;
use crate::state::{SharedTaskStore, StoreError, StoreResult};
use crate::status::TaskStatus;
use crate::task::{Task, DEFAULT_STORE_TIMEOUT};

/// Polling contract used by the scheduler.
#[async_trait]
pub trait Tasker: Send + Sync {
    /// Tasks in `Open`.
    async fn get_new_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Tasks in `InProgress`.
    async fn get_active_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Tasks in `Verification`.
    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>>;
}

/// Tasker over any [`TaskStore`](crate::state::TaskStore).
#[derive(Clone)]
pub struct StoreTasker {
    store: SharedTaskStore,
    clock: SharedClock,
    store_timeout: Duration,
}

impl StoreTasker {
    pub fn new(store: SharedTaskStore, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound every store call (reads here, transitions on returned tasks).
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn store(&self) -> &SharedTaskStore {
        &self.store
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let records = tokio::time::timeout(self.store_timeout, self.store.list_by_status(status))
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))??;

        debug!(status = %status, count = records.len(), "Fetched tasks");

        Ok(records
            .into_iter()
            .map(|record| {
                Task::new(record, self.store.clone(), self.clock.clone())
                    .with_store_timeout(self.store_timeout)
            })
            .collect())
    }
}

#[async_trait]
impl Tasker for StoreTasker {
    async fn get_new_tasks(&self) -> StoreResult<Vec<Task>> {
        self.tasks_with_status(TaskStatus::Open).await
    }

    async fn get_active_tasks(&self) -> StoreResult<Vec<Task>> {
        self.tasks_with_status(TaskStatus::InProgress).await
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        self.tasks_with_status(TaskStatus::Verification).await
    }
}
