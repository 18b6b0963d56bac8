//! In-process task store
//!
//! Mutex-guarded maps. Each operation holds the lock for its whole
//! read-check-write, which is what makes the conditional updates atomic.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::rules::{IgnoreRule, RuleStore};
use super::store::{MarkOutcome, SharedTaskStore, StoreError, StoreResult, TaskStore};
use crate::collab::AuthOutcome;
use crate::escalation::Escalation;
use crate::status::TaskStatus;
use crate::task::{Response, TaskHash, TaskRecord};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: Mutex<HashMap<TaskHash, TaskRecord>>,
    ignores: Mutex<HashMap<(String, String), IgnoreRule>>,
    blacklist: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedTaskStore {
        Arc::new(self)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<TaskHash, TaskRecord>>> {
        self.tasks.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn ignores(&self) -> StoreResult<MutexGuard<'_, HashMap<(String, String), IgnoreRule>>> {
        self.ignores.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn blacklisted(&self) -> StoreResult<MutexGuard<'_, BTreeSet<String>>> {
        self.blacklist.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, record: &TaskRecord) -> StoreResult<()> {
        let mut tasks = self.lock()?;
        if tasks.contains_key(&record.hash) {
            return Err(StoreError::Duplicate(record.hash.clone()));
        }
        tasks.insert(record.hash.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, hash: &str) -> StoreResult<Option<TaskRecord>> {
        Ok(self.lock()?.get(hash).cloned())
    }

    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
        Ok(self
            .lock()?
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<TaskRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn escalations(&self, hash: &str) -> StoreResult<Vec<Escalation>> {
        let tasks = self.lock()?;
        let task = tasks
            .get(hash)
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        Ok(task.escalation.entries().to_vec())
    }

    async fn update_status(
        &self,
        hash: &str,
        expected: Option<TaskStatus>,
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tasks = self.lock()?;
        let task = tasks
            .get_mut(hash)
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        if expected.is_some_and(|e| e != task.status) {
            return Ok(false);
        }
        task.apply_status(to, at);
        Ok(true)
    }

    async fn record_response(
        &self,
        hash: &str,
        response: &Response,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tasks = self.lock()?;
        let task = tasks
            .get_mut(hash)
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        if task.status != TaskStatus::InProgress {
            return Ok(false);
        }
        task.apply_response(response, at);
        Ok(true)
    }

    async fn reopen(
        &self,
        hash: &str,
        waiting_since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tasks = self.lock()?;
        let task = tasks
            .get_mut(hash)
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        if task.status != TaskStatus::InProgress || task.waiting_since != Some(waiting_since) {
            return Ok(false);
        }
        task.apply_status(TaskStatus::Open, at);
        Ok(true)
    }

    async fn mark_escalated(
        &self,
        hash: &str,
        subject: &str,
        delay_secs: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        let mut tasks = self.lock()?;
        let task = tasks
            .get_mut(hash)
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        let Some(existing) = task.escalation.find(subject, delay_secs) else {
            return Ok(MarkOutcome::UnknownEscalation);
        };
        if let Some(prev) = existing.notified_at {
            return Ok(MarkOutcome::AlreadyNotified(prev));
        }
        if task.status != TaskStatus::InProgress {
            return Ok(MarkOutcome::WrongStatus(task.status));
        }
        task.escalation.record_notified(subject, delay_secs, at);
        Ok(MarkOutcome::Marked)
    }

    async fn mark_challenged(&self, hash: &str, at: DateTime<Utc>) -> StoreResult<MarkOutcome> {
        let mut tasks = self.lock()?;
        let task = tasks
            .get_mut(hash)
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        if task.status != TaskStatus::Verification {
            return Ok(MarkOutcome::WrongStatus(task.status));
        }
        if let Some(prev) = task.challenged_at {
            return Ok(MarkOutcome::AlreadyNotified(prev));
        }
        task.challenged_at = Some(at);
        task.updated_at = at;
        Ok(MarkOutcome::Marked)
    }

    async fn record_auth_outcome(
        &self,
        hash: &str,
        outcome: AuthOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AuthOutcome>> {
        let mut tasks = self.lock()?;
        let task = tasks
            .get_mut(hash)
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        if task.status != TaskStatus::Verification {
            return Ok(None);
        }
        if task.auth_outcome.is_none() {
            task.auth_outcome = Some(outcome);
            task.updated_at = at;
        }
        Ok(task.auth_outcome)
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn put_ignore(&self, rule: &IgnoreRule) -> StoreResult<()> {
        self.ignores()?
            .insert((rule.ldap.clone(), rule.title.clone()), rule.clone());
        Ok(())
    }

    async fn get_ignore(&self, ldap: &str, title: &str) -> StoreResult<Option<IgnoreRule>> {
        Ok(self
            .ignores()?
            .get(&(ldap.to_string(), title.to_string()))
            .cloned())
    }

    async fn list_ignores(&self) -> StoreResult<Vec<IgnoreRule>> {
        Ok(self.ignores()?.values().cloned().collect())
    }

    async fn add_blacklist(&self, ldap: &str) -> StoreResult<bool> {
        Ok(self.blacklisted()?.insert(ldap.to_string()))
    }

    async fn is_blacklisted(&self, ldap: &str) -> StoreResult<bool> {
        Ok(self.blacklisted()?.contains(ldap))
    }

    async fn list_blacklist(&self) -> StoreResult<Vec<String>> {
        Ok(self.blacklisted()?.iter().cloned().collect())
    }
}
