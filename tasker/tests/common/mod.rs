//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use tasker::{
    create_task, AuthOutcome, ChatClient, CollaboratorError, CollaboratorResult, Disposition, Escalation,
    ManualClock, MarkOutcome, MemoryStore, NewAlert, Response, SharedTaskStore, StoreError,
    StoreResult, TaskQuery, TaskRecord, TaskStatus, TaskStore,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn alert(subject: &str, escalation: Vec<Escalation>) -> NewAlert {
    NewAlert {
        title: "sudo_on_prod".into(),
        ldap: subject.into(),
        description: "sudo -i on web-01".into(),
        reason: "ran sudo on a production host".into(),
        url: Some("https://siem.example.com/alerts/42".into()),
        event_time: Some(t0()),
        escalation,
    }
}

/// Store plus clock seeded with one open task.
pub async fn seeded(escalation: Vec<Escalation>) -> (SharedTaskStore, Arc<ManualClock>, TaskRecord) {
    let store = MemoryStore::new().shared();
    let clock = Arc::new(ManualClock::new(t0()));
    let record = create_task(store.as_ref(), alert("alice", escalation), clock.as_ref())
        .await
        .unwrap();
    (store, clock, record)
}

/// One thing the chat fake was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Prompt { hash: String, subject: String },
    Escalation { hash: String, subject: String },
    Report { hash: String, disposition: Disposition },
}

/// Chat collaborator that records every call and serves canned replies.
#[derive(Default)]
pub struct RecordingChat {
    events: Mutex<Vec<ChatEvent>>,
    replies: Mutex<HashMap<String, Response>>,
    fail_prompts: AtomicBool,
}

impl RecordingChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, hash: &str, response: Response) {
        self.replies.lock().unwrap().insert(hash.to_string(), response);
    }

    pub fn fail_prompts(&self, fail: bool) {
        self.fail_prompts.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ChatEvent::Prompt { .. }))
            .count()
    }

    pub fn escalations_to(&self, subject: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ChatEvent::Escalation { subject: s, .. } if s == subject))
            .count()
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn send_prompt(&self, task: &TaskRecord) -> CollaboratorResult<()> {
        if self.fail_prompts.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unreachable("chat down".into()));
        }
        self.events.lock().unwrap().push(ChatEvent::Prompt {
            hash: task.hash.clone(),
            subject: task.ldap.clone(),
        });
        Ok(())
    }

    async fn poll_reply(&self, task: &TaskRecord) -> CollaboratorResult<Option<Response>> {
        Ok(self.replies.lock().unwrap().get(&task.hash).cloned())
    }

    async fn send_escalation(
        &self,
        task: &TaskRecord,
        escalation: &Escalation,
    ) -> CollaboratorResult<()> {
        self.events.lock().unwrap().push(ChatEvent::Escalation {
            hash: task.hash.clone(),
            subject: escalation.subject.clone(),
        });
        Ok(())
    }

    async fn report(&self, task: &TaskRecord, disposition: Disposition) -> CollaboratorResult<()> {
        self.events.lock().unwrap().push(ChatEvent::Report {
            hash: task.hash.clone(),
            disposition,
        });
        Ok(())
    }
}

/// Store wrapper whose writes can be switched to fail.
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Backend("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn insert(&self, record: &TaskRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.insert(record).await
    }

    async fn get(&self, hash: &str) -> StoreResult<Option<TaskRecord>> {
        self.inner.get(hash).await
    }

    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
        self.check()?;
        self.inner.list_by_status(status).await
    }

    async fn list_all(&self) -> StoreResult<Vec<TaskRecord>> {
        self.inner.list_all().await
    }

    async fn escalations(&self, hash: &str) -> StoreResult<Vec<Escalation>> {
        self.inner.escalations(hash).await
    }

    async fn update_status(
        &self,
        hash: &str,
        expected: Option<TaskStatus>,
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.update_status(hash, expected, to, at).await
    }

    async fn record_response(
        &self,
        hash: &str,
        response: &Response,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.record_response(hash, response, at).await
    }

    async fn reopen(
        &self,
        hash: &str,
        waiting_since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.reopen(hash, waiting_since, at).await
    }

    async fn mark_escalated(
        &self,
        hash: &str,
        subject: &str,
        delay_secs: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        self.check()?;
        self.inner.mark_escalated(hash, subject, delay_secs, at).await
    }

    async fn mark_challenged(&self, hash: &str, at: DateTime<Utc>) -> StoreResult<MarkOutcome> {
        self.check()?;
        self.inner.mark_challenged(hash, at).await
    }

    async fn record_auth_outcome(
        &self,
        hash: &str,
        outcome: AuthOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AuthOutcome>> {
        self.check()?;
        self.inner.record_auth_outcome(hash, outcome, at).await
    }

    async fn query(&self, query: &TaskQuery) -> StoreResult<Vec<TaskRecord>> {
        self.inner.query(query).await
    }
}
