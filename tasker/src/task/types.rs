//! Persistent task record and the subject's response
//!
//! `TaskRecord` is what a store holds. The `apply_*` methods are the single
//! definition of how a transition changes a record; every store backend
//! calls them so the bookkeeping rules (`waiting_since`, `updated_at`) live
//! in one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collab::AuthOutcome;
use crate::escalation::EscalationChain;
use crate::status::TaskStatus;

/// Content-derived task identity (64 hex chars).
pub type TaskHash = String;

/// What the subject said about the alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Free-text reply
    pub comment: String,
    /// Did the subject perform the action? `None` = unknown
    pub performed: Option<bool>,
    /// Did the subject authenticate the claim? `None` = unknown
    pub authenticated: Option<bool>,
}

impl Response {
    pub fn new(comment: impl Into<String>, performed: bool, authenticated: bool) -> Self {
        Self {
            comment: comment.into(),
            performed: Some(performed),
            authenticated: Some(authenticated),
        }
    }

    /// Default recorded when the subject never answered.
    pub fn no_response(reason: impl Into<String>) -> Self {
        Self {
            comment: reason.into(),
            performed: None,
            authenticated: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.performed.is_some()
    }
}

/// One security alert as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Identity, assigned at creation, never regenerated
    pub hash: TaskHash,
    pub title: String,
    /// Subject the alert concerns
    pub ldap: String,
    pub reason: String,
    pub description: String,
    pub url: Option<String>,
    pub event_time: DateTime<Utc>,

    pub comment: Option<String>,
    pub performed: Option<bool>,
    pub authenticated: Option<bool>,

    pub status: TaskStatus,
    /// When the task started waiting on its subject (set with InProgress)
    pub waiting_since: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// When a push challenge was claimed during reconciliation; set at most once
    #[serde(default)]
    pub challenged_at: Option<DateTime<Utc>>,
    /// Outcome of that challenge, fixed once recorded
    #[serde(default)]
    pub auth_outcome: Option<AuthOutcome>,

    pub escalation: EscalationChain,
}

impl TaskRecord {
    /// The recorded response, once the task has left the waiting states.
    pub fn response(&self) -> Option<Response> {
        if self.status.is_waiting() {
            return None;
        }
        Some(Response {
            comment: self.comment.clone().unwrap_or_default(),
            performed: self.performed,
            authenticated: self.authenticated,
        })
    }

    /// Apply a status change.
    ///
    /// Entering `InProgress` starts the wait clock; returning to `Open`
    /// clears it.
    pub fn apply_status(&mut self, to: TaskStatus, at: DateTime<Utc>) {
        match to {
            TaskStatus::InProgress => self.waiting_since = Some(at),
            TaskStatus::Open => self.waiting_since = None,
            TaskStatus::Verification | TaskStatus::Closed => {}
        }
        self.status = to;
        self.updated_at = at;
    }

    /// Move to `Verification` and fix the response fields.
    pub fn apply_response(&mut self, response: &Response, at: DateTime<Utc>) {
        self.comment = Some(response.comment.clone());
        self.performed = response.performed;
        self.authenticated = response.authenticated;
        self.apply_status(TaskStatus::Verification, at);
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::escalation::Escalation;

    pub fn record(hash: &str, status: TaskStatus, escalation: Vec<Escalation>) -> TaskRecord {
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        TaskRecord {
            hash: hash.to_string(),
            title: "sudo_on_prod".into(),
            ldap: "alice".into(),
            reason: "ran sudo on a production host".into(),
            description: "sudo -i on web-01".into(),
            url: None,
            event_time: at,
            comment: None,
            performed: None,
            authenticated: None,
            status,
            waiting_since: None,
            updated_at: at,
            challenged_at: None,
            auth_outcome: None,
            escalation: EscalationChain::new(escalation).unwrap(),
        }
    }
}
