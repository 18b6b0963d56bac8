//! Collaborator contracts: chat and push-auth
//!
//! The core never speaks a chat or auth wire protocol. It only needs these
//! traits; the daemon supplies HTTP implementations and tests supply fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::Escalation;
use crate::scheduler::Disposition;
use crate::task::{Response, TaskRecord};

/// Errors from chat/auth collaborators. Always isolated to one task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator unreachable: {0}")]
    Unreachable(String),

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("collaborator call timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for collaborator calls
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Conversational surface that reaches subjects and responders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Ask the alert's subject whether they performed the action.
    async fn send_prompt(&self, task: &TaskRecord) -> CollaboratorResult<()>;

    /// The subject's reply, if one has arrived.
    async fn poll_reply(&self, task: &TaskRecord) -> CollaboratorResult<Option<Response>>;

    /// Notify an escalation target that the task is still unanswered.
    async fn send_escalation(
        &self,
        task: &TaskRecord,
        escalation: &Escalation,
    ) -> CollaboratorResult<()>;

    /// Post the final disposition to the reporting channel.
    async fn report(&self, task: &TaskRecord, disposition: Disposition) -> CollaboratorResult<()>;
}

/// Outcome of a push challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    Allowed,
    Denied,
    TimedOut,
    /// The challenge could not be delivered
    Unavailable,
}

/// Secondary (push-style) authentication.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Send a challenge to `subject` and wait for its outcome.
    async fn challenge(&self, subject: &str, reason: &str) -> CollaboratorResult<AuthOutcome>;
}
