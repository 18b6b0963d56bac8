//! Final disposition of an answered task

use serde::{Deserialize, Serialize};

use crate::collab::AuthOutcome;
use crate::task::TaskRecord;

/// What the reporting channel is told about a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Subject claimed the action and the claim was authenticated
    Confirmed,
    /// Subject claimed the action but authentication did not back it up
    Unverified,
    /// Subject says they did not do it
    Denied,
    /// Nobody answered
    Unanswered,
}

impl Disposition {
    /// Whether a human responder should look at this alert.
    pub fn needs_attention(self) -> bool {
        !matches!(self, Self::Confirmed)
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed => write!(f, "confirmed"),
            Self::Unverified => write!(f, "unverified"),
            Self::Denied => write!(f, "denied"),
            Self::Unanswered => write!(f, "unanswered"),
        }
    }
}

/// Whether a push challenge would change the outcome for this task.
///
/// Only a claimed-but-unauthenticated reply is worth a challenge.
pub fn needs_challenge(task: &TaskRecord) -> bool {
    task.performed == Some(true) && task.authenticated != Some(true)
}

/// Decide the disposition from the recorded reply and an optional challenge.
pub fn decide(task: &TaskRecord, challenge: Option<AuthOutcome>) -> Disposition {
    match (task.performed, task.authenticated) {
        (None, _) => Disposition::Unanswered,
        (Some(false), _) => Disposition::Denied,
        (Some(true), Some(true)) => Disposition::Confirmed,
        (Some(true), _) => match challenge {
            Some(AuthOutcome::Allowed) => Disposition::Confirmed,
            _ => Disposition::Unverified,
        },
    }
}
