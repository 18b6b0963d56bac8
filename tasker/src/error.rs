//! Transition error taxonomy
//!
//! A transition fails either because the store could not persist it
//! (`Store`) or because its precondition does not hold (`Invalid`). In both
//! cases the in-memory task is unchanged. Neither is fatal to a scheduler:
//! the next tick retries naturally because the persisted status did not move.

use thiserror::Error;

use crate::state::StoreError;
use crate::status::TaskStatus;

/// Result type for task transitions
pub type TransitionResult<T> = Result<T, TransitionError>;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid transition: {0}")]
    Invalid(#[from] InvalidTransition),
}

impl TransitionError {
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// A transition whose precondition was violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTransition {
    #[error("task {hash}: cannot move from {from} to {to}")]
    IllegalStatus {
        hash: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {hash}: no escalation for {subject} at {delay_secs}s in its chain")]
    UnknownEscalation {
        hash: String,
        subject: String,
        delay_secs: u64,
    },

    /// The persisted status was no longer the one this task was read with.
    #[error("task {hash}: persisted status is no longer {expected}")]
    Conflict { hash: String, expected: TaskStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_the_task() {
        let err: TransitionError = InvalidTransition::IllegalStatus {
            hash: "abc".into(),
            from: TaskStatus::Open,
            to: TaskStatus::Verification,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid transition: task abc: cannot move from open to verification"
        );
        assert!(!err.is_store_error());
    }

    #[test]
    fn test_store_errors_are_distinguishable() {
        let err: TransitionError = StoreError::NotFound("abc".into()).into();
        assert!(err.is_store_error());
    }
}
