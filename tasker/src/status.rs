//! Task lifecycle status
//!
//! ```text
//! Open ──set_in_progress──► InProgress ──set_verifying──► Verification ──set_closed──► Closed
//!   ▲                                                                                   │
//!   └──────────────────────────────── set_open (repair only) ───────────────────────────┘
//! ```
//!
//! The derived `Ord` is the lifecycle order and is what query filters compare
//! against. Numeric levels exist only at the persistence boundary.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of an alert task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by ingestion, no prompt sent yet
    Open,
    /// Prompt sent, waiting on the subject's reply
    InProgress,
    /// Reply (or the no-response default) recorded, awaiting reconciliation
    Verification,
    /// Disposition reported; audit-only from here on
    Closed,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Verification,
        TaskStatus::Closed,
    ];

    /// Persisted numeric level.
    pub fn level(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::InProgress => 1,
            Self::Verification => 2,
            Self::Closed => 3,
        }
    }

    /// Inverse of [`TaskStatus::level`].
    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.level() == level)
    }

    /// Whether the forward transition `self -> to` is legal.
    ///
    /// Only single-step forward edges are legal. `set_open` is a repair
    /// operation and does not consult this table.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::InProgress)
                | (Self::InProgress, Self::Verification)
                | (Self::Verification, Self::Closed)
        )
    }

    /// True for states in which the subject has not answered yet.
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Verification => write!(f, "verification"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Error returned when parsing an unknown status name or level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    /// Accepts snake_case names or numeric levels (`"1"` == `in_progress`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(level) = trimmed.parse::<u8>() {
            return Self::from_level(level).ok_or_else(|| ParseStatusError(s.to_string()));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "verification" | "verifying" => Ok(Self::Verification),
            "closed" => Ok(Self::Closed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order_follows_lifecycle() {
        assert!(TaskStatus::Open < TaskStatus::InProgress);
        assert!(TaskStatus::InProgress < TaskStatus::Verification);
        assert!(TaskStatus::Verification < TaskStatus::Closed);
    }

    #[test]
    fn test_only_single_forward_steps_are_legal() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                let expected = to.level() == from.level() + 1;
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_level_roundtrip_and_unknown_level() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_level(status.level()), Some(status));
        }
        assert_eq!(TaskStatus::from_level(9), None);
    }

    #[test]
    fn test_parse_names_and_levels() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("2".parse::<TaskStatus>().unwrap(), TaskStatus::Verification);
        assert_eq!(" Closed ".parse::<TaskStatus>().unwrap(), TaskStatus::Closed);
        assert!("resolved".parse::<TaskStatus>().is_err());
        assert!("7".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
