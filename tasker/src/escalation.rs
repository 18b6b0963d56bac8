//! Escalation Chain: timed, single-fire notification targets for a task
//!
//! A chain is fixed when the task is created. Delays are relative to the
//! moment the task started waiting on its subject, so one chain definition
//! can be reused across tasks created at different times. `notified_at` is
//! the only field that ever changes, and it changes at most once.
//!
//! # Due-ness
//!
//! ```text
//! waiting_since            +delay                now
//!      │─────────────────────│──────────────────────│
//!                            └── due from here until notified
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One escalation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    /// Who to notify
    #[serde(alias = "ldap")]
    pub subject: String,
    /// Seconds after wait-start at which this entry becomes due
    #[serde(alias = "delay_in_sec")]
    pub delay_secs: u64,
    /// When the notice was claimed; set at most once
    #[serde(default)]
    pub notified_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn new(subject: impl Into<String>, delay_secs: u64) -> Self {
        Self {
            subject: subject.into(),
            delay_secs,
            notified_at: None,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::seconds(i64::try_from(self.delay_secs).unwrap_or(i64::MAX))
    }

    pub fn is_notified(&self) -> bool {
        self.notified_at.is_some()
    }

    /// Whether `(subject, delay)` identifies this entry.
    pub fn matches(&self, subject: &str, delay_secs: u64) -> bool {
        self.subject == subject && self.delay_secs == delay_secs
    }

    /// Due when not yet notified and `delay` has elapsed since `waiting_since`.
    pub fn is_due(&self, waiting_since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(since) = waiting_since else {
            return false;
        };
        !self.is_notified() && now.signed_duration_since(since) >= self.delay()
    }
}

/// Reasons a chain definition is rejected at creation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("escalation subject must not be empty")]
    EmptySubject,

    #[error("subject {0} appears more than once in the escalation chain")]
    DuplicateSubject(String),
}

/// Ordered escalation chain owned by a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationChain {
    entries: Vec<Escalation>,
}

impl EscalationChain {
    /// Build a chain, normalising to ascending delay order.
    ///
    /// The sort is stable, so entries sharing a delay keep their configured
    /// order. A subject may appear only once per chain.
    pub fn new(mut entries: Vec<Escalation>) -> Result<Self, ChainError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.subject.trim().is_empty() {
                return Err(ChainError::EmptySubject);
            }
            if !seen.insert(entry.subject.as_str()) {
                return Err(ChainError::DuplicateSubject(entry.subject.clone()));
            }
        }
        entries.sort_by_key(|e| e.delay_secs);
        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Escalation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Escalation> {
        self.entries.iter()
    }

    /// Entry identified by `(subject, delay)`.
    pub fn find(&self, subject: &str, delay_secs: u64) -> Option<&Escalation> {
        self.entries.iter().find(|e| e.matches(subject, delay_secs))
    }

    /// Entries due at `now`, earliest-configured first.
    pub fn due(&self, waiting_since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Vec<&Escalation> {
        self.entries
            .iter()
            .filter(|e| e.is_due(waiting_since, now))
            .collect()
    }

    /// True once every entry has fired (vacuously true for an empty chain).
    pub fn is_exhausted(&self) -> bool {
        self.entries.iter().all(Escalation::is_notified)
    }

    /// Record a notification locally. Never overwrites an existing timestamp.
    ///
    /// Returns the timestamp the entry now carries, or `None` if no entry
    /// matches.
    pub(crate) fn record_notified(
        &mut self,
        subject: &str,
        delay_secs: u64,
        at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.matches(subject, delay_secs))?;
        Some(*entry.notified_at.get_or_insert(at))
    }
}

impl<'a> IntoIterator for &'a EscalationChain {
    type Item = &'a Escalation;
    type IntoIter = std::slice::Iter<'a, Escalation>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
