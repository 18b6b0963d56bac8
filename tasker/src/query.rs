//! Reporting surface: filtered reads and task creation
//!
//! Pure pass-through over the store contract. Filters mirror what the
//! reporting front end exposes (titles, subjects, status, response flags,
//! event-time window, limit); creation seeds an `Open` task with its chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::escalation::{ChainError, Escalation, EscalationChain};
use crate::state::{StoreError, TaskStore};
use crate::status::TaskStatus;
use crate::task::{content_hash, TaskRecord};

/// Default number of rows returned by a query
pub const DEFAULT_LIMIT: usize = 50;

/// Read-only filter over tasks. Unset fields match everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQuery {
    pub limit: usize,
    pub titles: Option<Vec<String>>,
    pub ldap: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub performed: Option<bool>,
    pub authenticated: Option<bool>,
    /// Event time strictly after
    pub after: Option<DateTime<Utc>>,
    /// Event time strictly before
    pub before: Option<DateTime<Utc>>,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            titles: None,
            ldap: None,
            status: None,
            performed: None,
            authenticated: None,
            after: None,
            before: None,
        }
    }
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_titles(mut self, titles: Vec<String>) -> Self {
        self.titles = Some(titles);
        self
    }

    pub fn with_subjects(mut self, ldap: Vec<String>) -> Self {
        self.ldap = Some(ldap);
        self
    }

    pub fn between(mut self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        self.after = after;
        self.before = before;
        self
    }

    pub fn matches(&self, task: &TaskRecord) -> bool {
        self.titles.as_ref().map_or(true, |t| t.contains(&task.title))
            && self.ldap.as_ref().map_or(true, |l| l.contains(&task.ldap))
            && self.status.map_or(true, |s| s == task.status)
            && self.performed.map_or(true, |p| task.performed == Some(p))
            && self.authenticated.map_or(true, |a| task.authenticated == Some(a))
            && self.after.map_or(true, |after| task.event_time > after)
            && self.before.map_or(true, |before| task.event_time < before)
    }

    /// Filter, order newest event first, and truncate to `limit`.
    pub fn apply(&self, tasks: Vec<TaskRecord>) -> Vec<TaskRecord> {
        let mut hits: Vec<TaskRecord> = tasks.into_iter().filter(|t| self.matches(t)).collect();
        hits.sort_by(|a, b| b.event_time.cmp(&a.event_time).then_with(|| a.hash.cmp(&b.hash)));
        hits.truncate(self.limit);
        hits
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub title: String,
    pub ldap: String,
    pub description: String,
    pub reason: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Defaults to creation time
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalation: Vec<Escalation>,
}

/// Errors from [`create_task`]
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("{0} must be specified")]
    MissingField(&'static str),

    #[error("invalid escalation chain: {0}")]
    InvalidChain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl NewAlert {
    fn validate(&self) -> Result<(), CreateError> {
        for (name, value) in [
            ("title", &self.title),
            ("ldap", &self.ldap),
            ("description", &self.description),
            ("reason", &self.reason),
        ] {
            if value.trim().is_empty() {
                return Err(CreateError::MissingField(name));
            }
        }
        Ok(())
    }
}

/// Seed a new `Open` task with its escalation chain.
///
/// The identity is derived from the alert content, so submitting the same
/// alert twice fails with `StoreError::Duplicate`.
pub async fn create_task(
    store: &dyn TaskStore,
    alert: NewAlert,
    clock: &dyn Clock,
) -> Result<TaskRecord, CreateError> {
    alert.validate()?;
    let now = clock.now();
    let event_time = alert.event_time.unwrap_or(now);
    let url = alert.url.filter(|u| !u.trim().is_empty());
    // A new task starts with nobody notified.
    let entries = alert
        .escalation
        .into_iter()
        .map(|e| Escalation::new(e.subject, e.delay_secs))
        .collect();
    let escalation = EscalationChain::new(entries)?;

    let record = TaskRecord {
        hash: content_hash(
            &alert.title,
            &alert.ldap,
            &alert.reason,
            &alert.description,
            url.as_deref(),
            event_time,
        ),
        title: alert.title,
        ldap: alert.ldap,
        reason: alert.reason,
        description: alert.description,
        url,
        event_time,
        comment: None,
        performed: None,
        authenticated: None,
        status: TaskStatus::Open,
        waiting_since: None,
        updated_at: now,
        challenged_at: None,
        auth_outcome: None,
        escalation,
    };

    store.insert(&record).await?;
    info!(
        hash = %record.hash,
        title = %record.title,
        subject = %record.ldap,
        escalations = record.escalation.len(),
        "Task created"
    );
    Ok(record)
}

/// Lenient parse of an escalation list such as
/// `[{"ldap": "bob", "delay_in_sec": 300}]`.
///
/// Input that is not a JSON list yields an empty chain; entries without a
/// subject or with an unusable delay are skipped.
pub fn parse_escalation_list(raw: &str) -> Vec<Escalation> {
    if raw.trim().is_empty() {
        debug!("Escalation parameter is empty");
        return Vec::new();
    }

    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Parsing escalation list failed");
            return Vec::new();
        }
    };

    let Some(items) = value.as_array() else {
        debug!("Escalation list is not a list");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let subject = obj
                .get("ldap")
                .or_else(|| obj.get("subject"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if subject.trim().is_empty() {
                debug!("Skipping escalation entry without subject");
                return None;
            }
            let delay = obj
                .get("delay_in_sec")
                .or_else(|| obj.get("delay_secs"))
                .map_or(Some(0), |v| {
                    v.as_u64()
                        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                });
            match delay {
                Some(delay) => {
                    debug!(subject, delay, "Adding escalation");
                    Some(Escalation::new(subject, delay))
                }
                None => {
                    debug!(subject, "Couldn't convert delay_in_sec to integer");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::MemoryStore;
    use crate::task::is_valid_hash;
    use crate::task::types::fixtures::record;
    use chrono::Duration;

    fn alert() -> NewAlert {
        NewAlert {
            title: "sudo_on_prod".into(),
            ldap: "alice".into(),
            description: "sudo -i on web-01".into(),
            reason: "ran sudo on a production host".into(),
            url: None,
            event_time: None,
            escalation: vec![Escalation::new("bob", 300)],
        }
    }

    #[tokio::test]
    async fn test_create_seeds_open_task() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let rec = create_task(&store, alert(), &clock).await.unwrap();

        assert!(is_valid_hash(&rec.hash));
        assert_eq!(rec.status, TaskStatus::Open);
        assert_eq!(rec.event_time, clock.now());
        assert_eq!(rec.escalation.len(), 1);
        assert_eq!(store.get(&rec.hash).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn test_create_clears_supplied_notification_stamps() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let mut input = alert();
        input.escalation[0].notified_at = Some(clock.now() - Duration::hours(1));

        let rec = create_task(&store, input, &clock).await.unwrap();
        assert_eq!(rec.escalation.entries()[0].notified_at, None);

        let stored = store.escalations(&rec.hash).await.unwrap();
        assert_eq!(stored[0].notified_at, None);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_alert() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        create_task(&store, alert(), &clock).await.unwrap();
        let err = create_task(&store, alert(), &clock).await.unwrap_err();
        assert!(matches!(err, CreateError::Store(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_create_requires_fields() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let mut bad = alert();
        bad.reason = "  ".into();
        let err = create_task(&store, bad, &clock).await.unwrap_err();
        assert_eq!(err.to_string(), "reason must be specified");
    }

    #[test]
    fn test_query_filters_and_orders() {
        let mut older = record("a", TaskStatus::Open, vec![]);
        let mut newer = record("b", TaskStatus::Verification, vec![]);
        newer.event_time = older.event_time + Duration::hours(1);
        newer.performed = Some(true);
        older.ldap = "bob".into();

        let all = TaskQuery::new().apply(vec![older.clone(), newer.clone()]);
        assert_eq!(all.iter().map(|t| t.hash.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);

        let by_status = TaskQuery::new()
            .with_status(TaskStatus::Verification)
            .apply(vec![older.clone(), newer.clone()]);
        assert_eq!(by_status.len(), 1);

        let by_subject = TaskQuery::new()
            .with_subjects(vec!["bob".into()])
            .apply(vec![older.clone(), newer.clone()]);
        assert_eq!(by_subject[0].hash, "a");

        let window = TaskQuery::new()
            .between(Some(older.event_time), None)
            .apply(vec![older.clone(), newer.clone()]);
        assert_eq!(window.len(), 1);

        let performed = TaskQuery {
            performed: Some(true),
            ..Default::default()
        };
        assert!(performed.matches(&newer));
        assert!(!performed.matches(&older));

        let limited = TaskQuery::new().with_limit(1).apply(vec![older, newer]);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_parse_escalation_list_is_lenient() {
        let parsed = parse_escalation_list(
            r#"[{"ldap": "bob", "delay_in_sec": 300},
                {"ldap": "carol", "delay_in_sec": "600"},
                {"ldap": "dave", "delay_in_sec": "soon"},
                {"delay_in_sec": 10},
                "not an object"]"#,
        );
        assert_eq!(
            parsed,
            vec![Escalation::new("bob", 300), Escalation::new("carol", 600)]
        );
    }

    #[test]
    fn test_parse_escalation_list_rejects_non_lists() {
        assert!(parse_escalation_list("").is_empty());
        assert!(parse_escalation_list("{not json").is_empty());
        assert!(parse_escalation_list(r#"{"ldap": "bob"}"#).is_empty());
    }
}
