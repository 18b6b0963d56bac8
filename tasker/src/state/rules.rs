//! Prompt suppression rules: time-boxed ignores and the subject blacklist
//!
//! An ignore rule covers one `(subject, title)` pair until it expires; while
//! active, new alerts for that pair are recorded as acknowledged without a
//! prompt. A blacklisted subject is never contacted over chat; their alerts
//! go straight to reconciliation as unanswered.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::StoreResult;
use crate::query::DEFAULT_LIMIT;

/// Shared reference to a rule store
pub type SharedRuleStore = Arc<dyn RuleStore>;

/// Suppress prompts for `(ldap, title)` until `until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRule {
    pub ldap: String,
    pub title: String,
    pub reason: String,
    pub until: DateTime<Utc>,
}

impl IgnoreRule {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.until
    }

    pub fn covers(&self, ldap: &str, title: &str, now: DateTime<Utc>) -> bool {
        self.ldap == ldap && self.title == title && self.is_active(now)
    }
}

/// Filter over ignore rules. Only unexpired rules are ever listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleQuery {
    pub limit: usize,
    pub ldap: Option<Vec<String>>,
}

impl Default for RuleQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            ldap: None,
        }
    }
}

impl RuleQuery {
    /// Keep active rules for the requested subjects, soonest expiry first.
    pub fn apply(&self, rules: Vec<IgnoreRule>, now: DateTime<Utc>) -> Vec<IgnoreRule> {
        let mut hits: Vec<IgnoreRule> = rules
            .into_iter()
            .filter(|r| r.is_active(now))
            .filter(|r| self.ldap.as_ref().map_or(true, |l| l.contains(&r.ldap)))
            .collect();
        hits.sort_by(|a, b| {
            a.until
                .cmp(&b.until)
                .then_with(|| a.ldap.cmp(&b.ldap))
                .then_with(|| a.title.cmp(&b.title))
        });
        hits.truncate(self.limit);
        hits
    }
}

/// Persistence for ignore rules and the blacklist.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Insert or replace the rule for `(rule.ldap, rule.title)`.
    async fn put_ignore(&self, rule: &IgnoreRule) -> StoreResult<()>;

    /// The stored rule for `(ldap, title)`, expired or not.
    async fn get_ignore(&self, ldap: &str, title: &str) -> StoreResult<Option<IgnoreRule>>;

    /// Every stored ignore rule.
    async fn list_ignores(&self) -> StoreResult<Vec<IgnoreRule>>;

    /// Add `ldap` to the blacklist. Returns `false` if it was already there.
    async fn add_blacklist(&self, ldap: &str) -> StoreResult<bool>;

    async fn is_blacklisted(&self, ldap: &str) -> StoreResult<bool>;

    /// Blacklisted subjects in name order.
    async fn list_blacklist(&self) -> StoreResult<Vec<String>>;

    /// Unexpired rule covering `(ldap, title)` at `now`.
    async fn active_ignore(
        &self,
        ldap: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<IgnoreRule>> {
        Ok(self
            .get_ignore(ldap, title)
            .await?
            .filter(|r| r.is_active(now)))
    }

    /// Filtered read for the reporting surface.
    async fn ignored(&self, query: &RuleQuery, now: DateTime<Utc>) -> StoreResult<Vec<IgnoreRule>> {
        Ok(query.apply(self.list_ignores().await?, now))
    }

    /// First `limit` blacklisted subjects.
    async fn blacklist(&self, limit: usize) -> StoreResult<Vec<String>> {
        let mut all = self.list_blacklist().await?;
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn rule(ldap: &str, title: &str, hours: i64) -> IgnoreRule {
        IgnoreRule {
            ldap: ldap.into(),
            title: title.into(),
            reason: "known maintenance".into(),
            until: t0() + Duration::hours(hours),
        }
    }

    #[test]
    fn test_rule_expires_at_until() {
        let r = rule("alice", "sudo_on_prod", 1);
        assert!(r.covers("alice", "sudo_on_prod", t0()));
        assert!(!r.covers("alice", "ssh_root", t0()));
        assert!(!r.covers("alice", "sudo_on_prod", t0() + Duration::hours(1)));
    }

    #[test]
    fn test_query_drops_expired_and_orders_by_expiry() {
        let rules = vec![
            rule("alice", "a", 5),
            rule("bob", "b", -1),
            rule("carol", "c", 2),
        ];
        let hits = RuleQuery::default().apply(rules.clone(), t0());
        let names: Vec<_> = hits.iter().map(|r| r.ldap.as_str()).collect();
        assert_eq!(names, vec!["carol", "alice"]);

        let only_alice = RuleQuery {
            limit: 10,
            ldap: Some(vec!["alice".into()]),
        }
        .apply(rules, t0());
        assert_eq!(only_alice.len(), 1);
    }
}
