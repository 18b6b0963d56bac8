//! Column family definitions for the RocksDB task store
//!
//! Alerts and escalations live in separate column families, mirroring the
//! alert / escalation split of the relational layout: an alert row carries
//! status and response, each escalation row carries its own notified flag.
//! Ignore rules and the blacklist get one column family each.

/// Column family for alert rows (descriptive fields, status, response)
pub const CF_ALERTS: &str = "alerts";

/// Column family for escalation rows
pub const CF_ESCALATION: &str = "escalation";

/// Column family for ignore rules
pub const CF_IGNORED: &str = "ignored";

/// Column family for blacklisted subjects
pub const CF_BLACKLIST: &str = "blacklist";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_ALERTS, CF_ESCALATION, CF_IGNORED, CF_BLACKLIST];

/// Key prefixes for compound keys
pub mod keys {
    /// Prefix shared by every alert key
    pub const ALERT_PREFIX: &str = "alert:";

    /// Prefix shared by every ignore rule key
    pub const IGNORE_PREFIX: &str = "ignore:";

    /// Prefix shared by every blacklist key
    pub const BLACKLIST_PREFIX: &str = "bl:";

    /// Create an alert key
    pub fn alert(hash: &str) -> String {
        format!("{}{}", ALERT_PREFIX, hash)
    }

    /// Prefix of every escalation row belonging to one task
    pub fn escalation_prefix(hash: &str) -> String {
        format!("esc:{}:", hash)
    }

    /// Create an escalation key (task + position in the chain).
    ///
    /// The position is zero-padded so key order is chain order.
    pub fn escalation(hash: &str, index: usize) -> String {
        format!("esc:{}:{:06}", hash, index)
    }

    /// Create an ignore rule key (subject + title, unit-separator joined)
    pub fn ignore(ldap: &str, title: &str) -> String {
        format!("{}{}\u{1f}{}", IGNORE_PREFIX, ldap, title)
    }

    /// Create a blacklist key
    pub fn blacklist(ldap: &str) -> String {
        format!("{}{}", BLACKLIST_PREFIX, ldap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(keys::alert("abc123"), "alert:abc123");
        assert_eq!(keys::escalation("abc123", 2), "esc:abc123:000002");
        assert_eq!(keys::blacklist("mallory"), "bl:mallory");
    }

    #[test]
    fn test_escalation_keys_share_task_prefix() {
        let prefix = keys::escalation_prefix("abc123");
        assert!(keys::escalation("abc123", 0).starts_with(&prefix));
        assert!(!keys::escalation("abc1234", 0).starts_with(&prefix));
    }

    #[test]
    fn test_escalation_keys_sort_in_chain_order() {
        assert!(keys::escalation("h", 9) < keys::escalation("h", 10));
    }

    #[test]
    fn test_ignore_key_separates_subject_and_title() {
        assert_ne!(keys::ignore("a", "bc"), keys::ignore("ab", "c"));
    }
}
