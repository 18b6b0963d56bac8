//! Content-derived task identity.

use chrono::{DateTime, Utc};

/// Length of a task hash in hex characters.
pub const HASH_LEN: usize = 64;

/// Derive the identity of an alert from its descriptive content.
///
/// Fields are length-prefixed so that `("ab", "c")` and `("a", "bc")` hash
/// differently. The same alert seen twice yields the same hash, which is
/// what lets the store reject duplicate ingestion.
pub fn content_hash(
    title: &str,
    ldap: &str,
    reason: &str,
    description: &str,
    url: Option<&str>,
    event_time: DateTime<Utc>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in [title, ldap, reason, description, url.unwrap_or("")] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update(&event_time.timestamp_micros().to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// True if `s` looks like a hash produced by [`content_hash`].
pub fn is_valid_hash(s: &str) -> bool {
    s.len() == HASH_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
