//! Task Entity: one security alert moving through verification
//!
//! `types` holds the persisted record, `entity` the live `Task` that owns
//! its transitions, `hash` the content-derived identity.

pub mod entity;
pub mod hash;
pub mod types;

pub use entity::{ChallengeClaim, EscalationClaim, Task, DEFAULT_STORE_TIMEOUT};
pub use hash::{content_hash, is_valid_hash};
pub use types::{Response, TaskHash, TaskRecord};
