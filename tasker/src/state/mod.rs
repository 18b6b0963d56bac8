//! State persistence for alert tasks
//!
//! Tasks and taskers depend only on the [`TaskStore`] trait; prompt
//! suppression rules live behind [`RuleStore`]. Two backends implement both:
//!
//! - [`MemoryStore`]: in-process map, used by tests and single-shot runs
//! - `RocksStore`: RocksDB with `alerts` / `escalation` column families,
//!   behind the `heavy-state` feature
//!
//! # Usage
//!
//! ```ignore
//! use tasker::state::{MemoryStore, TaskStore};
//!
//! let store = MemoryStore::new().shared();
//! store.insert(&record).await?;
//! let open = store.list_by_status(TaskStatus::Open).await?;
//! ```

pub mod memory;
#[cfg(feature = "heavy-state")]
pub mod rocks;
pub mod rules;
#[cfg(feature = "heavy-state")]
pub mod schema;
pub mod store;

pub use memory::MemoryStore;
#[cfg(feature = "heavy-state")]
pub use rocks::RocksStore;
pub use rules::{IgnoreRule, RuleQuery, RuleStore, SharedRuleStore};
pub use store::{MarkOutcome, SharedTaskStore, StoreError, StoreResult, TaskStore};
