//! Security alert verification core
//!
//! This library provides:
//! - The task lifecycle (`Open -> InProgress -> Verification -> Closed`) with
//!   persisted, conditional transitions
//! - Escalation chains: ordered `(subject, delay)` entries fired once each
//!   while a task waits for its subject's reply
//! - A [`Tasker`] that snapshots tasks by lifecycle state
//! - A polling [`Scheduler`] that prompts, escalates, records replies and
//!   reports dispositions through pluggable chat/auth collaborators
//! - Task stores: in-memory, and RocksDB behind the `heavy-state` feature
//! - Prompt suppression: time-boxed ignore rules and a subject blacklist
//! - A reporting surface: filtered queries and task creation
//!
//! # Usage
//!
//! ```ignore
//! let store = MemoryStore::new().shared();
//! let clock: SharedClock = Arc::new(SystemClock);
//! let tasker = Arc::new(StoreTasker::new(store.clone(), clock.clone()));
//! let scheduler = Scheduler::new(tasker, chat, clock, SchedulerConfig::default());
//! scheduler.run(shutdown).await;
//! ```

pub mod clock;
pub mod collab;
pub mod error;
pub mod escalation;
pub mod query;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod task;
pub mod tasker;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use collab::{AuthClient, AuthOutcome, ChatClient, CollaboratorError, CollaboratorResult};
pub use error::{InvalidTransition, TransitionError, TransitionResult};
pub use escalation::{ChainError, Escalation, EscalationChain};
pub use query::{create_task, parse_escalation_list, CreateError, NewAlert, TaskQuery};
pub use scheduler::{Disposition, Scheduler, SchedulerConfig, SchedulerError, TickReport};
#[cfg(feature = "heavy-state")]
pub use state::RocksStore;
pub use state::{
    IgnoreRule, MarkOutcome, MemoryStore, RuleQuery, RuleStore, SharedRuleStore, SharedTaskStore,
    StoreError, StoreResult, TaskStore,
};
pub use status::TaskStatus;
pub use task::{ChallengeClaim, EscalationClaim, Response, Task, TaskHash, TaskRecord};
pub use tasker::{StoreTasker, Tasker};
