//! Task entity: the alert record plus its persisted transitions
//!
//! A `Task` is the only writer of its own record. Each transition checks its
//! precondition locally, issues exactly one conditional store write, and only
//! then updates the in-memory record. If the write fails or its condition no
//! longer holds, the in-memory record is left as it was.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::types::{Response, TaskRecord};
use crate::clock::SharedClock;
use crate::collab::AuthOutcome;
use crate::error::{InvalidTransition, TransitionResult};
use crate::escalation::{Escalation, EscalationChain};
use crate::state::{MarkOutcome, SharedTaskStore, StoreError, StoreResult};
use crate::status::TaskStatus;

/// Default bound on a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of [`Task::set_escalated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationClaim {
    /// This call set `notified_at`; the caller owns sending the notice
    Claimed(DateTime<Utc>),
    /// Already notified, by this task object or a concurrent scheduler
    AlreadyNotified(DateTime<Utc>),
}

impl EscalationClaim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }

    pub fn notified_at(&self) -> DateTime<Utc> {
        match self {
            Self::Claimed(at) | Self::AlreadyNotified(at) => *at,
        }
    }
}

/// Result of [`Task::set_challenged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeClaim {
    /// This call claimed the push challenge; the caller owns sending it
    Claimed(DateTime<Utc>),
    /// A challenge was already claimed at this time
    AlreadyClaimed(DateTime<Utc>),
}

/// A live task bound to the store it was read from.
pub struct Task {
    record: TaskRecord,
    store: SharedTaskStore,
    clock: SharedClock,
    store_timeout: Duration,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("hash", &self.record.hash)
            .field("status", &self.record.status)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl Task {
    pub fn new(record: TaskRecord, store: SharedTaskStore, clock: SharedClock) -> Self {
        Self {
            record,
            store,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Override the per-call store timeout
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    pub fn hash(&self) -> &str {
        &self.record.hash
    }

    pub fn status(&self) -> TaskStatus {
        self.record.status
    }

    pub fn escalation(&self) -> &EscalationChain {
        &self.record.escalation
    }

    pub fn waiting_since(&self) -> Option<DateTime<Utc>> {
        self.record.waiting_since
    }

    pub fn is_verifying(&self) -> bool {
        self.record.status == TaskStatus::Verification
    }

    /// Escalations due at `now`, earliest delay first.
    pub fn due_escalations(&self, now: DateTime<Utc>) -> Vec<Escalation> {
        self.record
            .escalation
            .due(self.record.waiting_since, now)
            .into_iter()
            .cloned()
            .collect()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Force the task back to `Open`.
    ///
    /// Repair/initialisation only: skips the forward-transition table and
    /// writes unconditionally. Must not race other transitions on this task.
    pub async fn set_open(&mut self) -> TransitionResult<()> {
        let at = self.clock.now();
        let hash = self.record.hash.clone();
        self.guarded(self.store.update_status(&hash, None, TaskStatus::Open, at))
            .await?;
        debug!(hash = %hash, from = %self.record.status, "Task reset to open");
        self.record.apply_status(TaskStatus::Open, at);
        Ok(())
    }

    /// `Open -> InProgress`; starts the escalation clock.
    pub async fn set_in_progress(&mut self) -> TransitionResult<()> {
        self.transition(TaskStatus::InProgress).await
    }

    /// Hand an unprompted claim back: `InProgress -> Open`.
    ///
    /// Conditioned on the wait this task started, so a task a peer has
    /// answered or re-claimed in the meantime is left alone.
    pub async fn release(&mut self) -> TransitionResult<()> {
        let since = match (self.record.status, self.record.waiting_since) {
            (TaskStatus::InProgress, Some(since)) => since,
            (from, _) => {
                return Err(InvalidTransition::IllegalStatus {
                    hash: self.record.hash.clone(),
                    from,
                    to: TaskStatus::Open,
                }
                .into())
            }
        };
        let at = self.clock.now();
        let hash = self.record.hash.clone();

        let applied = self.guarded(self.store.reopen(&hash, since, at)).await?;
        if !applied {
            return Err(self.conflict().into());
        }

        debug!(hash = %hash, "Claim released");
        self.record.apply_status(TaskStatus::Open, at);
        Ok(())
    }

    /// `InProgress -> Verification`, persisting the response in the same write.
    pub async fn set_verifying(&mut self, response: Response) -> TransitionResult<()> {
        self.check_forward(TaskStatus::Verification)?;
        let at = self.clock.now();
        let hash = self.record.hash.clone();

        let applied = self
            .guarded(self.store.record_response(&hash, &response, at))
            .await?;
        if !applied {
            return Err(self.conflict().into());
        }

        debug!(
            hash = %hash,
            performed = ?response.performed,
            authenticated = ?response.authenticated,
            "Response recorded"
        );
        self.record.apply_response(&response, at);
        Ok(())
    }

    /// `Verification -> Closed` once the disposition has been reported.
    pub async fn set_closed(&mut self) -> TransitionResult<()> {
        self.transition(TaskStatus::Closed).await
    }

    /// Mark one escalation of this task as notified.
    ///
    /// The entry is identified by `(subject, delay)`; one that is not in this
    /// task's chain is rejected before any store write. The store update is
    /// conditioned on "not yet notified", so concurrent callers observe one
    /// `Claimed` and otherwise `AlreadyNotified` carrying the original
    /// timestamp. Only a `Claimed` result authorises sending a notice.
    pub async fn set_escalated(&mut self, escalation: &Escalation) -> TransitionResult<EscalationClaim> {
        let Some(own) = self
            .record
            .escalation
            .find(&escalation.subject, escalation.delay_secs)
        else {
            return Err(InvalidTransition::UnknownEscalation {
                hash: self.record.hash.clone(),
                subject: escalation.subject.clone(),
                delay_secs: escalation.delay_secs,
            }
            .into());
        };

        if let Some(at) = own.notified_at {
            return Ok(EscalationClaim::AlreadyNotified(at));
        }

        let at = self.clock.now();
        let hash = self.record.hash.clone();
        let outcome = self
            .guarded(self.store.mark_escalated(
                &hash,
                &escalation.subject,
                escalation.delay_secs,
                at,
            ))
            .await?;

        let claim = match outcome {
            MarkOutcome::Marked => {
                info!(hash = %hash, subject = %escalation.subject, delay = escalation.delay_secs, "Escalation claimed");
                EscalationClaim::Claimed(at)
            }
            MarkOutcome::AlreadyNotified(prev) => {
                debug!(hash = %hash, subject = %escalation.subject, "Escalation already claimed elsewhere");
                EscalationClaim::AlreadyNotified(prev)
            }
            MarkOutcome::UnknownEscalation => {
                return Err(InvalidTransition::UnknownEscalation {
                    hash,
                    subject: escalation.subject.clone(),
                    delay_secs: escalation.delay_secs,
                }
                .into());
            }
            MarkOutcome::WrongStatus(status) => {
                debug!(hash = %hash, status = %status, "Task stopped waiting before escalation");
                return Err(self.conflict().into());
            }
        };

        self.record.escalation.record_notified(
            &escalation.subject,
            escalation.delay_secs,
            claim.notified_at(),
        );
        Ok(claim)
    }

    /// Claim the push challenge of a `Verification` task.
    ///
    /// At most one claim ever succeeds per task; only `Claimed` authorises
    /// contacting the subject.
    pub async fn set_challenged(&mut self) -> TransitionResult<ChallengeClaim> {
        self.require_status(TaskStatus::Verification)?;
        if let Some(at) = self.record.challenged_at {
            return Ok(ChallengeClaim::AlreadyClaimed(at));
        }

        let at = self.clock.now();
        let hash = self.record.hash.clone();
        let claim = match self.guarded(self.store.mark_challenged(&hash, at)).await? {
            MarkOutcome::Marked => ChallengeClaim::Claimed(at),
            MarkOutcome::AlreadyNotified(prev) => ChallengeClaim::AlreadyClaimed(prev),
            MarkOutcome::WrongStatus(_) | MarkOutcome::UnknownEscalation => {
                return Err(self.conflict().into())
            }
        };

        let stamp = match claim {
            ChallengeClaim::Claimed(at) | ChallengeClaim::AlreadyClaimed(at) => at,
        };
        self.record.challenged_at = Some(stamp);
        Ok(claim)
    }

    /// Record the push challenge outcome; the first recorded outcome wins and
    /// is returned.
    pub async fn set_auth_outcome(&mut self, outcome: AuthOutcome) -> TransitionResult<AuthOutcome> {
        self.require_status(TaskStatus::Verification)?;
        let at = self.clock.now();
        let hash = self.record.hash.clone();

        let Some(stored) = self
            .guarded(self.store.record_auth_outcome(&hash, outcome, at))
            .await?
        else {
            return Err(self.conflict().into());
        };

        debug!(hash = %hash, outcome = ?stored, "Auth outcome recorded");
        self.record.auth_outcome = Some(stored);
        Ok(stored)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn transition(&mut self, to: TaskStatus) -> TransitionResult<()> {
        self.check_forward(to)?;
        let from = self.record.status;
        let at = self.clock.now();
        let hash = self.record.hash.clone();

        let applied = self
            .guarded(self.store.update_status(&hash, Some(from), to, at))
            .await?;
        if !applied {
            return Err(self.conflict().into());
        }

        debug!(hash = %hash, from = %from, to = %to, "Status transition persisted");
        self.record.apply_status(to, at);
        Ok(())
    }

    fn check_forward(&self, to: TaskStatus) -> Result<(), InvalidTransition> {
        if self.record.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(InvalidTransition::IllegalStatus {
                hash: self.record.hash.clone(),
                from: self.record.status,
                to,
            })
        }
    }

    fn require_status(&self, status: TaskStatus) -> Result<(), InvalidTransition> {
        if self.record.status == status {
            Ok(())
        } else {
            Err(InvalidTransition::IllegalStatus {
                hash: self.record.hash.clone(),
                from: self.record.status,
                to: status,
            })
        }
    }

    fn conflict(&self) -> InvalidTransition {
        InvalidTransition::Conflict {
            hash: self.record.hash.clone(),
            expected: self.record.status,
        }
    }

    /// Bound a store call by the configured timeout.
    async fn guarded<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))?
    }
}
