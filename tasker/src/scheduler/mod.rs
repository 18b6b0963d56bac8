//! Scheduler: fixed-interval control loop over the tasker
//!
//! Each tick runs three steps:
//!
//! ```text
//! get_new_tasks()      ─► [ignored / blacklisted: set_in_progress ─► set_verifying]
//!                      ─► set_in_progress ─► send_prompt ─(failed)─► release
//! get_active_tasks()   ─► poll_reply ─┬─ reply ─► set_verifying
//!                                      └─ none ─► due escalations: set_escalated ─► send_escalation
//!                                                 response timeout: set_verifying(no_response)
//! get_pending_tasks()  ─► [set_challenged ─► challenge ─► set_auth_outcome]
//!                      ─► report disposition ─► set_closed
//! ```
//!
//! Tasks within a step run concurrently. A failure on one task is logged and
//! counted; it never aborts the tick. Only an unreachable tasker fails the
//! tick, and the next interval retries.
//!
//! State is always claimed before a side effect is performed: the prompt is
//! sent after `set_in_progress` succeeds, an escalation notice after
//! `set_escalated` returns `Claimed`, and a push challenge after
//! `set_challenged` returns `Claimed`. Two schedulers on the same store can
//! therefore never notify the same subject twice for the same step. A prompt
//! that fails to go out releases its claim so the next tick prompts again.

pub mod reconcile;

pub use reconcile::Disposition;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::collab::{AuthClient, AuthOutcome, ChatClient, CollaboratorError, CollaboratorResult};
use crate::error::{InvalidTransition, TransitionError};
use crate::state::{SharedRuleStore, StoreError, StoreResult};
use crate::task::{ChallengeClaim, Response, Task, TaskRecord, DEFAULT_STORE_TIMEOUT};
use crate::tasker::Tasker;

/// Tick-level failure. Only raised when the tasker itself cannot be read.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("tasker unavailable: {0}")]
    Tasker(#[from] StoreError),
}

/// Failure of one task within one tick.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("rule lookup failed: {0}")]
    Rules(#[from] StoreError),
}

impl StepError {
    /// Another scheduler moved the task first; nothing went wrong.
    fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Transition(TransitionError::Invalid(InvalidTransition::Conflict { .. }))
        )
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub tick_interval: Duration,
    /// Bound on every chat/auth call
    pub collaborator_timeout: Duration,
    /// Move unanswered tasks to verification after this long (None = never)
    pub response_timeout: Option<Duration>,
    /// Bound on every rule lookup
    pub store_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            collaborator_timeout: Duration::from_secs(30),
            response_timeout: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// New tasks moved to in-progress
    pub prompted: usize,
    /// New tasks answered on the subject's behalf by an ignore rule or the blacklist
    pub suppressed: usize,
    /// Replies recorded
    pub verified: usize,
    /// Escalation notices claimed
    pub escalated: usize,
    /// Tasks given the no-response default
    pub timed_out: usize,
    /// Dispositions reported and tasks closed
    pub closed: usize,
    /// Tasks another scheduler advanced first
    pub skipped: usize,
    /// Tasks that hit an error this tick
    pub failed: usize,
}

impl TickReport {
    fn merge(&mut self, other: TickReport) {
        self.prompted += other.prompted;
        self.suppressed += other.suppressed;
        self.verified += other.verified;
        self.escalated += other.escalated;
        self.timed_out += other.timed_out;
        self.closed += other.closed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// The control loop.
pub struct Scheduler {
    tasker: Arc<dyn Tasker>,
    chat: Arc<dyn ChatClient>,
    auth: Option<Arc<dyn AuthClient>>,
    rules: Option<SharedRuleStore>,
    clock: SharedClock,
    config: SchedulerConfig,
    instance_id: String,
}

impl Scheduler {
    pub fn new(
        tasker: Arc<dyn Tasker>,
        chat: Arc<dyn ChatClient>,
        clock: SharedClock,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tasker,
            chat,
            auth: None,
            rules: None,
            clock,
            config,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Enable push-auth corroboration during reconciliation
    pub fn with_auth(mut self, auth: Arc<dyn AuthClient>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Consult ignore rules and the blacklist before prompting
    pub fn with_rules(mut self, rules: SharedRuleStore) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run ticks until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between ticks; a tick that has started
    /// runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            instance = %self.instance_id,
            interval = ?self.config.tick_interval,
            auth = self.auth.is_some(),
            rules = self.rules.is_some(),
            "Scheduler started"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(instance = %self.instance_id, "Scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.is_idle() => debug!("Idle tick"),
                        Ok(report) => info!(
                            prompted = report.prompted,
                            suppressed = report.suppressed,
                            verified = report.verified,
                            escalated = report.escalated,
                            timed_out = report.timed_out,
                            closed = report.closed,
                            skipped = report.skipped,
                            failed = report.failed,
                            "Tick complete"
                        ),
                        Err(e) => error!(error = %e, "Tick aborted; retrying next interval"),
                    }
                }
            }
        }

        info!(instance = %self.instance_id, "Scheduler stopped");
    }

    /// One pass over new, active and pending tasks.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::default();

        let new = self.tasker.get_new_tasks().await?;
        let steps = new.into_iter().map(|t| self.guard(t.hash().to_string(), self.handle_new(t)));
        for part in join_all(steps).await {
            report.merge(part);
        }

        let active = self.tasker.get_active_tasks().await?;
        let steps = active
            .into_iter()
            .map(|t| self.guard(t.hash().to_string(), self.handle_active(t)));
        for part in join_all(steps).await {
            report.merge(part);
        }

        let pending = self.tasker.get_pending_tasks().await?;
        let steps = pending
            .into_iter()
            .map(|t| self.guard(t.hash().to_string(), self.handle_pending(t)));
        for part in join_all(steps).await {
            report.merge(part);
        }

        Ok(report)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Step 1: claim the task, then prompt its subject.
    ///
    /// A subject covered by an ignore rule or the blacklist is not prompted;
    /// the task is answered on their behalf instead. If the prompt or that
    /// answer cannot be written, the claim is released for the next tick.
    async fn handle_new(&self, mut task: Task) -> Result<TickReport, StepError> {
        let stand_in = self.stand_in_response(task.record()).await?;
        task.set_in_progress().await?;

        let (outcome, report) = match stand_in {
            Some(response) => {
                info!(hash = %task.hash(), subject = %task.record().ldap, comment = %response.comment, "Prompt suppressed");
                let outcome = task.set_verifying(response).await.map_err(StepError::from);
                (
                    outcome,
                    TickReport {
                        suppressed: 1,
                        ..Default::default()
                    },
                )
            }
            None => {
                info!(hash = %task.hash(), subject = %task.record().ldap, "Prompting subject");
                let outcome = self
                    .bounded(self.chat.send_prompt(task.record()))
                    .await
                    .map_err(StepError::from);
                (
                    outcome,
                    TickReport {
                        prompted: 1,
                        ..Default::default()
                    },
                )
            }
        };

        if let Err(e) = outcome {
            if let Err(release) = task.release().await {
                error!(hash = %task.hash(), error = %release, "Prompt failed and claim could not be released");
            }
            return Err(e);
        }
        Ok(report)
    }

    /// Step 2: record a reply, or fire due escalations and the timeout default.
    async fn handle_active(&self, mut task: Task) -> Result<TickReport, StepError> {
        let mut report = TickReport::default();

        if let Some(response) = self.bounded(self.chat.poll_reply(task.record())).await? {
            info!(
                hash = %task.hash(),
                performed = ?response.performed,
                authenticated = ?response.authenticated,
                "Reply received"
            );
            task.set_verifying(response).await?;
            report.verified = 1;
            return Ok(report);
        }

        let now = self.clock.now();
        for escalation in task.due_escalations(now) {
            let claim = task.set_escalated(&escalation).await?;
            if !claim.is_claimed() {
                continue;
            }
            report.escalated += 1;
            info!(
                hash = %task.hash(),
                subject = %escalation.subject,
                delay = escalation.delay_secs,
                "Escalating"
            );
            if let Err(e) = self
                .bounded(self.chat.send_escalation(task.record(), &escalation))
                .await
            {
                // The claim stands: at most one notice per escalation.
                error!(
                    hash = %task.hash(),
                    subject = %escalation.subject,
                    error = %e,
                    "Escalation claimed but notice failed"
                );
                report.failed = 1;
            }
        }

        if self.response_timed_out(&task, now) {
            let secs = self.config.response_timeout.map_or(0, |d| d.as_secs());
            warn!(hash = %task.hash(), timeout_secs = secs, "No reply; recording default response");
            task.set_verifying(Response::no_response(format!(
                "No response within {} seconds",
                secs
            )))
            .await?;
            report.timed_out = 1;
        }

        Ok(report)
    }

    /// Step 3: corroborate if useful, report the disposition, close.
    async fn handle_pending(&self, mut task: Task) -> Result<TickReport, StepError> {
        let challenge = match (&self.auth, reconcile::needs_challenge(task.record())) {
            (Some(auth), true) => match self.corroborate(&mut task, auth.as_ref()).await? {
                Some(outcome) => Some(outcome),
                None => {
                    debug!(hash = %task.hash(), "Push challenge in flight elsewhere");
                    return Ok(TickReport {
                        skipped: 1,
                        ..Default::default()
                    });
                }
            },
            _ => None,
        };

        let disposition = reconcile::decide(task.record(), challenge);
        self.bounded(self.chat.report(task.record(), disposition))
            .await?;
        task.set_closed().await?;

        info!(hash = %task.hash(), disposition = %disposition, "Task closed");
        Ok(TickReport {
            closed: 1,
            ..Default::default()
        })
    }

    /// Push-challenge the subject at most once per task and persist the
    /// outcome before it is used, so a retried report reuses it.
    ///
    /// `None` while a challenge claimed by another scheduler may still be
    /// running; once that claim is older than the collaborator timeout it
    /// counts as timed out.
    async fn corroborate(
        &self,
        task: &mut Task,
        auth: &dyn AuthClient,
    ) -> Result<Option<AuthOutcome>, StepError> {
        if let Some(outcome) = task.record().auth_outcome {
            return Ok(Some(outcome));
        }

        let outcome = match task.set_challenged().await? {
            ChallengeClaim::Claimed(_) => {
                let record = task.record();
                match self.bounded(auth.challenge(&record.ldap, &record.title)).await {
                    Ok(outcome) => {
                        debug!(hash = %task.hash(), outcome = ?outcome, "Auth challenge finished");
                        outcome
                    }
                    Err(CollaboratorError::Timeout(limit)) => {
                        warn!(hash = %task.hash(), timeout = ?limit, "Push challenge unanswered");
                        AuthOutcome::TimedOut
                    }
                    Err(e) => {
                        error!(hash = %task.hash(), error = %e, "Push challenge claimed but not delivered");
                        AuthOutcome::Unavailable
                    }
                }
            }
            ChallengeClaim::AlreadyClaimed(at) => {
                let age = self.clock.now().signed_duration_since(at);
                let in_flight = match chrono::Duration::from_std(self.config.collaborator_timeout) {
                    Ok(limit) => age < limit,
                    Err(_) => true,
                };
                if in_flight {
                    return Ok(None);
                }
                warn!(hash = %task.hash(), claimed_at = %at, "Abandoned push challenge; treating as timed out");
                AuthOutcome::TimedOut
            }
        };

        Ok(Some(task.set_auth_outcome(outcome).await?))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Response recorded instead of prompting, if a rule covers the task.
    async fn stand_in_response(&self, task: &TaskRecord) -> Result<Option<Response>, StepError> {
        let Some(rules) = &self.rules else {
            return Ok(None);
        };

        if self.bounded_store(rules.is_blacklisted(&task.ldap)).await? {
            return Ok(Some(Response::no_response("Subject is blacklisted")));
        }

        let now = self.clock.now();
        let rule = self
            .bounded_store(rules.active_ignore(&task.ldap, &task.title, now))
            .await?;
        Ok(rule.map(|r| Response::new(format!("Ignored: {}", r.reason), true, true)))
    }

    fn response_timed_out(&self, task: &Task, now: DateTime<Utc>) -> bool {
        let (Some(timeout), Some(since)) = (self.config.response_timeout, task.waiting_since())
        else {
            return false;
        };
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now.signed_duration_since(since) >= timeout,
            Err(_) => false,
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = CollaboratorResult<T>>) -> CollaboratorResult<T> {
        let limit = self.config.collaborator_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CollaboratorError::Timeout(limit))?
    }

    async fn bounded_store<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        let limit = self.config.store_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
    }

    /// Turn a per-task result into a report, logging instead of propagating.
    async fn guard(
        &self,
        hash: String,
        step: impl Future<Output = Result<TickReport, StepError>>,
    ) -> TickReport {
        match step.await {
            Ok(report) => report,
            Err(e) if e.is_conflict() => {
                debug!(hash = %hash, error = %e, "Task advanced by another scheduler");
                TickReport {
                    skipped: 1,
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "Task step failed; will retry next tick");
                TickReport {
                    failed: 1,
                    ..Default::default()
                }
            }
        }
    }
}
