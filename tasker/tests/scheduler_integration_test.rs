//! Integration tests for the scheduler
//!
//! Runs whole ticks against a real store with a recording chat fake,
//! validating the prompt → escalate → verify → report flow end to end.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use common::{seeded, ChatEvent, FlakyStore, RecordingChat};
use tasker::{
    create_task, Clock, Disposition, Escalation, IgnoreRule, ManualClock, MemoryStore, Response,
    RuleStore, Scheduler, SchedulerConfig, SchedulerError, SharedClock, SharedRuleStore,
    SharedTaskStore, StoreResult, StoreTasker, Task, TaskRecord, TaskStatus, TaskStore, Tasker,
};

fn scheduler(
    store: &SharedTaskStore,
    clock: &Arc<ManualClock>,
    chat: &Arc<RecordingChat>,
    config: SchedulerConfig,
) -> Scheduler {
    let clock: SharedClock = clock.clone();
    let tasker = Arc::new(StoreTasker::new(store.clone(), clock.clone()));
    Scheduler::new(tasker, chat.clone(), clock, config)
}

/// Tasker that keeps serving the snapshot it was built with, like a peer
/// scheduler that read the store just before this one wrote to it.
struct FrozenTasker {
    store: SharedTaskStore,
    clock: SharedClock,
    records: Vec<TaskRecord>,
}

impl FrozenTasker {
    async fn capture(store: &SharedTaskStore, clock: SharedClock) -> Self {
        Self {
            store: store.clone(),
            clock,
            records: store.list_all().await.unwrap(),
        }
    }

    fn with_status(&self, status: TaskStatus) -> Vec<Task> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| Task::new(r.clone(), self.store.clone(), self.clock.clone()))
            .collect()
    }
}

#[async_trait]
impl Tasker for FrozenTasker {
    async fn get_new_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.with_status(TaskStatus::Open))
    }

    async fn get_active_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.with_status(TaskStatus::InProgress))
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.with_status(TaskStatus::Verification))
    }
}

/// Test: prompt at 0s, nothing at 290s, escalation to bob at 310s
#[tokio::test]
async fn test_escalation_timeline() {
    let (store, clock, record) = seeded(vec![Escalation::new("bob", 300)]).await;
    let chat = RecordingChat::new();
    let sched = scheduler(&store, &clock, &chat, SchedulerConfig::default());
    let start = clock.now();

    let report = sched.tick().await.unwrap();
    assert_eq!(report.prompted, 1);
    assert_eq!(
        chat.events(),
        vec![ChatEvent::Prompt {
            hash: record.hash.clone(),
            subject: "alice".into()
        }]
    );

    clock.set(start + Duration::seconds(290));
    assert!(sched.tick().await.unwrap().is_idle());
    assert!(store.escalations(&record.hash).await.unwrap()[0].notified_at.is_none());

    clock.set(start + Duration::seconds(310));
    assert_eq!(sched.tick().await.unwrap().escalated, 1);
    assert_eq!(chat.escalations_to("bob"), 1);
    assert_eq!(
        store.escalations(&record.hash).await.unwrap()[0].notified_at,
        Some(clock.now())
    );

    clock.advance(Duration::seconds(60));
    sched.tick().await.unwrap();
    assert_eq!(chat.escalations_to("bob"), 1);
    assert_eq!(chat.prompts(), 1);
}

/// Test: a reply is recorded, reported and the task closed
#[tokio::test]
async fn test_reply_is_reported_and_closed() {
    let (store, clock, record) = seeded(vec![]).await;
    let chat = RecordingChat::new();
    let sched = scheduler(&store, &clock, &chat, SchedulerConfig::default());

    sched.tick().await.unwrap();
    chat.reply(&record.hash, Response::new("ran test.sh", true, true));

    let report = sched.tick().await.unwrap();
    assert_eq!(report.verified, 1);
    assert_eq!(report.closed, 1);

    let stored = store.get(&record.hash).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Closed);
    assert_eq!(stored.comment.as_deref(), Some("ran test.sh"));
    assert!(chat.events().contains(&ChatEvent::Report {
        hash: record.hash.clone(),
        disposition: Disposition::Confirmed,
    }));
}

/// Test: a subject who never answers is closed as unanswered after the timeout
#[tokio::test]
async fn test_silence_times_out_to_unanswered() {
    let (store, clock, record) = seeded(vec![]).await;
    let chat = RecordingChat::new();
    let config = SchedulerConfig {
        response_timeout: Some(StdDuration::from_secs(3600)),
        ..Default::default()
    };
    let sched = scheduler(&store, &clock, &chat, config);

    sched.tick().await.unwrap();
    clock.advance(Duration::seconds(3599));
    assert!(sched.tick().await.unwrap().is_idle());

    clock.advance(Duration::seconds(1));
    let report = sched.tick().await.unwrap();
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.closed, 1);

    let stored = store.get(&record.hash).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Closed);
    assert_eq!(stored.performed, None);
    assert!(chat.events().contains(&ChatEvent::Report {
        hash: record.hash,
        disposition: Disposition::Unanswered,
    }));
}

/// Test: two schedulers working from the same snapshot prompt once
#[tokio::test]
async fn test_racing_schedulers_prompt_once() {
    let (store, clock, _record) = seeded(vec![]).await;
    let shared_clock: SharedClock = clock.clone();
    let chat = RecordingChat::new();

    let a = Scheduler::new(
        Arc::new(FrozenTasker::capture(&store, shared_clock.clone()).await),
        chat.clone(),
        shared_clock.clone(),
        SchedulerConfig::default(),
    );
    let b = Scheduler::new(
        Arc::new(FrozenTasker::capture(&store, shared_clock.clone()).await),
        chat.clone(),
        shared_clock,
        SchedulerConfig::default(),
    );

    let (ra, rb) = tokio::join!(a.tick(), b.tick());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.prompted + rb.prompted, 1);
    assert_eq!(ra.skipped + rb.skipped, 1);
    assert_eq!(ra.failed + rb.failed, 0);
    assert_eq!(chat.prompts(), 1);
}

/// Test: two schedulers with the same stale active snapshot escalate once
#[tokio::test]
async fn test_racing_schedulers_escalate_once() {
    let (store, clock, _record) = seeded(vec![Escalation::new("bob", 300)]).await;
    let chat = RecordingChat::new();
    scheduler(&store, &clock, &chat, SchedulerConfig::default())
        .tick()
        .await
        .unwrap();
    clock.advance(Duration::seconds(300));

    let shared_clock: SharedClock = clock.clone();
    let a = Scheduler::new(
        Arc::new(FrozenTasker::capture(&store, shared_clock.clone()).await),
        chat.clone(),
        shared_clock.clone(),
        SchedulerConfig::default(),
    );
    let b = Scheduler::new(
        Arc::new(FrozenTasker::capture(&store, shared_clock.clone()).await),
        chat.clone(),
        shared_clock,
        SchedulerConfig::default(),
    );

    let (ra, rb) = tokio::join!(a.tick(), b.tick());
    assert_eq!(ra.unwrap().escalated + rb.unwrap().escalated, 1);
    assert_eq!(chat.escalations_to("bob"), 1);
}

/// Test: an unreadable store aborts the tick without side effects
#[tokio::test]
async fn test_unreadable_store_fails_tick() {
    let flaky = FlakyStore::new();
    let store: SharedTaskStore = flaky.clone();
    let clock = Arc::new(ManualClock::new(common::t0()));
    let record = create_task(store.as_ref(), common::alert("alice", vec![]), clock.as_ref())
        .await
        .unwrap();
    let chat = RecordingChat::new();
    let sched = scheduler(&store, &clock, &chat, SchedulerConfig::default());

    flaky.set_failing(true);
    let err = sched.tick().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Tasker(_)));
    assert!(chat.events().is_empty());

    flaky.set_failing(false);
    assert_eq!(sched.tick().await.unwrap().prompted, 1);
    assert_eq!(
        store.get(&record.hash).await.unwrap().unwrap().status,
        TaskStatus::InProgress
    );
}

/// Test: failed prompts are counted, released and sent on the next tick
#[tokio::test]
async fn test_prompt_failure_is_isolated() {
    let (store, clock, first) = seeded(vec![]).await;
    let second = create_task(store.as_ref(), common::alert("carol", vec![]), clock.as_ref())
        .await
        .unwrap();
    let chat = RecordingChat::new();
    chat.fail_prompts(true);
    let sched = scheduler(&store, &clock, &chat, SchedulerConfig::default());

    let report = sched.tick().await.unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.prompted, 0);
    for hash in [&first.hash, &second.hash] {
        let stored = store.get(hash).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Open);
        assert_eq!(stored.waiting_since, None);
    }

    chat.fail_prompts(false);
    clock.advance(Duration::seconds(5));
    let report = sched.tick().await.unwrap();
    assert_eq!(report.prompted, 2);
    assert_eq!(chat.prompts(), 2);
    for hash in [&first.hash, &second.hash] {
        assert_eq!(
            store.get(hash).await.unwrap().unwrap().status,
            TaskStatus::InProgress
        );
    }
}

/// Test: a scheduler holding a stale active snapshot does not escalate a
/// task a peer already moved to verification
#[tokio::test]
async fn test_stale_snapshot_does_not_escalate_answered_task() {
    let (store, clock, record) = seeded(vec![Escalation::new("bob", 300)]).await;
    let chat = RecordingChat::new();
    scheduler(&store, &clock, &chat, SchedulerConfig::default())
        .tick()
        .await
        .unwrap();
    clock.advance(Duration::seconds(300));

    let shared_clock: SharedClock = clock.clone();
    let stale = Scheduler::new(
        Arc::new(FrozenTasker::capture(&store, shared_clock.clone()).await),
        chat.clone(),
        shared_clock.clone(),
        SchedulerConfig::default(),
    );

    let mut live = StoreTasker::new(store.clone(), shared_clock)
        .get_active_tasks()
        .await
        .unwrap();
    live[0]
        .set_verifying(Response::new("ran test.sh", true, true))
        .await
        .unwrap();

    let report = stale.tick().await.unwrap();
    assert_eq!(report.escalated, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(chat.escalations_to("bob"), 0);
    assert!(store.escalations(&record.hash).await.unwrap()[0]
        .notified_at
        .is_none());
    assert_eq!(
        store.get(&record.hash).await.unwrap().unwrap().status,
        TaskStatus::Verification
    );
}

/// Test: an ignore rule answers for its subject until it expires
#[tokio::test]
async fn test_ignore_rule_suppresses_until_expiry() {
    let mem = Arc::new(MemoryStore::new());
    let store: SharedTaskStore = mem.clone();
    let rules: SharedRuleStore = mem;
    let clock = Arc::new(ManualClock::new(common::t0()));
    rules
        .put_ignore(&IgnoreRule {
            ldap: "alice".into(),
            title: "sudo_on_prod".into(),
            reason: "patching window".into(),
            until: clock.now() + Duration::hours(2),
        })
        .await
        .unwrap();
    let chat = RecordingChat::new();
    let sched = scheduler(&store, &clock, &chat, SchedulerConfig::default()).with_rules(rules);

    let quiet = create_task(store.as_ref(), common::alert("alice", vec![]), clock.as_ref())
        .await
        .unwrap();
    let report = sched.tick().await.unwrap();
    assert_eq!(report.suppressed, 1);
    assert_eq!(chat.prompts(), 0);
    assert!(chat.events().contains(&ChatEvent::Report {
        hash: quiet.hash.clone(),
        disposition: Disposition::Confirmed,
    }));

    clock.advance(Duration::hours(2));
    let mut later = common::alert("alice", vec![]);
    later.event_time = Some(clock.now());
    create_task(store.as_ref(), later, clock.as_ref()).await.unwrap();
    let report = sched.tick().await.unwrap();
    assert_eq!(report.prompted, 1);
    assert_eq!(chat.prompts(), 1);
}
