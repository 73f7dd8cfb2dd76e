//! Periodic trigger with a single-flight guard.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{PurgeJobRun, PurgeOrchestrator, RetentionPolicy, Trigger};
use crate::observability::metrics;

#[derive(Default)]
struct SchedulerState {
    in_flight: AtomicBool,
    skipped_ticks: AtomicU64,
    last_run: Mutex<Option<PurgeJobRun>>,
}

/// Held for the lifetime of one run; releases the guard on drop, including
/// when the run future is dropped early.
struct RunGuard {
    state: Arc<SchedulerState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

/// Fires the orchestrator and guarantees at most one active run.
///
/// A tick that arrives while a run is in flight is skipped and logged,
/// never queued. A failed run does not affect later ticks.
#[derive(Clone)]
pub struct Scheduler {
    orchestrator: PurgeOrchestrator,
    policy: RetentionPolicy,
    state: Arc<SchedulerState>,
}

impl Scheduler {
    pub fn new(orchestrator: PurgeOrchestrator, policy: RetentionPolicy) -> Self {
        Self {
            orchestrator,
            policy,
            state: Arc::new(SchedulerState::default()),
        }
    }

    /// Begin firing on `trigger`. Returns immediately; runs execute on
    /// spawned tasks until `shutdown` is cancelled.
    pub fn start(
        self,
        trigger: impl Trigger + 'static,
        shutdown: CancellationToken,
    ) -> SchedulerHandle {
        let tracker = TaskTracker::new();
        let handle = SchedulerHandle {
            scheduler: self.clone(),
            tracker: tracker.clone(),
            shutdown: shutdown.clone(),
        };
        tracker.spawn(self.tick_loop(trigger, tracker.clone(), shutdown));
        handle
    }

    async fn tick_loop(
        self,
        mut trigger: impl Trigger,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Scheduler stopping");
                    break;
                }
                _ = trigger.tick() => {}
            }

            let Some(guard) = self.try_acquire() else {
                continue;
            };
            let scheduler = self.clone();
            let run_cancel = shutdown.child_token();
            tracker.spawn(async move {
                scheduler.run_guarded(guard, run_cancel).await;
            });
        }
    }

    /// Run immediately unless a run is already in flight.
    pub async fn try_run(&self, cancel: CancellationToken) -> Option<PurgeJobRun> {
        let guard = self.try_acquire()?;
        Some(self.run_guarded(guard, cancel).await)
    }

    fn try_acquire(&self) -> Option<RunGuard> {
        if self
            .state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let skipped = self.state.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(skipped, "Purge run still in progress, skipping tick");
            metrics::record_skipped_tick();
            return None;
        }
        Some(RunGuard {
            state: self.state.clone(),
        })
    }

    async fn run_guarded(&self, _guard: RunGuard, cancel: CancellationToken) -> PurgeJobRun {
        let run = self.orchestrator.run(self.policy.clone(), cancel).await;
        *self.state.last_run.lock() = Some(run.clone());
        run
    }

    pub fn is_running(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.state.skipped_ticks.load(Ordering::Relaxed)
    }

    /// The most recently finished run, if any.
    pub fn last_run(&self) -> Option<PurgeJobRun> {
        self.state.last_run.lock().clone()
    }
}

/// Handle to a started [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    scheduler: Scheduler,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.scheduler.skipped_ticks()
    }

    pub fn last_run(&self) -> Option<PurgeJobRun> {
        self.scheduler.last_run()
    }

    /// Stop ticking and wait for the in-flight run, which stops after its
    /// current batch, then for its queued notifications.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.scheduler.orchestrator.flush_notifications().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        clients::{
            Conversation, ServiceClients,
            memory::{
                InMemoryConversationIndex, InMemoryMessageStore, InMemoryObjectStore,
                RecordingDispatcher,
            },
        },
        config::RetryConfig,
        retention::{FailureCause, RunStatus},
    };

    /// Ticks whenever the test sends on the channel.
    struct ManualTrigger {
        rx: mpsc::UnboundedReceiver<()>,
    }

    #[async_trait]
    impl Trigger for ManualTrigger {
        async fn tick(&mut self) {
            if self.rx.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
    }

    struct Fixture {
        messages: Arc<InMemoryMessageStore>,
        index: Arc<InMemoryConversationIndex>,
        scheduler: Scheduler,
    }

    fn fixture(message_batch_size: usize) -> Fixture {
        let messages = Arc::new(InMemoryMessageStore::new());
        let index = Arc::new(InMemoryConversationIndex::new());
        let clients = ServiceClients {
            messages: messages.clone(),
            conversations: index.clone(),
            objects: Arc::new(InMemoryObjectStore::new()),
            dispatcher: Arc::new(RecordingDispatcher::default()),
        };

        index.upsert(Conversation {
            conversation_id: "C".into(),
            session_type: Default::default(),
            max_seq: 10,
            retained_floor: 0,
            members: vec![],
        });
        messages.insert("C", 1..=10, Utc::now() - chrono::Duration::days(365));

        let policy = RetentionPolicy {
            message_max_age: Some(chrono::Duration::days(1)),
            object_max_age: None,
            message_batch_size,
            ..Default::default()
        };
        let retry = RetryConfig {
            enabled: false,
            ..Default::default()
        };
        Fixture {
            messages,
            index,
            scheduler: Scheduler::new(PurgeOrchestrator::new(clients, retry), policy),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_returns_and_runs_on_tick() {
        let fx = fixture(100);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = fx
            .scheduler
            .start(ManualTrigger { rx }, CancellationToken::new());

        assert!(handle.last_run().is_none());
        tx.send(()).unwrap();
        wait_until(|| handle.last_run().is_some()).await;

        let run = handle.last_run().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.messages_deleted(), 10);
        assert!(!handle.is_running());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_tick_during_run_is_skipped() {
        let fx = fixture(1);
        fx.messages.set_delete_delay(Duration::from_millis(20));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = fx
            .scheduler
            .start(ManualTrigger { rx }, CancellationToken::new());

        tx.send(()).unwrap();
        wait_until(|| handle.is_running()).await;
        tx.send(()).unwrap();
        wait_until(|| handle.skipped_ticks() == 1).await;

        wait_until(|| handle.last_run().is_some()).await;
        // One run, one batch per sequence: nothing replayed.
        assert_eq!(fx.messages.delete_calls().len(), 10);
        assert_eq!(fx.index.floor_updates(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_run_does_not_stop_schedule() {
        let fx = fixture(100);
        fx.index.fail_listing_page(1, 1, false);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = fx
            .scheduler
            .start(ManualTrigger { rx }, CancellationToken::new());

        tx.send(()).unwrap();
        wait_until(|| handle.last_run().is_some()).await;
        assert_eq!(handle.last_run().unwrap().status, RunStatus::Failed);

        tx.send(()).unwrap();
        wait_until(|| {
            handle
                .last_run()
                .is_some_and(|r| r.status == RunStatus::Completed)
        })
        .await;
        assert_eq!(fx.index.floor("C"), Some(10));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_after_current_batch() {
        let fx = fixture(1);
        fx.messages.set_delete_delay(Duration::from_millis(20));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = fx
            .scheduler
            .start(ManualTrigger { rx }, CancellationToken::new());

        tx.send(()).unwrap();
        wait_until(|| !fx.messages.delete_calls().is_empty()).await;
        handle.shutdown().await;

        let run = handle.last_run().unwrap();
        assert_eq!(run.failure, Some(FailureCause::Cancelled));
        let remaining = fx.messages.remaining("C").len();
        assert!(remaining > 0 && remaining < 10, "remaining = {remaining}");
        // The committed prefix is recorded.
        assert_eq!(fx.index.floor("C"), Some(10 - remaining as i64));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_try_run_single_flight() {
        let fx = fixture(1);
        fx.messages.set_delete_delay(Duration::from_millis(10));
        let scheduler = fx.scheduler.clone();

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.try_run(CancellationToken::new()).await }
        });
        wait_until(|| scheduler.is_running()).await;

        assert!(scheduler.try_run(CancellationToken::new()).await.is_none());
        assert_eq!(scheduler.skipped_ticks(), 1);

        let run = first.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(!scheduler.is_running());
        assert!(scheduler.try_run(CancellationToken::new()).await.is_some());
    }
}
