//! Drives one purge run across conversations and object categories.

use std::{collections::BTreeMap, future::Future, panic::AssertUnwindSafe};

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, stream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

use super::{
    RetentionError, RetentionPolicy,
    messages::purge_conversation,
    objects::sweep_category,
    retry::with_retry,
    summary::{PurgeJobRun, UnitOutcome},
};
use crate::{
    clients::{Page, ServiceClients},
    config::RetryConfig,
    notification::Notifier,
    observability::metrics,
};

/// Everything a sub-pipeline needs for the duration of one run.
pub(super) struct RunContext {
    pub clients: ServiceClients,
    pub notifier: Notifier,
    pub retry: RetryConfig,
    pub policy: RetentionPolicy,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct MessagePhase {
    scanned: u64,
    outcomes: BTreeMap<String, UnitOutcome>,
    listing_error: Option<String>,
    structural: Option<RetentionError>,
    /// Cancellation stopped a conversation or left pages unvisited.
    abandoned: bool,
}

#[derive(Default)]
struct ObjectPhase {
    outcomes: BTreeMap<String, UnitOutcome>,
    abandoned: bool,
}

/// Runs the message purge, index trim and object sweep sub-pipelines.
///
/// The orchestrator holds no per-run state; each call to [`run`](Self::run)
/// takes the policy explicitly and returns a finalized [`PurgeJobRun`].
/// Notifications are delivered in the background and may still be in
/// flight when a run returns; see [`flush_notifications`](Self::flush_notifications).
#[derive(Clone)]
pub struct PurgeOrchestrator {
    clients: ServiceClients,
    retry: RetryConfig,
    notifications: TaskTracker,
}

impl PurgeOrchestrator {
    pub fn new(clients: ServiceClients, retry: RetryConfig) -> Self {
        Self {
            clients,
            retry,
            notifications: TaskTracker::new(),
        }
    }

    /// Wait until notifications queued by finished runs are delivered.
    pub async fn flush_notifications(&self) {
        self.notifications.close();
        self.notifications.wait().await;
        self.notifications.reopen();
    }

    /// Execute one purge run against the current time.
    pub async fn run(&self, policy: RetentionPolicy, cancel: CancellationToken) -> PurgeJobRun {
        self.run_at(policy, Utc::now(), cancel).await
    }

    /// Execute one purge run with cutoffs computed from `now`.
    pub async fn run_at(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> PurgeJobRun {
        let run = PurgeJobRun::start(policy.dry_run);
        let span = tracing::info_span!(
            "purge_run",
            run_id = %run.run_id,
            dry_run = policy.dry_run
        );
        self.execute(run, policy, now, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        mut run: PurgeJobRun,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> PurgeJobRun {
        if let Err(e) = policy.validate() {
            tracing::error!(error = %e, "Refusing to run with invalid retention policy");
            run.fail(&e);
            return self.finalize(run);
        }

        tracing::info!(
            message_cutoff = ?policy.message_cutoff(now),
            object_cutoff = ?policy.object_cutoff(now),
            "Starting purge run"
        );

        let ctx = RunContext {
            notifier: Notifier::spawn(self.clients.dispatcher.clone(), &self.notifications),
            clients: self.clients.clone(),
            retry: self.retry.clone(),
            policy,
            cancel,
        };

        let (messages, objects) =
            tokio::join!(purge_messages(&ctx, now), sweep_objects(&ctx, now));

        run.conversations_scanned = messages.scanned;
        run.per_conversation_outcome = messages.outcomes;
        run.listing_error = messages.listing_error;
        run.per_category_outcome = objects.outcomes;

        if let Some(e) = messages.structural {
            run.fail(&e);
        }
        if messages.abandoned || objects.abandoned {
            run.fail(&RetentionError::Cancelled);
        }

        self.finalize(run)
    }

    fn finalize(&self, mut run: PurgeJobRun) -> PurgeJobRun {
        run.finish();

        for _ in 0..run.failed_conversations() {
            metrics::record_unit_failure("conversation");
        }
        for _ in 0..run.failed_categories() {
            metrics::record_unit_failure("category");
        }
        let duration_secs = run
            .duration()
            .and_then(|d| d.to_std().ok())
            .map_or(0.0, |d| d.as_secs_f64());
        metrics::record_retention_run(run.status.as_str(), duration_secs);

        tracing::info!(
            status = run.status.as_str(),
            conversations_scanned = run.conversations_scanned,
            messages_deleted = run.messages_deleted(),
            objects_deleted = run.objects_deleted(),
            failed_conversations = run.failed_conversations(),
            failed_categories = run.failed_categories(),
            duration_secs,
            "Purge run finished"
        );
        run
    }
}

/// Page through every conversation, purging each page on the worker pool.
async fn purge_messages(ctx: &RunContext, now: DateTime<Utc>) -> MessagePhase {
    let mut phase = MessagePhase::default();
    let Some(cutoff) = ctx.policy.message_cutoff(now) else {
        tracing::debug!("Message purge disabled");
        return phase;
    };

    let mut page = Page::first(ctx.policy.conversation_page_size);
    loop {
        if ctx.cancel.is_cancelled() {
            phase.abandoned = true;
            break;
        }

        let conversations = match with_retry(&ctx.retry, "list_conversations", || {
            ctx.clients.conversations.list_conversations(page)
        })
        .await
        {
            Ok(conversations) => conversations,
            Err(e) if page.number == 1 => {
                tracing::error!(error = %e, "Cannot enumerate conversations");
                phase.structural = Some(RetentionError::Enumeration(e));
                break;
            }
            Err(e) => {
                tracing::error!(
                    page = page.number,
                    error = %e,
                    "Conversation listing failed after partial progress"
                );
                phase.listing_error = Some(format!("page {}: {e}", page.number));
                break;
            }
        };

        let last_page = conversations.len() < page.size as usize;
        phase.scanned += conversations.len() as u64;

        // `None` marks a conversation skipped because of cancellation.
        let results: Vec<Option<(String, Option<UnitOutcome>)>> = stream::iter(conversations)
            .map(|conversation| async move {
                if ctx.cancel.is_cancelled() {
                    return None;
                }
                let outcome = isolated(purge_conversation(ctx, &conversation, cutoff))
                    .await
                    .unwrap_or_else(Some);
                Some((conversation.conversation_id, outcome))
            })
            .buffer_unordered(ctx.policy.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                Some((conversation_id, Some(outcome))) => {
                    phase.abandoned |= outcome.is_cancelled();
                    phase.outcomes.insert(conversation_id, outcome);
                }
                Some((_, None)) => {}
                None => phase.abandoned = true,
            }
        }

        if last_page {
            break;
        }
        page = page.next();
    }

    phase
}

/// Sweep every recognized category on the worker pool.
async fn sweep_objects(ctx: &RunContext, now: DateTime<Utc>) -> ObjectPhase {
    let mut phase = ObjectPhase::default();
    let Some(cutoff) = ctx.policy.object_cutoff(now) else {
        tracing::debug!("Object sweep disabled");
        return phase;
    };

    let results: Vec<(String, Option<UnitOutcome>)> = stream::iter(ctx.policy.categories())
        .map(|category| async move {
            if ctx.cancel.is_cancelled() {
                return (category, None);
            }
            let outcome = isolated(sweep_category(ctx, &category, cutoff))
                .await
                .unwrap_or_else(|failed| failed);
            (category, Some(outcome))
        })
        .buffer_unordered(ctx.policy.concurrency)
        .collect()
        .await;

    for (category, outcome) in results {
        match outcome {
            Some(outcome) => {
                phase.abandoned |= outcome.is_cancelled();
                phase.outcomes.insert(category, outcome);
            }
            None => phase.abandoned = true,
        }
    }
    phase
}

/// Contain a panic inside one unit of work, turning it into a failed outcome.
async fn isolated<F: Future>(unit: F) -> Result<F::Output, UnitOutcome> {
    AssertUnwindSafe(unit).catch_unwind().await.map_err(|_| {
        tracing::error!("Unit of work panicked");
        UnitOutcome::failed(0, "internal error: unit of work panicked")
    })
}
