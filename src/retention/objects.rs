//! Object sweep for a single storage category.

use chrono::{DateTime, Utc};

use super::{orchestrator::RunContext, retry::with_retry, summary::UnitOutcome};
use crate::observability::metrics;

/// Delete every object in `category` strictly older than `cutoff`, in
/// bounded batches. Stops at the first failed batch or on cancellation.
#[tracing::instrument(skip(ctx, cutoff))]
pub(super) async fn sweep_category(
    ctx: &RunContext,
    category: &str,
    cutoff: DateTime<Utc>,
) -> UnitOutcome {
    let keys = match with_retry(&ctx.retry, "list_older_than", || {
        ctx.clients.objects.list_older_than(category, cutoff)
    })
    .await
    {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list aged objects");
            return UnitOutcome::failed(0, format!("listing: {e}"));
        }
    };

    if keys.is_empty() {
        return UnitOutcome::default();
    }

    if ctx.policy.dry_run {
        tracing::info!(would_delete = keys.len(), "Dry run: would delete objects");
        return UnitOutcome::deleted(keys.len() as u64);
    }

    let mut deleted = 0u64;
    for batch in keys.chunks(ctx.policy.object_batch_size) {
        if ctx.cancel.is_cancelled() {
            tracing::info!(deleted, "Cancelled between batches");
            return finish(category, UnitOutcome::cancelled(deleted));
        }

        match with_retry(&ctx.retry, "delete_batch", || {
            ctx.clients.objects.delete_batch(category, batch)
        })
        .await
        {
            Ok(count) => deleted += count,
            Err(e) => {
                tracing::warn!(error = %e, batch_len = batch.len(), "Object delete batch failed");
                return finish(
                    category,
                    UnitOutcome::failed(deleted, format!("delete batch: {e}")),
                );
            }
        }
    }

    tracing::info!(deleted, "Swept aged objects");
    finish(category, UnitOutcome::deleted(deleted))
}

fn finish(category: &str, outcome: UnitOutcome) -> UnitOutcome {
    if outcome.deleted_count > 0 {
        metrics::record_retention_deletion(category, outcome.deleted_count);
    }
    outcome
}
