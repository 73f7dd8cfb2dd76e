//! Message purge and index trim for a single conversation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::{
    orchestrator::RunContext,
    retry::with_retry,
    summary::{CANCELLED, UnitOutcome},
};
use crate::{clients::Conversation, observability::metrics};

/// Purge the aged prefix of one conversation.
///
/// Returns `None` when nothing is eligible. Deletions are committed in
/// ascending batches; whatever prefix committed before a failure or
/// cancellation is recorded by advancing the floor once, trimming indices
/// and notifying members.
#[tracing::instrument(
    skip(ctx, conversation, cutoff),
    fields(conversation_id = %conversation.conversation_id)
)]
pub(super) async fn purge_conversation(
    ctx: &RunContext,
    conversation: &Conversation,
    cutoff: DateTime<Utc>,
) -> Option<UnitOutcome> {
    let conversation_id = conversation.conversation_id.as_str();
    let floor = conversation.retained_floor;

    let boundary = match with_retry(&ctx.retry, "list_aged_boundary", || {
        ctx.clients.messages.list_aged_boundary(conversation_id, cutoff)
    })
    .await
    {
        Ok(Some(seq)) => seq.min(conversation.max_seq),
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to compute retention boundary");
            return Some(UnitOutcome::failed(0, format!("boundary query: {e}")));
        }
    };

    let target = ctx.policy.cap_boundary(floor, boundary);
    if target <= floor {
        return None;
    }
    if target < boundary {
        tracing::debug!(
            boundary_seq = boundary,
            capped_seq = target,
            "Boundary capped by per-conversation delete limit"
        );
    }

    if ctx.policy.dry_run {
        let would_delete = (target - floor) as u64;
        tracing::info!(
            boundary_seq = target,
            would_delete,
            "Dry run: would purge messages"
        );
        return Some(UnitOutcome::deleted(would_delete));
    }

    let (deleted, committed, batch_error) =
        delete_ascending(ctx, conversation_id, floor, target).await;
    if deleted > 0 {
        metrics::record_retention_deletion("messages", deleted);
    }

    if committed <= floor {
        // Nothing committed, the floor stays where it is.
        return Some(match batch_error {
            Some(error) => UnitOutcome::failed(deleted, error),
            None => UnitOutcome::deleted(deleted),
        });
    }

    if let Err(e) = with_retry(&ctx.retry, "advance_retained_floor", || {
        ctx.clients
            .conversations
            .advance_retained_floor(conversation_id, committed)
    })
    .await
    {
        tracing::error!(
            error = %e,
            committed_seq = committed,
            "Deleted messages but failed to advance retained floor"
        );
        return Some(UnitOutcome::failed(deleted, format!("floor advance: {e}")));
    }

    let trim_error = trim_indices(ctx, conversation, committed).await;

    let seqs: Vec<i64> = (floor + 1..=committed).collect();
    for user_id in distinct_members(conversation) {
        ctx.notifier.user_delete_msgs(user_id, conversation_id, seqs.clone());
    }

    tracing::info!(
        deleted,
        boundary_seq = target,
        retained_floor = committed,
        "Purged conversation messages"
    );

    Some(match batch_error.or(trim_error) {
        Some(error) => UnitOutcome::failed(deleted, error),
        None => UnitOutcome::deleted(deleted),
    })
}

/// Delete `(floor, target]` in ascending batches.
///
/// Returns the deleted count, the highest committed sequence (`floor` when
/// nothing committed) and the error that stopped the loop, if any.
async fn delete_ascending(
    ctx: &RunContext,
    conversation_id: &str,
    floor: i64,
    target: i64,
) -> (u64, i64, Option<String>) {
    let batch_size = ctx.policy.message_batch_size as i64;
    let mut deleted = 0u64;
    let mut committed = floor;

    while committed < target {
        if ctx.cancel.is_cancelled() {
            tracing::info!(committed_seq = committed, "Cancelled between batches");
            return (deleted, committed, Some(CANCELLED.to_string()));
        }

        let end = committed.saturating_add(batch_size).min(target);
        let batch: Vec<i64> = (committed + 1..=end).collect();

        match with_retry(&ctx.retry, "delete_physical", || {
            ctx.clients.messages.delete_physical(conversation_id, &batch)
        })
        .await
        {
            Ok(count) => {
                deleted += count;
                committed = end;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    batch_start = committed + 1,
                    batch_end = end,
                    "Message delete batch failed"
                );
                return (deleted, committed, Some(format!("delete batch: {e}")));
            }
        }
    }

    (deleted, committed, None)
}

/// Trim every member's index to `floor`, repairing read cursors that fall
/// below it. Returns the first trim error; other members still proceed.
async fn trim_indices(
    ctx: &RunContext,
    conversation: &Conversation,
    floor: i64,
) -> Option<String> {
    let conversation_id = conversation.conversation_id.as_str();
    let mut first_error = None;

    for user_id in distinct_members(conversation) {
        let result = with_retry(&ctx.retry, "trim_user_index", || {
            ctx.clients
                .conversations
                .trim_user_index(user_id, conversation_id, floor)
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(user_id, error = %e, "Failed to trim user index");
            metrics::record_unit_failure("index_trim");
            if first_error.is_none() {
                first_error = Some(format!("index trim for {user_id}: {e}"));
            }
            continue;
        }

        let behind = conversation
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .any(|m| m.has_read_seq < floor);
        if behind {
            ctx.notifier
                .mark_as_read(
                    conversation_id,
                    conversation.session_type,
                    user_id,
                    user_id,
                    Vec::new(),
                    floor,
                );
        }
    }

    first_error
}

fn distinct_members(conversation: &Conversation) -> impl Iterator<Item = &str> {
    let mut seen = BTreeSet::new();
    conversation
        .members
        .iter()
        .map(|m| m.user_id.as_str())
        .filter(move |id| !id.is_empty() && seen.insert(*id))
}
