use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::RetentionError;

/// Overall status of a purge run.
///
/// `CompletedWithErrors` is surfaced for operator attention and never
/// retried automatically; `Failed` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }
}

/// Why a run was marked `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    InvalidPolicy { message: String },
    Enumeration { message: String },
    Cancelled,
}

impl From<&RetentionError> for FailureCause {
    fn from(error: &RetentionError) -> Self {
        match error {
            RetentionError::InvalidPolicy(message) => FailureCause::InvalidPolicy {
                message: message.clone(),
            },
            RetentionError::Enumeration(e) => FailureCause::Enumeration {
                message: e.to_string(),
            },
            RetentionError::Cancelled => FailureCause::Cancelled,
        }
    }
}

/// Error recorded on a unit that cancellation stopped between batches.
pub(super) const CANCELLED: &str = "cancelled";

/// Result of purging one conversation or sweeping one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    /// Items deleted (or, in dry-run mode, that would have been deleted).
    pub deleted_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitOutcome {
    pub fn deleted(count: u64) -> Self {
        Self {
            deleted_count: count,
            error: None,
        }
    }

    pub fn failed(count: u64, error: impl Into<String>) -> Self {
        Self {
            deleted_count: count,
            error: Some(error.into()),
        }
    }

    /// A unit stopped between batches by cancellation.
    pub fn cancelled(count: u64) -> Self {
        Self::failed(count, CANCELLED)
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some(CANCELLED)
    }
}

/// Record of one purge run, kept for observability only.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeJobRun {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Conversations examined, including those with nothing to purge.
    pub conversations_scanned: u64,
    /// Conversations that deleted something or failed.
    pub per_conversation_outcome: BTreeMap<String, UnitOutcome>,
    pub per_category_outcome: BTreeMap<String, UnitOutcome>,
    /// Listing failure after some pages were already processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
}

impl PurgeJobRun {
    pub fn start(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            conversations_scanned: 0,
            per_conversation_outcome: BTreeMap::new(),
            per_category_outcome: BTreeMap::new(),
            listing_error: None,
            status: RunStatus::Running,
            failure: None,
        }
    }

    /// Mark the run as structurally failed. The first cause wins.
    pub fn fail(&mut self, error: &RetentionError) {
        if self.failure.is_none() {
            self.failure = Some(error.into());
        }
    }

    /// Stamp the finish time and derive the overall status.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.status = if self.failure.is_some() {
            RunStatus::Failed
        } else if self.listing_error.is_some()
            || self.failed_conversations() > 0
            || self.failed_categories() > 0
        {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };
    }

    pub fn messages_deleted(&self) -> u64 {
        self.per_conversation_outcome
            .values()
            .map(|o| o.deleted_count)
            .sum()
    }

    pub fn objects_deleted(&self) -> u64 {
        self.per_category_outcome
            .values()
            .map(|o| o.deleted_count)
            .sum()
    }

    pub fn failed_conversations(&self) -> usize {
        self.per_conversation_outcome
            .values()
            .filter(|o| o.is_failure())
            .count()
    }

    pub fn failed_categories(&self) -> usize {
        self.per_category_outcome
            .values()
            .filter(|o| o.is_failure())
            .count()
    }

    /// Check if any records were deleted.
    pub fn has_deletions(&self) -> bool {
        self.messages_deleted() > 0 || self.objects_deleted() > 0
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ServiceError;

    #[test]
    fn test_clean_run_completes() {
        let mut run = PurgeJobRun::start(false);
        run.per_conversation_outcome
            .insert("c1".into(), UnitOutcome::deleted(10));
        run.per_category_outcome
            .insert("msg-picture".into(), UnitOutcome::deleted(5));
        run.finish();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.messages_deleted(), 10);
        assert_eq!(run.objects_deleted(), 5);
        assert!(run.has_deletions());
        assert!(run.duration().is_some());
    }

    #[test]
    fn test_empty_run_completes() {
        let mut run = PurgeJobRun::start(false);
        run.finish();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(!run.has_deletions());
    }

    #[test]
    fn test_unit_failure_completes_with_errors() {
        let mut run = PurgeJobRun::start(false);
        run.per_conversation_outcome
            .insert("c1".into(), UnitOutcome::deleted(10));
        run.per_category_outcome
            .insert("msg-file".into(), UnitOutcome::failed(0, "object unavailable"));
        run.finish();

        assert_eq!(run.status, RunStatus::CompletedWithErrors);
        assert_eq!(run.failed_categories(), 1);
        assert_eq!(run.failed_conversations(), 0);
    }

    #[test]
    fn test_listing_error_completes_with_errors() {
        let mut run = PurgeJobRun::start(false);
        run.listing_error = Some("page 2: timed out".into());
        run.finish();
        assert_eq!(run.status, RunStatus::CompletedWithErrors);
    }

    #[test]
    fn test_structural_failure_wins() {
        let mut run = PurgeJobRun::start(false);
        run.per_conversation_outcome
            .insert("c1".into(), UnitOutcome::failed(3, "boom"));
        run.fail(&RetentionError::Cancelled);
        run.fail(&RetentionError::Enumeration(ServiceError::Timeout {
            service: "conversation",
        }));
        run.finish();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure, Some(FailureCause::Cancelled));
        assert_eq!(run.messages_deleted(), 3);
    }

    #[test]
    fn test_serializes_for_operators() {
        let mut run = PurgeJobRun::start(true);
        run.fail(&RetentionError::InvalidPolicy("batch size".into()));
        run.finish();

        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure"]["kind"], "invalid_policy");
        assert_eq!(json["dry_run"], true);
        assert!(json.get("listing_error").is_none());
    }
}
