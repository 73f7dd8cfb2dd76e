use thiserror::Error;

use crate::clients::ServiceError;

/// Structural failures: they abort the whole purge run.
///
/// Failures of a single conversation or category never surface here; they
/// are recorded in the run summary instead.
#[derive(Debug, Clone, Error)]
pub enum RetentionError {
    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),

    #[error("failed to enumerate conversations: {0}")]
    Enumeration(#[source] ServiceError),

    #[error("purge run cancelled")]
    Cancelled,
}
