use thiserror::Error;

/// Error returned by a chat service client.
///
/// The split between transient and permanent failures drives the batch
/// retry policy: only transient failures are retried.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("{service} rejected request: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    /// Whether the failure may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    pub fn service(&self) -> &'static str {
        match self {
            Self::Unavailable { service, .. }
            | Self::Timeout { service }
            | Self::Rejected { service, .. }
            | Self::InvalidResponse { service, .. } => service,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
