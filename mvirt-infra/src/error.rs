//! Error types.
//!
//! [`CloudError`] is what the client layer reports. Services turn it into a
//! [`ReconcileError`] (see [`crate::classify`]), and the orchestrator attaches
//! the failing service's name as a [`ServiceError`].

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the cloud client layer.
///
/// The only classification done at this layer is "not found" versus
/// everything else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// Resource, or a resource it depends on, does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other provider response.
    #[error("cloud API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The caller's deadline passed while a call was in flight.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the pass while a call was in flight.
    #[error("cancelled")]
    Cancelled,

    /// A persisted operation handle could not be used.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl CloudError {
    /// Whether the provider reported the resource (or a dependency) absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

/// Classified reconciliation failure.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Resource or dependency absent. Non-fatal.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Retry later. Not a user-visible failure.
    #[error("{message} (retry after {retry_after:?})")]
    Transient {
        message: String,
        retry_after: Duration,
    },

    /// Rejected input or unrecoverable provider error.
    #[error("{context}: {source}")]
    Terminal {
        context: String,
        #[source]
        source: CloudError,
    },
}

impl ReconcileError {
    pub fn transient(message: impl Into<String>, retry_after: Duration) -> Self {
        ReconcileError::Transient {
            message: message.into(),
            retry_after,
        }
    }

    pub fn terminal(context: impl Into<String>, source: CloudError) -> Self {
        ReconcileError::Terminal {
            context: context.into(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }

    /// Requeue hint, only set for transient errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ReconcileError::Transient { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// A reconciliation error tagged with the service that produced it.
#[derive(Debug, Error)]
#[error("{service}: {error}")]
pub struct ServiceError {
    pub service: String,
    #[source]
    pub error: ReconcileError,
}

impl ServiceError {
    pub fn new(service: impl Into<String>, error: ReconcileError) -> Self {
        Self {
            service: service.into(),
            error,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.error.is_transient()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.error.retry_after()
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
