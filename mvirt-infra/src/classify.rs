//! Error classifier: maps raw client failures and provisioning states onto
//! NotFound / Transient / Terminal.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::error::{CloudError, ReconcileError};
use crate::types::{ProvisioningState, ResourceRef};

/// The client call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Get,
    Create,
    Update,
    /// Result of a stored PUT whose path is no longer known.
    CreateOrUpdate,
    Delete,
    /// Polling or fetching the result of an outstanding operation.
    Poll,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Call::Get => "get",
            Call::Create => "create",
            Call::Update => "update",
            Call::CreateOrUpdate => "create or update",
            Call::Delete => "delete",
            Call::Poll => "poll operation for",
        };
        f.write_str(verb)
    }
}

/// Where a failure happened: resource kind and identity.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub kind: &'a str,
    pub resource: &'a ResourceRef,
}

impl<'a> ErrorContext<'a> {
    pub fn new(kind: &'a str, resource: &'a ResourceRef) -> Self {
        Self { kind, resource }
    }

    fn describe(&self) -> String {
        format!("{} {}", self.kind, self.resource)
    }
}

/// Classify a client error raised by `call`.
///
/// NotFound on Get or Delete stays NotFound (create path / already deleted).
/// NotFound on any PUT means a dependency is not there yet, and on
/// Poll that the cloud forgot the operation; both are transient. Everything
/// else, including deadline and cancellation, is terminal.
pub fn classify(
    err: CloudError,
    call: Call,
    ctx: ErrorContext<'_>,
    retry_after: Duration,
) -> ReconcileError {
    match (call, err) {
        (Call::Get | Call::Delete, CloudError::NotFound(_)) => ReconcileError::NotFound {
            resource: ctx.describe(),
        },
        (Call::Create | Call::Update | Call::CreateOrUpdate, CloudError::NotFound(msg)) => {
            debug!("{} dependency missing: {}", ctx.describe(), msg);
            ReconcileError::transient(
                format!("{} dependent resource does not exist yet", ctx.describe()),
                retry_after,
            )
        }
        (Call::Poll, CloudError::NotFound(msg)) => {
            debug!("{} operation no longer tracked: {}", ctx.describe(), msg);
            ReconcileError::transient(
                format!("operation on {} is no longer tracked by the cloud", ctx.describe()),
                retry_after,
            )
        }
        (call, err) => {
            ReconcileError::terminal(format!("failed to {} {}", call, ctx.describe()), err)
        }
    }
}

/// Refuse to mutate a resource whose provisioning state is not terminal.
///
/// A resource that reports no state is treated as settled.
pub fn ensure_terminal(
    state: Option<ProvisioningState>,
    ctx: ErrorContext<'_>,
    retry_after: Duration,
) -> Result<(), ReconcileError> {
    match state {
        Some(state) if !state.is_terminal() => Err(ReconcileError::transient(
            format!(
                "unable to update existing {} in non terminal state. {} must be in one of the \
                 following provisioning states: Canceled, Failed, or Succeeded. Actual state: {}",
                ctx.describe(),
                ctx.kind,
                state
            ),
            retry_after,
        )),
        _ => Ok(()),
    }
}
