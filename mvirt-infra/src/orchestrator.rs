//! Orchestrator - runs services in dependency order.

use std::fmt;
use std::time::Duration;

use tracing::{Instrument, debug, info_span};

use crate::context::CallContext;
use crate::error::{ReconcileError, Result, ServiceError};
use crate::reconciler::Reconciler;

/// Outcome of a pass as shown on the owning resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileStatus {
    Ready,
    /// Transient; not an error from the user's point of view.
    Pending { retry_after: Duration },
    Failed { message: String },
}

impl ReconcileStatus {
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => ReconcileStatus::Ready,
            Err(ReconcileError::Transient { retry_after, .. }) => ReconcileStatus::Pending {
                retry_after: *retry_after,
            },
            Err(e) => ReconcileStatus::Failed {
                message: e.to_string(),
            },
        }
    }

    pub fn from_service_result(result: &std::result::Result<(), ServiceError>) -> Self {
        match result {
            Ok(()) => ReconcileStatus::Ready,
            Err(e) => match e.retry_after() {
                Some(retry_after) => ReconcileStatus::Pending { retry_after },
                None => ReconcileStatus::Failed {
                    message: e.to_string(),
                },
            },
        }
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileStatus::Ready => f.write_str("Ready"),
            ReconcileStatus::Pending { retry_after } => {
                write!(f, "Pending (retry after {:?})", retry_after)
            }
            ReconcileStatus::Failed { message } => write!(f, "Failed: {}", message),
        }
    }
}

/// Ordered list of services. Reconcile runs front to back, delete back to
/// front. The first error stops the pass.
#[derive(Default)]
pub struct Orchestrator {
    services: Vec<Box<dyn Reconciler>>,
}

impl Orchestrator {
    pub fn new(services: Vec<Box<dyn Reconciler>>) -> Self {
        Self { services }
    }

    pub fn push(&mut self, service: Box<dyn Reconciler>) {
        self.services.push(service);
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    pub async fn reconcile(&self, ctx: &CallContext) -> std::result::Result<(), ServiceError> {
        for service in &self.services {
            let span = info_span!("reconcile", service = service.name());
            service
                .reconcile(ctx)
                .instrument(span)
                .await
                .map_err(|e| ServiceError::new(service.name(), e))?;
        }
        debug!("All {} services reconciled", self.services.len());
        Ok(())
    }

    pub async fn delete(&self, ctx: &CallContext) -> std::result::Result<(), ServiceError> {
        for service in self.services.iter().rev() {
            let span = info_span!("delete", service = service.name());
            service
                .delete(ctx)
                .instrument(span)
                .await
                .map_err(|e| ServiceError::new(service.name(), e))?;
        }
        debug!("All {} services deleted", self.services.len());
        Ok(())
    }
}
