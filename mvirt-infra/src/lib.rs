//! mvirt-infra: reconciliation engine for managed cloud infrastructure.
//!
//! Services converge one kind of cloud resource each towards a desired
//! spec, tracking long-running cloud operations across passes in the
//! owning resource's status.

pub mod annotations;
pub mod api;
pub mod classify;
pub mod client;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod operation;
pub mod orchestrator;
pub mod reconciler;
pub mod services;
pub mod test_util;
pub mod tracker;
pub mod types;

pub use client::{AsyncClient, ResourceApi};
pub use config::ReconcileConfig;
pub use context::CallContext;
pub use error::{CloudError, ReconcileError, Result, ServiceError};
pub use operation::{AsyncStatusUpdater, OperationHandle, OperationKind};
pub use orchestrator::{Orchestrator, ReconcileStatus};
pub use reconciler::Reconciler;
