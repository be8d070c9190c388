//! Service contract.
//!
//! One implementation per resource kind. Each owns its scope and client and
//! converges one kind of cloud resource towards the scope's desired spec.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;

/// Trait for per-kind resource services.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Service name, used for operation handles and error context.
    fn name(&self) -> &str;

    /// Idempotently create or update the resource.
    async fn reconcile(&self, ctx: &CallContext) -> Result<()>;

    /// Delete the resource. Deleting an absent resource succeeds.
    async fn delete(&self, ctx: &CallContext) -> Result<()>;
}
