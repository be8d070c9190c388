//! Cloud client adapter.
//!
//! [`ResourceApi`] is the surface a cloud SDK exposes for one resource kind:
//! plain Get, operation submission, and polling by opaque poller state.
//! [`AsyncClient`] wraps it with the bounded wait: a submitted operation is
//! polled for at most `call_timeout`, after which the caller gets an
//! [`OperationHandle`] to persist instead of a result.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ReconcileConfig;
use crate::context::CallContext;
use crate::error::CloudError;
use crate::operation::{OperationHandle, OperationKind, Poller};
use crate::types::ResourceRef;

/// Custom headers forwarded on mutating calls.
pub type Headers = BTreeMap<String, String>;

/// Cloud SDK surface for one resource kind.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Resource model, used both as PUT payload and as Get result.
    type Resource: Clone + Send + Sync + 'static;

    async fn get(&self, id: &ResourceRef) -> Result<Self::Resource, CloudError>;

    /// Submit a PUT. Returns the poller state of the accepted operation.
    async fn begin_create_or_update(
        &self,
        id: &ResourceRef,
        parameters: Self::Resource,
        headers: &Headers,
    ) -> Result<Vec<u8>, CloudError>;

    /// Submit a DELETE. Returns the poller state of the accepted operation.
    async fn begin_delete(&self, id: &ResourceRef, headers: &Headers)
    -> Result<Vec<u8>, CloudError>;

    /// Whether the operation has finished. No side effects.
    async fn poll(&self, poller: &Poller) -> Result<bool, CloudError>;

    /// Terminal value of a finished PUT.
    async fn create_or_update_result(&self, state: &[u8]) -> Result<Self::Resource, CloudError>;

    /// Terminal outcome of a finished DELETE.
    async fn delete_result(&self, state: &[u8]) -> Result<(), CloudError>;
}

/// Outcome of an accepted create-or-update.
#[derive(Debug, Clone)]
pub enum PutOutcome<R> {
    /// Finished within the bounded wait.
    Done(R),
    /// Still running; the handle must be persisted before returning.
    InProgress(OperationHandle),
}

/// Failure of an async call. If the operation had already been accepted,
/// `handle` is set and must be persisted so a later pass can find out how
/// it ended.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct AsyncCallError {
    #[source]
    pub error: CloudError,
    pub handle: Option<OperationHandle>,
}

impl From<CloudError> for AsyncCallError {
    fn from(error: CloudError) -> Self {
        Self {
            error,
            handle: None,
        }
    }
}

/// Bounded-wait client for one service.
pub struct AsyncClient<A> {
    api: A,
    service_name: String,
    config: ReconcileConfig,
}

impl<A: ResourceApi> AsyncClient<A> {
    pub fn new(api: A, service_name: impl Into<String>, config: ReconcileConfig) -> Self {
        Self {
            api,
            service_name: service_name.into(),
            config,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Fetch the current cloud-side state.
    pub async fn get(&self, ctx: &CallContext, id: &ResourceRef) -> Result<A::Resource, CloudError> {
        debug!("Getting {} {}", self.service_name, id);
        ctx.run(self.api.get(id)).await
    }

    /// Submit a create-or-update and wait up to `call_timeout` for it.
    pub async fn create_or_update_async(
        &self,
        ctx: &CallContext,
        id: &ResourceRef,
        parameters: A::Resource,
        headers: &Headers,
    ) -> Result<PutOutcome<A::Resource>, AsyncCallError> {
        debug!("Submitting PUT for {} {}", self.service_name, id);
        let state = ctx
            .run(self.api.begin_create_or_update(id, parameters, headers))
            .await?;
        let poller = Poller::Put(state);

        if !self.wait(ctx, id, &poller).await? {
            return Ok(PutOutcome::InProgress(self.handle(id, &poller)));
        }

        let result = ctx
            .run(self.api.create_or_update_result(poller.state()))
            .await?;
        Ok(PutOutcome::Done(result))
    }

    /// Submit a delete and wait up to `call_timeout` for it. Returns a
    /// handle when the operation is still running.
    pub async fn delete_async(
        &self,
        ctx: &CallContext,
        id: &ResourceRef,
        headers: &Headers,
    ) -> Result<Option<OperationHandle>, AsyncCallError> {
        debug!("Submitting DELETE for {} {}", self.service_name, id);
        let state = ctx.run(self.api.begin_delete(id, headers)).await?;
        let poller = Poller::Delete(state);

        if !self.wait(ctx, id, &poller).await? {
            return Ok(Some(self.handle(id, &poller)));
        }

        ctx.run(self.api.delete_result(poller.state())).await?;
        Ok(None)
    }

    /// Poll a persisted handle once.
    pub async fn is_done(
        &self,
        ctx: &CallContext,
        handle: &OperationHandle,
    ) -> Result<bool, CloudError> {
        let poller = handle.poller()?;
        ctx.run(self.api.poll(&poller)).await
    }

    /// Terminal value of a finished operation. DELETE has no value.
    pub async fn result(
        &self,
        ctx: &CallContext,
        handle: &OperationHandle,
    ) -> Result<Option<A::Resource>, CloudError> {
        match handle.poller()? {
            Poller::Put(state) => ctx
                .run(self.api.create_or_update_result(&state))
                .await
                .map(Some),
            Poller::Delete(state) => {
                ctx.run(self.api.delete_result(&state)).await?;
                Ok(None)
            }
        }
    }

    fn handle(&self, id: &ResourceRef, poller: &Poller) -> OperationHandle {
        OperationHandle::new(poller.kind(), &self.service_name, id, poller.state())
    }

    /// Poll until done or `call_timeout` elapses. Errors after acceptance
    /// carry the handle.
    async fn wait(
        &self,
        ctx: &CallContext,
        id: &ResourceRef,
        poller: &Poller,
    ) -> Result<bool, AsyncCallError> {
        let deadline = Instant::now() + self.config.call_timeout;
        loop {
            let done = ctx
                .run(self.api.poll(poller))
                .await
                .map_err(|e| self.accepted_error(e, id, poller))?;
            if done {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "{} operation for {} {} still running after {:?}",
                    poller.kind().as_str(),
                    self.service_name,
                    id,
                    self.config.call_timeout
                );
                return Ok(false);
            }
            ctx.sleep(self.config.poll_interval.min(deadline - now))
                .await
                .map_err(|e| self.accepted_error(e, id, poller))?;
        }
    }

    fn accepted_error(&self, error: CloudError, id: &ResourceRef, poller: &Poller) -> AsyncCallError {
        AsyncCallError {
            error,
            handle: Some(self.handle(id, poller)),
        }
    }
}

/// Name of the operation kind as logged.
pub fn kind_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Put => "create or update",
        OperationKind::Delete => "delete",
    }
}
