//! Long-running operation tracking.
//!
//! Services never block a pass on a cloud operation beyond the client's
//! bounded wait. An unfinished operation leaves a handle in status and the
//! pass returns a transient "in progress" error; the next pass polls the
//! handle before it considers issuing another mutating call.

use tracing::{debug, info, warn};

use crate::classify::{self, Call, ErrorContext};
use crate::client::{AsyncCallError, AsyncClient, Headers, PutOutcome, ResourceApi, kind_label};
use crate::context::CallContext;
use crate::error::{CloudError, ReconcileError, Result};
use crate::operation::{AsyncStatusUpdater, OperationHandle, OperationKind};
use crate::types::{Provisioned, ResourceRef};

/// Desired state of one resource, as consumed by [`create_resource`].
pub trait ResourceSpec<R>: Send + Sync {
    fn resource_ref(&self) -> ResourceRef;

    /// PUT payload, or `None` when `existing` already matches.
    fn parameters(&self, existing: Option<&R>) -> Result<Option<R>>;
}

/// Result of looking for an outstanding operation.
#[derive(Debug)]
pub enum Resumed<R> {
    /// No handle was stored.
    Idle,
    /// A stored operation finished and its handle was removed.
    Completed {
        kind: OperationKind,
        result: Option<R>,
    },
}

/// Resume whichever operation is outstanding for the resource.
///
/// Returns a transient error while it is still running.
pub async fn resume<A: ResourceApi>(
    ctx: &CallContext,
    client: &AsyncClient<A>,
    status: &dyn AsyncStatusUpdater,
    target: ErrorContext<'_>,
) -> Result<Resumed<A::Resource>> {
    for kind in [OperationKind::Put, OperationKind::Delete] {
        if let Some(handle) =
            status.long_running_operation_state(&target.resource.name, client.service_name(), kind)
        {
            let result = process_ongoing_operation(ctx, client, status, target, handle).await?;
            return Ok(Resumed::Completed { kind, result });
        }
    }
    Ok(Resumed::Idle)
}

/// Poll a stored handle once. When it has finished, read its result and
/// drop the handle regardless of the outcome.
pub async fn process_ongoing_operation<A: ResourceApi>(
    ctx: &CallContext,
    client: &AsyncClient<A>,
    status: &dyn AsyncStatusUpdater,
    target: ErrorContext<'_>,
    handle: OperationHandle,
) -> Result<Option<A::Resource>> {
    let config = client.config();
    let done = match client.is_done(ctx, &handle).await {
        Ok(done) => done,
        Err(e) => {
            if matches!(e, CloudError::InvalidOperation(_) | CloudError::NotFound(_)) {
                warn!(
                    "Dropping unusable {} operation handle for {} {}: {}",
                    handle.kind.as_str(),
                    target.kind,
                    target.resource,
                    e
                );
                forget(status, &handle);
            }
            return Err(classify::classify(e, Call::Poll, target, config.retry_after));
        }
    };

    if !done {
        debug!(
            "{} operation on {} {} is not done",
            handle.kind.as_str(),
            target.kind,
            target.resource
        );
        return Err(ReconcileError::transient(
            format!(
                "operation type {} on {} {} is not done",
                handle.kind.as_str(),
                target.kind,
                target.resource
            ),
            config.operation_requeue,
        ));
    }

    let result = client.result(ctx, &handle).await;
    forget(status, &handle);

    match result {
        Ok(result) => {
            info!(
                "Finished {} of {} {}",
                kind_label(handle.kind),
                target.kind,
                target.resource
            );
            Ok(result)
        }
        Err(e) => {
            let call = match handle.kind {
                OperationKind::Put => Call::CreateOrUpdate,
                OperationKind::Delete => Call::Delete,
            };
            Err(classify::classify(e, call, target, config.retry_after))
        }
    }
}

/// Submit a PUT. An unfinished operation is persisted and reported as
/// transient; `call` says whether this is the create or the update path.
pub async fn submit_put<A: ResourceApi>(
    ctx: &CallContext,
    client: &AsyncClient<A>,
    status: &dyn AsyncStatusUpdater,
    target: ErrorContext<'_>,
    parameters: A::Resource,
    headers: &Headers,
    call: Call,
) -> Result<A::Resource> {
    info!("{} {} {}", capitalized(call), target.kind, target.resource);
    match client
        .create_or_update_async(ctx, target.resource, parameters, headers)
        .await
    {
        Ok(PutOutcome::Done(resource)) => Ok(resource),
        Ok(PutOutcome::InProgress(handle)) => {
            status.set_long_running_operation_state(handle);
            Err(in_progress(client, target, OperationKind::Put))
        }
        Err(AsyncCallError { error, handle }) => {
            if let Some(handle) = handle {
                status.set_long_running_operation_state(handle);
            }
            Err(classify::classify(
                error,
                call,
                target,
                client.config().retry_after,
            ))
        }
    }
}

/// Submit a DELETE. A NotFound answer counts as success.
pub async fn submit_delete<A: ResourceApi>(
    ctx: &CallContext,
    client: &AsyncClient<A>,
    status: &dyn AsyncStatusUpdater,
    target: ErrorContext<'_>,
    headers: &Headers,
) -> Result<()> {
    info!("Deleting {} {}", target.kind, target.resource);
    match client.delete_async(ctx, target.resource, headers).await {
        Ok(None) => {
            info!("Successfully deleted {} {}", target.kind, target.resource);
            Ok(())
        }
        Ok(Some(handle)) => {
            status.set_long_running_operation_state(handle);
            Err(in_progress(client, target, OperationKind::Delete))
        }
        Err(AsyncCallError { error, handle }) => {
            if let Some(handle) = handle {
                status.set_long_running_operation_state(handle);
            }
            match classify::classify(error, Call::Delete, target, client.config().retry_after) {
                ReconcileError::NotFound { .. } => {
                    debug!("{} {} already deleted", target.kind, target.resource);
                    Ok(())
                }
                err => Err(err),
            }
        }
    }
}

/// Generic create-or-update: resume, Get, state check, diff, PUT.
///
/// Returns the resource as the cloud last reported it.
pub async fn create_resource<A, S>(
    ctx: &CallContext,
    client: &AsyncClient<A>,
    status: &dyn AsyncStatusUpdater,
    kind: &str,
    spec: &S,
    headers: &Headers,
) -> Result<Option<A::Resource>>
where
    A: ResourceApi,
    A::Resource: Provisioned,
    S: ResourceSpec<A::Resource>,
{
    let id = spec.resource_ref();
    let target = ErrorContext::new(kind, &id);

    if let Resumed::Completed {
        kind: OperationKind::Put,
        result,
    } = resume(ctx, client, status, target).await?
    {
        return Ok(result);
    }

    let existing = fetch(ctx, client, target).await?;
    if let Some(existing) = &existing {
        classify::ensure_terminal(
            existing.provisioning_state(),
            target,
            client.config().retry_after,
        )?;
    }

    let Some(parameters) = spec.parameters(existing.as_ref())? else {
        debug!("{} {} is up to date", kind, id);
        return Ok(existing);
    };

    let call = if existing.is_some() {
        Call::Update
    } else {
        Call::Create
    };
    submit_put(ctx, client, status, target, parameters, headers, call)
        .await
        .map(Some)
}

/// Generic delete: resume, then DELETE.
pub async fn delete_resource<A: ResourceApi>(
    ctx: &CallContext,
    client: &AsyncClient<A>,
    status: &dyn AsyncStatusUpdater,
    kind: &str,
    id: &ResourceRef,
    headers: &Headers,
) -> Result<()> {
    let target = ErrorContext::new(kind, id);
    if let Resumed::Completed {
        kind: OperationKind::Delete,
        ..
    } = resume(ctx, client, status, target).await?
    {
        return Ok(());
    }
    submit_delete(ctx, client, status, target, headers).await
}

/// Get, mapping NotFound to `None`.
pub async fn fetch<A: ResourceApi>(
    ctx: &CallContext,
    client: &AsyncClient<A>,
    target: ErrorContext<'_>,
) -> Result<Option<A::Resource>> {
    match client.get(ctx, target.resource).await {
        Ok(resource) => Ok(Some(resource)),
        Err(e) => match classify::classify(e, Call::Get, target, client.config().retry_after) {
            ReconcileError::NotFound { .. } => Ok(None),
            err => Err(err),
        },
    }
}

fn forget(status: &dyn AsyncStatusUpdater, handle: &OperationHandle) {
    status.delete_long_running_operation_state(
        &handle.resource_name,
        &handle.service_name,
        handle.kind,
    );
}

fn in_progress<A: ResourceApi>(
    client: &AsyncClient<A>,
    target: ErrorContext<'_>,
    kind: OperationKind,
) -> ReconcileError {
    ReconcileError::transient(
        format!(
            "{} of {} {} is in progress",
            kind_label(kind),
            target.kind,
            target.resource
        ),
        client.config().operation_requeue,
    )
}

fn capitalized(call: Call) -> &'static str {
    match call {
        Call::Create => "Creating",
        Call::Update => "Updating",
        Call::CreateOrUpdate => "Creating or updating",
        Call::Delete => "Deleting",
        Call::Get => "Getting",
        Call::Poll => "Polling",
    }
}
