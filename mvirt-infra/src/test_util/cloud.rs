//! In-memory cloud control plane.
//!
//! Accepted operations stay pending until they have been polled
//! `complete_after_polls` times (or forever, until [`FakeCloud::complete_pending`]).
//! While pending, Get reports the resource in `Creating`/`Updating`/`Deleting`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::client::{Headers, ResourceApi};
use crate::error::CloudError;
use crate::operation::{OperationKind, Poller};
use crate::services::agentpools::AgentPool;
use crate::services::vmextensions::VmExtension;
use crate::types::{ProvisioningState, ResourceRef};

/// Resource models the fake cloud can host.
pub trait Simulated: Clone + Send + Sync + 'static {
    fn set_provisioning_state(&mut self, state: ProvisioningState);

    /// Fill server-populated fields once a PUT has finished.
    fn settle(&mut self, id: &ResourceRef);
}

impl Simulated for AgentPool {
    fn set_provisioning_state(&mut self, state: ProvisioningState) {
        self.provisioning_state = Some(state);
    }

    fn settle(&mut self, id: &ResourceRef) {
        self.id = Some(format!(
            "/resourceGroups/{}/managedClusters/{}/agentPools/{}",
            id.resource_group, id.owner, id.name
        ));
        self.provisioning_state = Some(ProvisioningState::Succeeded);
        self.provider_ids = (0..self.count.unwrap_or(0).max(0))
            .map(|i| format!("mvirt://{}/{}/{}-{}", id.resource_group, id.owner, id.name, i))
            .collect();
    }
}

impl Simulated for VmExtension {
    fn set_provisioning_state(&mut self, state: ProvisioningState) {
        self.provisioning_state = Some(state);
    }

    fn settle(&mut self, id: &ResourceRef) {
        self.id = Some(format!(
            "/resourceGroups/{}/virtualMachines/{}/extensions/{}",
            id.resource_group, id.owner, id.name
        ));
        self.provisioning_state = Some(ProvisioningState::Succeeded);
        self.protected_settings.clear();
    }
}

/// Call kinds that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeCall {
    Get,
    Put,
    Delete,
    Poll,
    Result,
}

/// A call as seen by the fake cloud.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall<R> {
    Get(ResourceRef),
    CreateOrUpdate {
        id: ResourceRef,
        parameters: R,
        headers: Headers,
    },
    Delete {
        id: ResourceRef,
        headers: Headers,
    },
    Poll(OperationKind),
}

impl<R> RecordedCall<R> {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            RecordedCall::CreateOrUpdate { .. } | RecordedCall::Delete { .. }
        )
    }
}

struct Operation<R> {
    kind: OperationKind,
    id: ResourceRef,
    parameters: Option<R>,
    /// `None` means pending until completed explicitly.
    polls_remaining: Option<u32>,
    done: bool,
}

struct State<R> {
    resources: HashMap<ResourceRef, R>,
    operations: HashMap<Uuid, Operation<R>>,
    calls: Vec<RecordedCall<R>>,
    complete_after_polls: Option<u32>,
    failures: Vec<(FakeCall, CloudError)>,
    latency: Duration,
}

impl<R> State<R> {
    fn start(&mut self, kind: OperationKind, id: &ResourceRef, parameters: Option<R>) -> Vec<u8> {
        let op_id = Uuid::new_v4();
        self.operations.insert(
            op_id,
            Operation {
                kind,
                id: id.clone(),
                parameters,
                polls_remaining: self.complete_after_polls,
                done: false,
            },
        );
        op_id.as_bytes().to_vec()
    }

    fn take_failure(&mut self, call: FakeCall) -> Result<(), CloudError> {
        match self.failures.iter().position(|(c, _)| *c == call) {
            Some(i) => Err(self.failures.remove(i).1),
            None => Ok(()),
        }
    }
}

/// Shared in-memory cloud. Clones see the same state.
#[derive(Clone)]
pub struct FakeCloud<R> {
    state: Arc<Mutex<State<R>>>,
}

impl<R: Simulated> Default for FakeCloud<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Simulated> FakeCloud<R> {
    /// Operations finish on the first poll.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                resources: HashMap::new(),
                operations: HashMap::new(),
                calls: Vec::new(),
                complete_after_polls: Some(0),
                failures: Vec::new(),
                latency: Duration::ZERO,
            })),
        }
    }

    /// Polls an operation answers "not done" before it finishes.
    /// `None` keeps new operations pending until [`Self::complete_pending`].
    pub fn set_complete_after_polls(&self, polls: Option<u32>) {
        self.lock().complete_after_polls = polls;
    }

    /// Fail the next call of this kind with `err`.
    pub fn fail_next(&self, call: FakeCall, err: CloudError) {
        self.lock().failures.push((call, err));
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn insert(&self, id: ResourceRef, resource: R) {
        self.lock().resources.insert(id, resource);
    }

    pub fn resource(&self, id: &ResourceRef) -> Option<R> {
        self.lock().resources.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<RecordedCall<R>> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutating()).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn pending_operations(&self) -> usize {
        self.lock().operations.values().filter(|op| !op.done).count()
    }

    /// Let every pending operation finish on its next poll.
    pub fn complete_pending(&self) {
        for op in self.lock().operations.values_mut() {
            op.polls_remaining = Some(0);
        }
    }

    /// Drop all operation records, as if the cloud had expired them.
    pub fn forget_operations(&self) {
        self.lock().operations.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn operation_id(state: &[u8]) -> Result<Uuid, CloudError> {
    Uuid::from_slice(state)
        .map_err(|e| CloudError::InvalidOperation(format!("unknown poller state: {}", e)))
}

#[async_trait]
impl<R: Simulated> ResourceApi for FakeCloud<R> {
    type Resource = R;

    async fn get(&self, id: &ResourceRef) -> Result<R, CloudError> {
        self.delay().await;
        let mut state = self.lock();
        state.calls.push(RecordedCall::Get(id.clone()));
        state.take_failure(FakeCall::Get)?;
        state
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(id.to_string()))
    }

    async fn begin_create_or_update(
        &self,
        id: &ResourceRef,
        parameters: R,
        headers: &Headers,
    ) -> Result<Vec<u8>, CloudError> {
        self.delay().await;
        let mut guard = self.lock();
        let state = &mut *guard;
        state.calls.push(RecordedCall::CreateOrUpdate {
            id: id.clone(),
            parameters: parameters.clone(),
            headers: headers.clone(),
        });
        state.take_failure(FakeCall::Put)?;

        match state.resources.get_mut(id) {
            Some(existing) => existing.set_provisioning_state(ProvisioningState::Updating),
            None => {
                let mut pending = parameters.clone();
                pending.set_provisioning_state(ProvisioningState::Creating);
                state.resources.insert(id.clone(), pending);
            }
        }
        Ok(state.start(OperationKind::Put, id, Some(parameters)))
    }

    async fn begin_delete(&self, id: &ResourceRef, headers: &Headers) -> Result<Vec<u8>, CloudError> {
        self.delay().await;
        let mut guard = self.lock();
        let state = &mut *guard;
        state.calls.push(RecordedCall::Delete {
            id: id.clone(),
            headers: headers.clone(),
        });
        state.take_failure(FakeCall::Delete)?;

        let existing = state
            .resources
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound(id.to_string()))?;
        existing.set_provisioning_state(ProvisioningState::Deleting);
        Ok(state.start(OperationKind::Delete, id, None))
    }

    async fn poll(&self, poller: &Poller) -> Result<bool, CloudError> {
        self.delay().await;
        let mut guard = self.lock();
        let state = &mut *guard;
        state.calls.push(RecordedCall::Poll(poller.kind()));
        state.take_failure(FakeCall::Poll)?;

        let op_id = operation_id(poller.state())?;
        let op = state
            .operations
            .get_mut(&op_id)
            .ok_or_else(|| CloudError::NotFound(format!("operation {}", op_id)))?;
        if op.done {
            return Ok(true);
        }
        match op.polls_remaining {
            Some(0) => {}
            Some(n) => {
                op.polls_remaining = Some(n - 1);
                return Ok(false);
            }
            None => return Ok(false),
        }

        op.done = true;
        let id = op.id.clone();
        match (op.kind, op.parameters.take()) {
            (OperationKind::Put, Some(mut resource)) => {
                resource.settle(&id);
                state.resources.insert(id, resource);
            }
            (OperationKind::Delete, _) => {
                state.resources.remove(&id);
            }
            (OperationKind::Put, None) => {}
        }
        Ok(true)
    }

    async fn create_or_update_result(&self, poller_state: &[u8]) -> Result<R, CloudError> {
        let op_id = operation_id(poller_state)?;
        let mut state = self.lock();
        state.take_failure(FakeCall::Result)?;
        let op = state
            .operations
            .get(&op_id)
            .ok_or_else(|| CloudError::NotFound(format!("operation {}", op_id)))?;
        if !op.done {
            return Err(CloudError::InvalidOperation(format!(
                "operation {} is not done",
                op_id
            )));
        }
        state
            .resources
            .get(&op.id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(op.id.to_string()))
    }

    async fn delete_result(&self, poller_state: &[u8]) -> Result<(), CloudError> {
        let op_id = operation_id(poller_state)?;
        let mut state = self.lock();
        state.take_failure(FakeCall::Result)?;
        match state.operations.get(&op_id) {
            Some(op) if op.done => Ok(()),
            Some(_) => Err(CloudError::InvalidOperation(format!(
                "operation {} is not done",
                op_id
            ))),
            None => Err(CloudError::NotFound(format!("operation {}", op_id))),
        }
    }
}
