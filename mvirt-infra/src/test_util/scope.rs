//! In-memory scopes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::operation::{AsyncStatusUpdater, OperationHandle, OperationKind, OperationStates};
use crate::orchestrator::ReconcileStatus;
use crate::services::agentpools::{AgentPoolSpec, ManagedMachinePoolScope};
use crate::services::vmextensions::{VmExtensionScope, VmExtensionSpec};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Status subresource of a managed machine pool. Serializable so a test can
/// carry it over a simulated restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MachinePoolStatus {
    pub long_running_operation_states: OperationStates,
    pub replicas: i32,
    pub ready: bool,
    pub provider_ids: Vec<String>,
}

#[derive(Default)]
struct PoolState {
    spec: AgentPoolSpec,
    annotations: HashMap<String, String>,
    machine_pool_annotations: HashMap<String, String>,
    machine_pool_replicas: Option<i32>,
    annotation_updates: Vec<(String, String)>,
    status: MachinePoolStatus,
}

/// Managed machine pool scope backed by memory.
pub struct MemoryAgentPoolScope {
    inner: Mutex<PoolState>,
}

impl MemoryAgentPoolScope {
    pub fn new(spec: AgentPoolSpec) -> Self {
        Self::with_status(spec, MachinePoolStatus::default())
    }

    /// Scope restored from a persisted status.
    pub fn with_status(spec: AgentPoolSpec, status: MachinePoolStatus) -> Self {
        Self {
            inner: Mutex::new(PoolState {
                spec,
                status,
                ..Default::default()
            }),
        }
    }

    pub fn status(&self) -> MachinePoolStatus {
        lock(&self.inner).status.clone()
    }

    pub fn set_spec(&self, spec: AgentPoolSpec) {
        lock(&self.inner).spec = spec;
    }

    /// Set an annotation on the owning object (e.g. a custom header).
    pub fn set_annotation(&self, key: &str, value: &str) {
        lock(&self.inner)
            .annotations
            .insert(key.to_string(), value.to_string());
    }

    /// Seed a machine pool annotation without recording it as an update.
    pub fn seed_machine_pool_annotation(&self, key: &str, value: &str) {
        lock(&self.inner)
            .machine_pool_annotations
            .insert(key.to_string(), value.to_string());
    }

    /// Annotation writes made by the service, in order.
    pub fn annotation_updates(&self) -> Vec<(String, String)> {
        lock(&self.inner).annotation_updates.clone()
    }

    /// Replica count written back to the machine pool, if any.
    pub fn machine_pool_replicas(&self) -> Option<i32> {
        lock(&self.inner).machine_pool_replicas
    }
}

impl AsyncStatusUpdater for MemoryAgentPoolScope {
    fn long_running_operation_state(
        &self,
        resource_name: &str,
        service_name: &str,
        kind: OperationKind,
    ) -> Option<OperationHandle> {
        lock(&self.inner)
            .status
            .long_running_operation_states
            .get(resource_name, service_name, kind)
            .cloned()
    }

    fn set_long_running_operation_state(&self, handle: OperationHandle) {
        lock(&self.inner)
            .status
            .long_running_operation_states
            .set(handle);
    }

    fn delete_long_running_operation_state(
        &self,
        resource_name: &str,
        service_name: &str,
        kind: OperationKind,
    ) {
        lock(&self.inner)
            .status
            .long_running_operation_states
            .delete(resource_name, service_name, kind);
    }
}

impl ManagedMachinePoolScope for MemoryAgentPoolScope {
    fn agent_pool_spec(&self) -> AgentPoolSpec {
        lock(&self.inner).spec.clone()
    }

    fn agent_pool_annotations(&self) -> HashMap<String, String> {
        lock(&self.inner).annotations.clone()
    }

    fn set_provider_id_list(&self, provider_ids: Vec<String>) {
        lock(&self.inner).status.provider_ids = provider_ids;
    }

    fn set_replicas(&self, replicas: i32) {
        lock(&self.inner).status.replicas = replicas;
    }

    fn set_ready(&self, ready: bool) {
        lock(&self.inner).status.ready = ready;
    }

    fn machine_pool_annotation(&self, key: &str) -> Option<String> {
        lock(&self.inner).machine_pool_annotations.get(key).cloned()
    }

    fn update_machine_pool_annotation(&self, key: &str, value: &str) {
        let mut inner = lock(&self.inner);
        inner
            .machine_pool_annotations
            .insert(key.to_string(), value.to_string());
        inner
            .annotation_updates
            .push((key.to_string(), value.to_string()));
    }

    fn update_machine_pool_replicas(&self, replicas: i32) {
        let mut inner = lock(&self.inner);
        inner.machine_pool_replicas = Some(replicas);
        inner.spec.replicas = replicas;
    }
}

/// Machine scope carrying VM extension specs.
pub struct MemoryVmExtensionScope {
    specs: Vec<VmExtensionSpec>,
    operations: Mutex<OperationStates>,
    bootstrap_status: Mutex<Option<ReconcileStatus>>,
}

impl MemoryVmExtensionScope {
    pub fn new(specs: Vec<VmExtensionSpec>) -> Self {
        Self {
            specs,
            operations: Mutex::new(OperationStates::default()),
            bootstrap_status: Mutex::new(None),
        }
    }

    pub fn bootstrap_status(&self) -> Option<ReconcileStatus> {
        lock(&self.bootstrap_status).clone()
    }

    pub fn operation_states(&self) -> OperationStates {
        lock(&self.operations).clone()
    }
}

impl AsyncStatusUpdater for MemoryVmExtensionScope {
    fn long_running_operation_state(
        &self,
        resource_name: &str,
        service_name: &str,
        kind: OperationKind,
    ) -> Option<OperationHandle> {
        lock(&self.operations)
            .get(resource_name, service_name, kind)
            .cloned()
    }

    fn set_long_running_operation_state(&self, handle: OperationHandle) {
        lock(&self.operations).set(handle);
    }

    fn delete_long_running_operation_state(
        &self,
        resource_name: &str,
        service_name: &str,
        kind: OperationKind,
    ) {
        lock(&self.operations).delete(resource_name, service_name, kind);
    }
}

impl VmExtensionScope for MemoryVmExtensionScope {
    fn vm_extension_specs(&self) -> Vec<VmExtensionSpec> {
        self.specs.clone()
    }

    fn set_bootstrap_status(&self, status: ReconcileStatus) {
        *lock(&self.bootstrap_status) = Some(status);
    }
}
