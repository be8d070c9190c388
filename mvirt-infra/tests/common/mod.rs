//! Shared fixtures for the reconciler integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use mvirt_infra::config::ReconcileConfig;
use mvirt_infra::services::agentpools::{AgentPool, AgentPoolService, AgentPoolSpec};
use mvirt_infra::test_util::{FakeCloud, MachinePoolStatus, MemoryAgentPoolScope, RecordedCall, Simulated};
use mvirt_infra::types::{AgentPoolMode, ResourceRef};

pub type PoolService = AgentPoolService<MemoryAgentPoolScope, FakeCloud<AgentPool>>;

pub fn pool_spec() -> AgentPoolSpec {
    AgentPoolSpec {
        name: "pool0".to_string(),
        resource_group: "rg".to_string(),
        cluster: "cluster".to_string(),
        sku: "Standard_D2s_v3".to_string(),
        replicas: 3,
        os_disk_size_gb: Some(128),
        version: Some("1.30.2".to_string()),
        mode: AgentPoolMode::User,
        ..Default::default()
    }
}

/// The pool as the cloud reports it after a finished create of `spec`.
pub fn settled_pool(spec: &AgentPoolSpec) -> AgentPool {
    let mut pool = spec.to_agent_pool();
    pool.settle(&spec.resource_ref());
    pool
}

/// An agent pool service wired to an in-memory cloud and scope.
pub struct PoolHarness {
    pub cloud: FakeCloud<AgentPool>,
    pub scope: Arc<MemoryAgentPoolScope>,
    pub service: PoolService,
    pub config: ReconcileConfig,
}

impl PoolHarness {
    pub fn new(spec: AgentPoolSpec) -> Self {
        Self::with_cloud(FakeCloud::new(), spec, MachinePoolStatus::default())
    }

    fn with_cloud(cloud: FakeCloud<AgentPool>, spec: AgentPoolSpec, status: MachinePoolStatus) -> Self {
        let config = ReconcileConfig::default();
        let scope = Arc::new(MemoryAgentPoolScope::with_status(spec, status));
        let service = AgentPoolService::new(Arc::clone(&scope), cloud.clone(), config);
        Self {
            cloud,
            scope,
            service,
            config,
        }
    }

    /// A fresh process: status goes through JSON, the cloud is kept.
    pub fn restart(&self) -> Self {
        let json = serde_json::to_string(&self.scope.status()).unwrap();
        let status: MachinePoolStatus = serde_json::from_str(&json).unwrap();
        Self::with_cloud(self.cloud.clone(), pool_spec_of(&self.scope), status)
    }

    pub fn id(&self) -> ResourceRef {
        pool_spec_of(&self.scope).resource_ref()
    }

    /// Parameters of every PUT seen so far.
    pub fn puts(&self) -> Vec<AgentPool> {
        self.cloud
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::CreateOrUpdate { parameters, .. } => Some(parameters),
                _ => None,
            })
            .collect()
    }
}

fn pool_spec_of(scope: &MemoryAgentPoolScope) -> AgentPoolSpec {
    use mvirt_infra::services::agentpools::ManagedMachinePoolScope;
    scope.agent_pool_spec()
}
