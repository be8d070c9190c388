//! Agent pool desired spec, cloud model, and normalized projection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diff::{Compare, Diff, Normalize};
use crate::types::{AgentPoolMode, OsType, ProvisioningState, Provisioned, ResourceRef};

/// Desired state of an agent pool, as produced by the scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentPoolSpec {
    pub name: String,
    pub resource_group: String,
    /// Managed cluster the pool belongs to.
    pub cluster: String,
    pub sku: String,
    pub replicas: i32,
    pub os_disk_size_gb: Option<i32>,
    /// Kubernetes version.
    pub version: Option<String>,
    pub vnet_subnet_id: Option<String>,
    pub mode: AgentPoolMode,
    pub enable_auto_scaling: bool,
    pub min_count: Option<i32>,
    pub max_count: Option<i32>,
    pub os_type: Option<OsType>,
    pub max_pods: Option<i32>,
    pub os_disk_type: Option<String>,
    pub enable_ultra_ssd: Option<bool>,
    pub availability_zones: Vec<String>,
    pub node_labels: BTreeMap<String, String>,
    pub node_taints: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl AgentPoolSpec {
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.resource_group, &self.cluster, &self.name)
    }

    /// Full PUT payload for this spec. Server-populated fields stay empty.
    pub fn to_agent_pool(&self) -> AgentPool {
        AgentPool {
            name: Some(self.name.clone()),
            count: Some(self.replicas),
            vm_size: Some(self.sku.clone()),
            os_disk_size_gb: self.os_disk_size_gb,
            vnet_subnet_id: self.vnet_subnet_id.clone(),
            max_pods: self.max_pods,
            os_type: self.os_type,
            orchestrator_version: self.version.clone(),
            mode: Some(self.mode),
            enable_auto_scaling: Some(self.enable_auto_scaling),
            min_count: self.min_count,
            max_count: self.max_count,
            availability_zones: self.availability_zones.clone(),
            node_labels: self.node_labels.clone(),
            node_taints: self.node_taints.clone(),
            tags: self.tags.clone(),
            os_disk_type: self.os_disk_type.clone(),
            enable_ultra_ssd: self.enable_ultra_ssd,
            ..Default::default()
        }
    }
}

/// Agent pool as the cloud API represents it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentPool {
    // Server-populated
    pub id: Option<String>,
    pub provisioning_state: Option<ProvisioningState>,
    pub node_image_version: Option<String>,
    /// Provider IDs of the instances backing the pool.
    pub provider_ids: Vec<String>,

    pub name: Option<String>,
    pub count: Option<i32>,
    pub vm_size: Option<String>,
    pub os_disk_size_gb: Option<i32>,
    pub vnet_subnet_id: Option<String>,
    pub max_pods: Option<i32>,
    pub os_type: Option<OsType>,
    pub orchestrator_version: Option<String>,
    pub mode: Option<AgentPoolMode>,
    pub enable_auto_scaling: Option<bool>,
    pub min_count: Option<i32>,
    pub max_count: Option<i32>,
    pub availability_zones: Vec<String>,
    pub node_labels: BTreeMap<String, String>,
    pub node_taints: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub os_disk_type: Option<String>,
    #[serde(rename = "enableUltraSSD")]
    pub enable_ultra_ssd: Option<bool>,
}

impl AgentPool {
    /// Reported count, or the number of backing instances when absent.
    pub fn observed_replicas(&self) -> i32 {
        self.count
            .unwrap_or_else(|| i32::try_from(self.provider_ids.len()).unwrap_or(i32::MAX))
    }
}

impl Provisioned for AgentPool {
    fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.provisioning_state
    }
}

/// Fields of an agent pool that can change in place.
///
/// Immutable fields (size, disk, zones, taints, max pods) are guarded by
/// admission validation and left out, as are server-populated ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPoolProjection {
    pub count: Option<i32>,
    pub orchestrator_version: Option<String>,
    pub mode: Option<AgentPoolMode>,
    pub enable_auto_scaling: bool,
    pub min_count: Option<i32>,
    pub max_count: Option<i32>,
    pub os_type: Option<OsType>,
    pub node_labels: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl Normalize for AgentPool {
    type Projection = AgentPoolProjection;

    fn normalize(&self) -> AgentPoolProjection {
        AgentPoolProjection {
            count: self.count,
            orchestrator_version: self.orchestrator_version.clone(),
            mode: self.mode,
            enable_auto_scaling: self.enable_auto_scaling.unwrap_or(false),
            min_count: self.min_count,
            max_count: self.max_count,
            os_type: self.os_type,
            node_labels: self.node_labels.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl Compare for AgentPoolProjection {
    /// Optional fields the desired spec leaves unset take the cloud default.
    fn diff(&self, existing: &Self) -> Diff {
        // No `..`: a new projection field must be compared here.
        let AgentPoolProjection {
            count,
            orchestrator_version,
            mode,
            enable_auto_scaling,
            min_count,
            max_count,
            os_type,
            node_labels,
            tags,
        } = self;

        Diff::new()
            .field("count", count, &existing.count)
            .optional(
                "orchestratorVersion",
                orchestrator_version,
                &existing.orchestrator_version,
            )
            .field("mode", mode, &existing.mode)
            .field(
                "enableAutoScaling",
                enable_auto_scaling,
                &existing.enable_auto_scaling,
            )
            .optional("minCount", min_count, &existing.min_count)
            .optional("maxCount", max_count, &existing.max_count)
            .optional("osType", os_type, &existing.os_type)
            .field("nodeLabels", node_labels, &existing.node_labels)
            .field("tags", tags, &existing.tags)
    }
}
