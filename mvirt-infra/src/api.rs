//! Managed machine pool object: defaulting, admission validation, and
//! conversion into an [`AgentPoolSpec`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::annotations::{CUSTOM_HEADER_PREFIX, custom_headers};
use crate::services::agentpools::AgentPoolSpec;
use crate::types::{AgentPoolMode, OsType};

/// Label carrying the pool mode, set by [`ManagedMachinePool::apply_defaults`].
pub const LABEL_AGENT_POOL_MODE: &str = "mvirt.io/agentpool-mode";

pub const MIN_MAX_PODS: i32 = 10;
pub const MAX_MAX_PODS: i32 = 250;

/// Windows node names are derived from the pool name and are short.
pub const MAX_WINDOWS_POOL_NAME_LEN: usize = 6;

/// Autoscaler bounds. Present means autoscaling is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScaling {
    pub min_size: Option<i32>,
    pub max_size: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagedMachinePoolSpec {
    /// Name of the agent pool in the cloud. Defaults to the object name.
    pub name: Option<String>,
    pub mode: AgentPoolMode,
    pub sku: String,
    pub os_disk_size_gb: Option<i32>,
    pub availability_zones: Vec<String>,
    pub node_labels: BTreeMap<String, String>,
    /// `key=value:Effect`
    pub taints: Vec<String>,
    pub scaling: Option<AutoScaling>,
    pub max_pods: Option<i32>,
    pub os_disk_type: Option<String>,
    #[serde(rename = "enableUltraSSD")]
    pub enable_ultra_ssd: Option<bool>,
    pub os_type: Option<OsType>,
    pub additional_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagedMachinePool {
    pub name: String,
    pub annotations: HashMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub spec: ManagedMachinePoolSpec,
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: Invalid value: {value}: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field}: Forbidden: {reason}")]
    Forbidden { field: &'static str, reason: String },
}

impl ValidationError {
    fn invalid(field: &'static str, value: impl fmt::Debug, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            value: format!("{:?}", value),
            reason: reason.into(),
        }
    }

    /// Path of the offending field, e.g. `spec.sku`.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Invalid { field, .. } | ValidationError::Forbidden { field, .. } => {
                field
            }
        }
    }
}

/// Every violation found in one validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any violation names `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field() == field)
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl ManagedMachinePool {
    /// Apply defaults before validation.
    pub fn apply_defaults(&mut self) {
        self.labels.insert(
            LABEL_AGENT_POOL_MODE.to_string(),
            self.spec.mode.as_str().to_string(),
        );
        if self.spec.name.as_deref().is_none_or(str::is_empty) {
            self.spec.name = Some(self.name.clone());
        }
    }

    pub fn validate_create(&self) -> Result<(), ValidationErrors> {
        let errs: Vec<ValidationError> = [
            self.validate_max_pods(),
            self.validate_os_type(),
            self.validate_name(),
        ]
        .into_iter()
        .flatten()
        .collect();
        ValidationErrors(errs).into_result()
    }

    /// Reject changes to fields the cloud cannot change in place.
    pub fn validate_update(&self, old: &ManagedMachinePool) -> Result<(), ValidationErrors> {
        let mut errs = Vec::new();
        let (new, prev) = (&self.spec, &old.spec);

        if new.sku != prev.sku {
            errs.push(ValidationError::invalid("spec.sku", &new.sku, "field is immutable"));
        }

        errs.extend(immutable_once_set("spec.osType", &new.os_type, &prev.os_type));
        errs.extend(immutable_once_set(
            "spec.osDiskSizeGB",
            &new.os_disk_size_gb,
            &prev.os_disk_size_gb,
        ));

        if new.taints != prev.taints {
            errs.push(ValidationError::invalid("spec.taints", &new.taints, "field is immutable"));
        }

        if custom_headers(&self.annotations) != custom_headers(&old.annotations) {
            errs.push(ValidationError::invalid(
                "metadata.annotations",
                &self.annotations,
                format!("annotations with '{}' prefix are immutable", CUSTOM_HEADER_PREFIX),
            ));
        }

        if !same_zones(&new.availability_zones, &prev.availability_zones) {
            errs.push(ValidationError::invalid(
                "spec.availabilityZones",
                &new.availability_zones,
                "field is immutable",
            ));
        }

        errs.extend(immutable_once_set("spec.maxPods", &new.max_pods, &prev.max_pods));

        // An empty disk type counts as unset.
        let disk_type = new.os_disk_type.as_ref().filter(|t| !t.is_empty());
        errs.extend(immutable_once_set(
            "spec.osDiskType",
            &disk_type,
            &prev.os_disk_type.as_ref(),
        ));

        match (&prev.enable_ultra_ssd, &new.enable_ultra_ssd) {
            (None, Some(_)) => errs.push(ValidationError::invalid(
                "spec.enableUltraSSD",
                new.enable_ultra_ssd,
                "field is immutable, setting it after creation is not allowed",
            )),
            _ => errs.extend(immutable_once_set(
                "spec.enableUltraSSD",
                &new.enable_ultra_ssd,
                &prev.enable_ultra_ssd,
            )),
        }

        ValidationErrors(errs).into_result()
    }

    /// Desired agent pool for this object.
    pub fn agent_pool_spec(
        &self,
        resource_group: &str,
        cluster: &str,
        replicas: i32,
        version: Option<String>,
    ) -> AgentPoolSpec {
        let name = self
            .spec
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name.clone());
        let scaling = self.spec.scaling.as_ref();

        AgentPoolSpec {
            name,
            resource_group: resource_group.to_string(),
            cluster: cluster.to_string(),
            sku: self.spec.sku.clone(),
            replicas,
            os_disk_size_gb: self.spec.os_disk_size_gb,
            version,
            vnet_subnet_id: None,
            mode: self.spec.mode,
            enable_auto_scaling: scaling.is_some(),
            min_count: scaling.and_then(|s| s.min_size),
            max_count: scaling.and_then(|s| s.max_size),
            os_type: self.spec.os_type,
            max_pods: self.spec.max_pods,
            os_disk_type: self.spec.os_disk_type.clone(),
            enable_ultra_ssd: self.spec.enable_ultra_ssd,
            availability_zones: self.spec.availability_zones.clone(),
            node_labels: self.spec.node_labels.clone(),
            node_taints: self.spec.taints.clone(),
            tags: self.spec.additional_tags.clone(),
        }
    }

    fn validate_max_pods(&self) -> Option<ValidationError> {
        let max_pods = self.spec.max_pods?;
        if (MIN_MAX_PODS..=MAX_MAX_PODS).contains(&max_pods) {
            return None;
        }
        Some(ValidationError::invalid(
            "spec.maxPods",
            max_pods,
            format!("MaxPods must be between {} and {}", MIN_MAX_PODS, MAX_MAX_PODS),
        ))
    }

    fn validate_os_type(&self) -> Option<ValidationError> {
        match (self.spec.mode, self.spec.os_type) {
            (AgentPoolMode::System, Some(os)) if os != OsType::Linux => {
                Some(ValidationError::Forbidden {
                    field: "spec.osType",
                    reason: "System node pool must have OSType 'Linux'".to_string(),
                })
            }
            _ => None,
        }
    }

    fn validate_name(&self) -> Option<ValidationError> {
        if self.spec.os_type == Some(OsType::Windows)
            && self.name.chars().count() > MAX_WINDOWS_POOL_NAME_LEN
        {
            return Some(ValidationError::invalid(
                "name",
                &self.name,
                format!(
                    "Windows agent pool name can not be longer than {} characters",
                    MAX_WINDOWS_POOL_NAME_LEN
                ),
            ));
        }
        None
    }
}

/// Zones match when they hold the same entries the same number of times.
fn same_zones(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<_> = a.iter().collect();
    let mut b: Vec<_> = b.iter().collect();
    a.sort();
    b.sort();
    a == b
}

/// A field that may be left unset at creation but, once set, can neither
/// change nor be unset.
fn immutable_once_set<T: PartialEq + fmt::Debug>(
    field: &'static str,
    new: &Option<T>,
    old: &Option<T>,
) -> Option<ValidationError> {
    match (old, new) {
        (Some(_), None) => Some(ValidationError::invalid(
            field,
            new,
            "field is immutable, unsetting is not allowed",
        )),
        (Some(old), Some(new)) if old != new => {
            Some(ValidationError::invalid(field, new, "field is immutable"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ManagedMachinePool {
        ManagedMachinePool {
            name: "pool0".to_string(),
            spec: ManagedMachinePoolSpec {
                mode: AgentPoolMode::System,
                sku: "Standard_D2s_v3".to_string(),
                os_disk_size_gb: Some(128),
                availability_zones: vec!["1".to_string(), "2".to_string()],
                max_pods: Some(30),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_defaults_sets_mode_label_and_name() {
        let mut p = pool();
        p.apply_defaults();

        assert_eq!(
            p.labels.get(LABEL_AGENT_POOL_MODE).map(String::as_str),
            Some("System")
        );
        assert_eq!(p.spec.name.as_deref(), Some("pool0"));

        let mut named = pool();
        named.spec.name = Some("custom".to_string());
        named.apply_defaults();
        assert_eq!(named.spec.name.as_deref(), Some("custom"));
    }

    #[test]
    fn test_valid_pool_passes_create() {
        assert!(pool().validate_create().is_ok());
    }

    #[test]
    fn test_max_pods_bounds() {
        for (max_pods, ok) in [(9, false), (10, true), (250, true), (251, false)] {
            let mut p = pool();
            p.spec.max_pods = Some(max_pods);
            assert_eq!(p.validate_create().is_ok(), ok, "max_pods={}", max_pods);
        }
    }

    #[test]
    fn test_system_pool_must_be_linux() {
        let mut p = pool();
        p.spec.os_type = Some(OsType::Windows);
        p.name = "win".to_string();

        let errs = p.validate_create().unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs.has_field("spec.osType"));
    }

    #[test]
    fn test_windows_name_length() {
        let mut p = pool();
        p.spec.mode = AgentPoolMode::User;
        p.spec.os_type = Some(OsType::Windows);
        p.name = "winpool".to_string();

        let errs = p.validate_create().unwrap_err();
        assert!(errs.has_field("name"));

        p.name = "winpl".to_string();
        assert!(p.validate_create().is_ok());
    }

    #[test]
    fn test_create_aggregates_all_failures() {
        let mut p = pool();
        p.name = "windowspool".to_string();
        p.spec.os_type = Some(OsType::Windows);
        p.spec.max_pods = Some(5);

        let errs = p.validate_create().unwrap_err();
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn test_unchanged_update_passes() {
        assert!(pool().validate_update(&pool()).is_ok());
    }

    #[test]
    fn test_sku_and_disk_size_are_immutable() {
        let old = pool();
        let mut new = pool();
        new.spec.sku = "Standard_D4s_v3".to_string();
        new.spec.os_disk_size_gb = Some(256);

        let errs = new.validate_update(&old).unwrap_err();
        assert!(errs.has_field("spec.sku"));
        assert!(errs.has_field("spec.osDiskSizeGB"));
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn test_unsetting_is_rejected() {
        let old = pool();
        let mut new = pool();
        new.spec.max_pods = None;

        let errs = new.validate_update(&old).unwrap_err();
        assert!(errs.has_field("spec.maxPods"));
        assert!(errs.to_string().contains("unsetting is not allowed"));
    }

    #[test]
    fn test_zone_order_does_not_matter() {
        let old = pool();
        let mut new = pool();
        new.spec.availability_zones = vec!["2".to_string(), "1".to_string()];
        assert!(new.validate_update(&old).is_ok());

        new.spec.availability_zones = vec!["1".to_string()];
        assert!(new.validate_update(&old).unwrap_err().has_field("spec.availabilityZones"));
    }

    #[test]
    fn test_duplicate_zones_are_a_change() {
        let mut old = pool();
        old.spec.availability_zones = vec!["1".to_string()];
        let mut new = pool();
        new.spec.availability_zones = vec!["1".to_string(), "1".to_string()];
        assert!(new.validate_update(&old).unwrap_err().has_field("spec.availabilityZones"));

        old.spec.availability_zones = vec!["1".to_string(), "2".to_string()];
        new.spec.availability_zones = vec!["1".to_string(), "1".to_string()];
        assert!(new.validate_update(&old).unwrap_err().has_field("spec.availabilityZones"));
    }

    #[test]
    fn test_custom_header_annotations_are_immutable() {
        let old = pool();
        let mut new = pool();
        new.annotations
            .insert("unrelated".to_string(), "x".to_string());
        assert!(new.validate_update(&old).is_ok());

        new.annotations.insert(
            format!("{}AKSHTTPCustomFeatures", CUSTOM_HEADER_PREFIX),
            "Microsoft.ContainerService/Foo".to_string(),
        );
        let errs = new.validate_update(&old).unwrap_err();
        assert!(errs.has_field("metadata.annotations"));
    }

    #[test]
    fn test_ultra_ssd_cannot_be_set_later() {
        let old = pool();
        let mut new = pool();
        new.spec.enable_ultra_ssd = Some(true);

        let errs = new.validate_update(&old).unwrap_err();
        assert!(errs.has_field("spec.enableUltraSSD"));
    }

    #[test]
    fn test_empty_disk_type_counts_as_unset() {
        let mut old = pool();
        old.spec.os_disk_type = Some("Ephemeral".to_string());
        let mut new = old.clone();
        new.spec.os_disk_type = Some(String::new());

        assert!(new.validate_update(&old).unwrap_err().has_field("spec.osDiskType"));
    }

    #[test]
    fn test_taints_are_immutable() {
        let old = pool();
        let mut new = pool();
        new.spec.taints = vec!["dedicated=gpu:NoSchedule".to_string()];
        assert!(new.validate_update(&old).unwrap_err().has_field("spec.taints"));
    }

    #[test]
    fn test_agent_pool_spec_conversion() {
        let mut p = pool();
        p.spec.scaling = Some(AutoScaling {
            min_size: Some(1),
            max_size: Some(5),
        });
        p.spec.additional_tags
            .insert("owner".to_string(), "team-a".to_string());

        let spec = p.agent_pool_spec("rg", "cluster", 3, Some("1.30.2".to_string()));
        assert_eq!(spec.name, "pool0");
        assert_eq!(spec.resource_ref().to_string(), "rg/cluster/pool0");
        assert_eq!(spec.replicas, 3);
        assert!(spec.enable_auto_scaling);
        assert_eq!((spec.min_count, spec.max_count), (Some(1), Some(5)));
        assert_eq!(spec.tags.get("owner").map(String::as_str), Some("team-a"));
        assert_eq!(spec.mode, AgentPoolMode::System);
    }
}
