//! Types shared by every resource kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a cloud resource: resource group, owning resource, name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub resource_group: String,
    /// Owning resource (e.g. the managed cluster or the virtual machine).
    pub owner: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(
        resource_group: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.resource_group, self.owner, self.name)
    }
}

/// Cloud-side lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Creating,
    Updating,
    Deleting,
    Canceled,
    Failed,
    Succeeded,
    /// Any state this crate does not model, e.g. `Upgrading` or `Scaling`.
    #[serde(other)]
    Other,
}

impl ProvisioningState {
    /// Terminal states permit a new mutating call.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProvisioningState::Canceled | ProvisioningState::Failed | ProvisioningState::Succeeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::Creating => "Creating",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Canceled => "Canceled",
            ProvisioningState::Failed => "Failed",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Other => "Other",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisioningState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creating" => Ok(ProvisioningState::Creating),
            "Updating" => Ok(ProvisioningState::Updating),
            "Deleting" => Ok(ProvisioningState::Deleting),
            "Canceled" => Ok(ProvisioningState::Canceled),
            "Failed" => Ok(ProvisioningState::Failed),
            "Succeeded" => Ok(ProvisioningState::Succeeded),
            "" => Err(()),
            _ => Ok(ProvisioningState::Other),
        }
    }
}

/// Resources that report a provisioning state.
pub trait Provisioned {
    /// `None` when the provider did not report one.
    fn provisioning_state(&self) -> Option<ProvisioningState>;
}

/// Agent pool mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentPoolMode {
    /// Hosts critical system pods.
    System,
    #[default]
    User,
}

impl AgentPoolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPoolMode::System => "System",
            AgentPoolMode::User => "User",
        }
    }
}

impl fmt::Display for AgentPoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    Linux,
    Windows,
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsType::Linux => f.write_str("Linux"),
            OsType::Windows => f.write_str("Windows"),
        }
    }
}
