//! VM extension service - installs bootstrap extensions on a virtual machine.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::{AsyncClient, Headers, ResourceApi};
use crate::config::ReconcileConfig;
use crate::context::CallContext;
use crate::diff::{Compare, Diff, Normalize};
use crate::error::{ReconcileError, Result};
use crate::operation::AsyncStatusUpdater;
use crate::orchestrator::ReconcileStatus;
use crate::reconciler::Reconciler;
use crate::tracker::{self, ResourceSpec};
use crate::types::{ProvisioningState, Provisioned, ResourceRef};

pub const SERVICE_NAME: &str = "vmextensions";

const KIND: &str = "VM extension";

/// Desired extension on one virtual machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmExtensionSpec {
    pub name: String,
    pub resource_group: String,
    pub vm_name: String,
    pub location: String,
    pub publisher: String,
    pub extension_type: String,
    pub version: String,
    pub settings: Map<String, Value>,
    pub protected_settings: Map<String, Value>,
}

impl VmExtensionSpec {
    pub fn to_vm_extension(&self) -> VmExtension {
        VmExtension {
            name: Some(self.name.clone()),
            location: Some(self.location.clone()),
            publisher: Some(self.publisher.clone()),
            extension_type: Some(self.extension_type.clone()),
            type_handler_version: Some(self.version.clone()),
            settings: self.settings.clone(),
            protected_settings: self.protected_settings.clone(),
            ..Default::default()
        }
    }
}

impl ResourceSpec<VmExtension> for VmExtensionSpec {
    fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.resource_group, &self.vm_name, &self.name)
    }

    fn parameters(&self, existing: Option<&VmExtension>) -> Result<Option<VmExtension>> {
        let desired = self.to_vm_extension();
        if let Some(existing) = existing {
            let diff = desired.normalize().diff(&existing.normalize());
            if diff.is_empty() {
                return Ok(None);
            }
            debug!("Update required (+new -old):\n{}", diff);
        }
        Ok(Some(desired))
    }
}

/// VM extension as the cloud API represents it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmExtension {
    pub id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub publisher: Option<String>,
    #[serde(rename = "type")]
    pub extension_type: Option<String>,
    pub type_handler_version: Option<String>,
    pub settings: Map<String, Value>,
    /// Write-only; never returned by Get.
    pub protected_settings: Map<String, Value>,
    pub provisioning_state: Option<ProvisioningState>,
}

impl Provisioned for VmExtension {
    fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.provisioning_state
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmExtensionProjection {
    pub publisher: Option<String>,
    pub extension_type: Option<String>,
    pub type_handler_version: Option<String>,
    pub settings: Map<String, Value>,
}

impl Normalize for VmExtension {
    type Projection = VmExtensionProjection;

    fn normalize(&self) -> VmExtensionProjection {
        VmExtensionProjection {
            publisher: self.publisher.clone(),
            extension_type: self.extension_type.clone(),
            type_handler_version: self.type_handler_version.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl Compare for VmExtensionProjection {
    fn diff(&self, existing: &Self) -> Diff {
        let VmExtensionProjection {
            publisher,
            extension_type,
            type_handler_version,
            settings,
        } = self;

        Diff::new()
            .field("publisher", publisher, &existing.publisher)
            .field("type", extension_type, &existing.extension_type)
            .field(
                "typeHandlerVersion",
                type_handler_version,
                &existing.type_handler_version,
            )
            .field("settings", settings, &existing.settings)
    }
}

/// Owner-side view of a machine that carries extensions.
pub trait VmExtensionScope: AsyncStatusUpdater {
    fn vm_extension_specs(&self) -> Vec<VmExtensionSpec>;

    /// Record how bootstrapping through extensions is going.
    fn set_bootstrap_status(&self, status: ReconcileStatus);
}

pub struct VmExtensionService<S, A> {
    scope: Arc<S>,
    client: AsyncClient<A>,
}

impl<S, A> VmExtensionService<S, A>
where
    S: VmExtensionScope,
    A: ResourceApi<Resource = VmExtension>,
{
    pub fn new(scope: Arc<S>, api: A, config: ReconcileConfig) -> Self {
        Self {
            scope,
            client: AsyncClient::new(api, SERVICE_NAME, config),
        }
    }

    pub fn scope(&self) -> &Arc<S> {
        &self.scope
    }
}

#[async_trait]
impl<S, A> Reconciler for VmExtensionService<S, A>
where
    S: VmExtensionScope + 'static,
    A: ResourceApi<Resource = VmExtension> + 'static,
{
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self, ctx: &CallContext) -> Result<()> {
        let headers = Headers::new();
        let mut result: Result<()> = Ok(());

        for spec in self.scope.vm_extension_specs() {
            let outcome = tracker::create_resource(
                ctx,
                &self.client,
                self.scope.as_ref(),
                KIND,
                &spec,
                &headers,
            )
            .await;

            if let Err(e) = outcome {
                warn!("{} {} not reconciled: {}", KIND, spec.name, e);
                if takes_precedence(&result, &e) {
                    result = Err(e);
                }
            }
        }

        self.scope
            .set_bootstrap_status(ReconcileStatus::from_result(&result));
        result
    }

    async fn delete(&self, _ctx: &CallContext) -> Result<()> {
        // Extensions go away with their virtual machine.
        Ok(())
    }
}

/// The first error wins unless a later one is not transient.
fn takes_precedence(current: &Result<()>, next: &ReconcileError) -> bool {
    match current {
        Ok(()) => true,
        Err(current) => current.is_transient() && !next.is_transient(),
    }
}
