//! Agent pool service - converges one managed-cluster node pool.

mod spec;

pub use spec::{AgentPool, AgentPoolProjection, AgentPoolSpec};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::annotations::{self, REPLICAS_MANAGED_BY_AUTOSCALER, ReplicaOwner};
use crate::classify::{self, Call, ErrorContext};
use crate::client::{AsyncClient, ResourceApi};
use crate::config::ReconcileConfig;
use crate::context::CallContext;
use crate::diff::{Compare, Normalize};
use crate::error::Result;
use crate::operation::AsyncStatusUpdater;
use crate::reconciler::Reconciler;
use crate::tracker;
use crate::types::ProvisioningState;

pub const SERVICE_NAME: &str = "agentpools";

const KIND: &str = "agent pool";

/// Owner-side view of a managed machine pool.
pub trait ManagedMachinePoolScope: AsyncStatusUpdater {
    fn agent_pool_spec(&self) -> AgentPoolSpec;

    /// Annotations of the owning object; custom headers are taken from here.
    fn agent_pool_annotations(&self) -> HashMap<String, String>;

    fn set_provider_id_list(&self, provider_ids: Vec<String>);
    fn set_replicas(&self, replicas: i32);
    fn set_ready(&self, ready: bool);

    fn machine_pool_annotation(&self, key: &str) -> Option<String>;
    fn update_machine_pool_annotation(&self, key: &str, value: &str);

    /// Write the replica count back to the owning machine pool.
    fn update_machine_pool_replicas(&self, replicas: i32);
}

/// Reconciles an agent pool against its scope.
pub struct AgentPoolService<S, A> {
    scope: Arc<S>,
    client: AsyncClient<A>,
}

impl<S, A> AgentPoolService<S, A>
where
    S: ManagedMachinePoolScope,
    A: ResourceApi<Resource = AgentPool>,
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

    async fn reconcile_pool(&self, ctx: &CallContext) -> Result<()> {
        let spec = self.scope.agent_pool_spec();
        let id = spec.resource_ref();
        let target = ErrorContext::new(KIND, &id);
        let headers = annotations::custom_headers(&self.scope.agent_pool_annotations());
        let retry_after = self.client.config().retry_after;

        // A finished PUT falls through so the fresh Get below is published.
        tracker::resume(ctx, &self.client, self.scope.as_ref(), target).await?;

        let desired = spec.to_agent_pool();
        let Some(existing) = tracker::fetch(ctx, &self.client, target).await? else {
            let created = tracker::submit_put(
                ctx,
                &self.client,
                self.scope.as_ref(),
                target,
                desired,
                &headers,
                Call::Create,
            )
            .await?;
            info!("Successfully created {} {}", KIND, id);
            self.publish(&created);
            return Ok(());
        };

        classify::ensure_terminal(existing.provisioning_state, target, retry_after)?;

        let mut normalized = desired.normalize();
        self.sync_autoscaler_replicas(&spec, &existing, &mut normalized.count);

        let diff = normalized.diff(&existing.normalize());
        if diff.is_empty() {
            debug!("Normalized and desired {} matched, no update needed", KIND);
            self.publish(&existing);
            return Ok(());
        }

        debug!("Update required (+new -old):\n{}", diff);
        let updated = tracker::submit_put(
            ctx,
            &self.client,
            self.scope.as_ref(),
            target,
            desired,
            &headers,
            Call::Update,
        )
        .await?;
        info!("Successfully updated {} {}", KIND, id);
        self.publish(&updated);
        Ok(())
    }

    /// Hand replica ownership to or from the autoscaler.
    ///
    /// While autoscaling is enabled the observed count wins and is written
    /// back to the owner; `count` is overridden so it never causes a diff.
    fn sync_autoscaler_replicas(
        &self,
        spec: &AgentPoolSpec,
        existing: &AgentPool,
        count: &mut Option<i32>,
    ) {
        let owner = ReplicaOwner::from_annotation(
            self.scope
                .machine_pool_annotation(REPLICAS_MANAGED_BY_AUTOSCALER)
                .as_deref(),
        );

        if !spec.enable_auto_scaling {
            if owner == ReplicaOwner::Autoscaler {
                info!("Autoscaling disabled, returning replica ownership to the machine pool");
                self.scope.update_machine_pool_annotation(
                    REPLICAS_MANAGED_BY_AUTOSCALER,
                    ReplicaOwner::Reconciler.annotation_value(),
                );
            }
            return;
        }

        let Some(observed) = existing.count else {
            return;
        };
        if owner != ReplicaOwner::Autoscaler {
            info!("Autoscaling enabled, replica count is now owned by the autoscaler");
            self.scope.update_machine_pool_annotation(
                REPLICAS_MANAGED_BY_AUTOSCALER,
                ReplicaOwner::Autoscaler.annotation_value(),
            );
        }
        if spec.replicas != observed {
            debug!(
                "Autoscaler moved {} from {} to {} replicas",
                spec.name, spec.replicas, observed
            );
            self.scope.update_machine_pool_replicas(observed);
        }
        *count = Some(observed);
    }

    fn publish(&self, pool: &AgentPool) {
        let replicas = pool.observed_replicas();
        self.scope.set_provider_id_list(pool.provider_ids.clone());
        self.scope.set_replicas(replicas);
        self.scope.set_ready(
            pool.provisioning_state
                .is_none_or(|state| state == ProvisioningState::Succeeded),
        );
    }
}

#[async_trait]
impl<S, A> Reconciler for AgentPoolService<S, A>
where
    S: ManagedMachinePoolScope + 'static,
    A: ResourceApi<Resource = AgentPool> + 'static,
{
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self, ctx: &CallContext) -> Result<()> {
        let result = self.reconcile_pool(ctx).await;
        if let Err(e) = &result
            && e.is_transient()
        {
            self.scope.set_ready(false);
        }
        result
    }

    async fn delete(&self, ctx: &CallContext) -> Result<()> {
        let spec = self.scope.agent_pool_spec();
        let headers = annotations::custom_headers(&self.scope.agent_pool_annotations());
        tracker::delete_resource(
            ctx,
            &self.client,
            self.scope.as_ref(),
            KIND,
            &spec.resource_ref(),
            &headers,
        )
        .await
    }
}
