//! Agent pool service integration tests against the in-memory cloud.

mod common;

use std::time::Duration;

use common::{PoolHarness, pool_spec, settled_pool};
use mvirt_infra::annotations::{CUSTOM_HEADER_PREFIX, REPLICAS_MANAGED_BY_AUTOSCALER};
use mvirt_infra::diff::Normalize;
use mvirt_infra::test_util::{FakeCall, RecordedCall};
use mvirt_infra::types::{OsType, ProvisioningState};
use mvirt_infra::{CallContext, CloudError, ReconcileError, Reconciler};

// =============================================================================
// Create / update
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_issues_one_put_matching_desired() {
    let spec = pool_spec();
    let h = PoolHarness::new(spec.clone());

    h.service.reconcile(&CallContext::new()).await.unwrap();

    let puts = h.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].normalize(), spec.to_agent_pool().normalize());

    let status = h.scope.status();
    assert!(status.ready);
    assert_eq!(status.replicas, 3);
    assert_eq!(status.provider_ids.len(), 3);
    assert!(status.long_running_operation_states.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_pass_is_idempotent() {
    let h = PoolHarness::new(pool_spec());
    let ctx = CallContext::new();

    h.service.reconcile(&ctx).await.unwrap();
    h.cloud.clear_calls();
    h.service.reconcile(&ctx).await.unwrap();

    assert_eq!(h.cloud.mutating_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_non_terminal_state_blocks_mutation() {
    let mut spec = pool_spec();
    let h = PoolHarness::new(spec.clone());
    let mut existing = settled_pool(&spec);
    existing.provisioning_state = Some(ProvisioningState::Updating);
    h.cloud.insert(h.id(), existing);

    spec.replicas = 5;
    h.scope.set_spec(spec);
    let err = h.service.reconcile(&CallContext::new()).await.unwrap_err();

    assert_eq!(err.retry_after(), Some(h.config.retry_after));
    assert!(err.to_string().contains("Actual state: Updating"));
    assert_eq!(h.cloud.mutating_calls(), 0);
    assert!(!h.scope.status().ready);
}

#[tokio::test(start_paused = true)]
async fn test_unmodelled_busy_state_blocks_mutation() {
    let mut spec = pool_spec();
    let h = PoolHarness::new(spec.clone());
    let mut existing = settled_pool(&spec);
    existing.provisioning_state = serde_json::from_str("\"Upgrading\"").unwrap();
    assert_eq!(existing.provisioning_state, Some(ProvisioningState::Other));
    h.cloud.insert(h.id(), existing);

    spec.replicas = 5;
    h.scope.set_spec(spec);
    let err = h.service.reconcile(&CallContext::new()).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(err.retry_after(), Some(h.config.retry_after));
    assert_eq!(h.cloud.mutating_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cloud_defaults_do_not_trigger_updates() {
    let mut spec = pool_spec();
    spec.os_type = None;
    spec.version = None;
    let h = PoolHarness::new(spec.clone());
    let mut existing = settled_pool(&spec);
    existing.os_type = Some(OsType::Linux);
    existing.orchestrator_version = Some("1.30.2".to_string());
    h.cloud.insert(h.id(), existing);

    for _ in 0..3 {
        h.service.reconcile(&CallContext::new()).await.unwrap();
    }

    assert!(h.puts().is_empty());
    assert!(h.scope.status().ready);
}

#[tokio::test(start_paused = true)]
async fn test_count_change_without_autoscaling_updates() {
    let mut spec = pool_spec();
    let h = PoolHarness::new(spec.clone());
    h.cloud.insert(h.id(), settled_pool(&spec));

    spec.replicas = 5;
    h.scope.set_spec(spec);
    h.service.reconcile(&CallContext::new()).await.unwrap();

    let puts = h.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].count, Some(5));
    assert_eq!(h.scope.status().replicas, 5);
    assert_eq!(h.scope.machine_pool_replicas(), None);
}

// =============================================================================
// Autoscaling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_autoscaler_owns_replica_count() {
    let mut spec = pool_spec();
    spec.enable_auto_scaling = true;
    spec.min_count = Some(1);
    spec.max_count = Some(10);
    let h = PoolHarness::new(spec.clone());
    h.cloud.insert(h.id(), settled_pool(&spec));

    spec.replicas = 5;
    h.scope.set_spec(spec);
    h.service.reconcile(&CallContext::new()).await.unwrap();

    assert_eq!(h.cloud.mutating_calls(), 0);
    assert_eq!(h.scope.machine_pool_replicas(), Some(3));
    assert_eq!(h.scope.status().replicas, 3);
    assert_eq!(
        h.scope.annotation_updates(),
        vec![(REPLICAS_MANAGED_BY_AUTOSCALER.to_string(), "true".to_string())]
    );

    // Ownership is already recorded; nothing changes on the next pass.
    h.service.reconcile(&CallContext::new()).await.unwrap();
    assert_eq!(h.scope.annotation_updates().len(), 1);
    assert_eq!(h.cloud.mutating_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_autoscaling_without_observed_count_keeps_ownership() {
    let mut spec = pool_spec();
    spec.enable_auto_scaling = true;
    spec.min_count = Some(1);
    spec.max_count = Some(10);
    let h = PoolHarness::new(spec.clone());
    let mut existing = settled_pool(&spec);
    existing.count = None;
    h.cloud.insert(h.id(), existing);

    h.service.reconcile(&CallContext::new()).await.unwrap();

    assert!(h.scope.annotation_updates().is_empty());
    assert_eq!(h.scope.machine_pool_replicas(), None);
    let puts = h.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].count, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_disabling_autoscaling_flips_annotation_once() {
    let spec = pool_spec();
    let h = PoolHarness::new(spec.clone());
    h.cloud.insert(h.id(), settled_pool(&spec));
    h.scope
        .seed_machine_pool_annotation(REPLICAS_MANAGED_BY_AUTOSCALER, "true");

    h.service.reconcile(&CallContext::new()).await.unwrap();
    h.service.reconcile(&CallContext::new()).await.unwrap();

    assert_eq!(
        h.scope.annotation_updates(),
        vec![(REPLICAS_MANAGED_BY_AUTOSCALER.to_string(), "false".to_string())]
    );
}

// =============================================================================
// Headers and errors
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_custom_headers_are_forwarded() {
    let h = PoolHarness::new(pool_spec());
    h.scope.set_annotation(
        &format!("{}AKSHTTPCustomFeatures", CUSTOM_HEADER_PREFIX),
        "Microsoft.ContainerService/Foo",
    );
    h.scope.set_annotation("unrelated", "x");

    h.service.reconcile(&CallContext::new()).await.unwrap();

    let headers = h
        .cloud
        .calls()
        .into_iter()
        .find_map(|call| match call {
            RecordedCall::CreateOrUpdate { headers, .. } => Some(headers),
            _ => None,
        })
        .unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(
        headers.get("AKSHTTPCustomFeatures").map(String::as_str),
        Some("Microsoft.ContainerService/Foo")
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_dependency_is_transient() {
    let h = PoolHarness::new(pool_spec());
    h.cloud
        .fail_next(FakeCall::Put, CloudError::NotFound("managed cluster".into()));

    let err = h.service.reconcile(&CallContext::new()).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(err.retry_after(), Some(h.config.retry_after));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_put_is_terminal() {
    let h = PoolHarness::new(pool_spec());
    h.cloud.fail_next(
        FakeCall::Put,
        CloudError::Api {
            status: 400,
            message: "invalid vm size".into(),
        },
    );

    let err = h.service.reconcile(&CallContext::new()).await.unwrap_err();

    match err {
        ReconcileError::Terminal { context, .. } => {
            assert_eq!(context, "failed to create agent pool rg/cluster/pool0")
        }
        other => panic!("expected terminal, got {other:?}"),
    }
    assert!(h.scope.status().long_running_operation_states.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_terminal() {
    let h = PoolHarness::new(pool_spec());
    h.cloud.set_latency(Duration::from_secs(10));

    let ctx = CallContext::with_timeout(Duration::from_secs(1));
    let err = h.service.reconcile(&ctx).await.unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Terminal {
            source: CloudError::DeadlineExceeded,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_pass_is_terminal() {
    let h = PoolHarness::new(pool_spec());
    let ctx = CallContext::new();
    ctx.cancel();

    let err = h.service.reconcile(&ctx).await.unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Terminal {
            source: CloudError::Cancelled,
            ..
        }
    ));
    assert!(h.cloud.calls().is_empty());
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_delete_absent_pool_succeeds() {
    let h = PoolHarness::new(pool_spec());
    h.service.delete(&CallContext::new()).await.unwrap();
    assert!(h.scope.status().long_running_operation_states.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_existing_pool() {
    let spec = pool_spec();
    let h = PoolHarness::new(spec.clone());
    h.cloud.insert(h.id(), settled_pool(&spec));

    h.service.delete(&CallContext::new()).await.unwrap();

    assert!(h.cloud.resource(&h.id()).is_none());
    assert_eq!(h.cloud.mutating_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_forwards_custom_headers() {
    let spec = pool_spec();
    let h = PoolHarness::new(spec.clone());
    h.cloud.insert(h.id(), settled_pool(&spec));
    h.scope.set_annotation(
        &format!("{}AKSHTTPCustomFeatures", CUSTOM_HEADER_PREFIX),
        "Microsoft.ContainerService/Foo",
    );
    h.scope.set_annotation("unrelated", "x");

    h.service.delete(&CallContext::new()).await.unwrap();

    let headers = h
        .cloud
        .calls()
        .into_iter()
        .find_map(|call| match call {
            RecordedCall::Delete { headers, .. } => Some(headers),
            _ => None,
        })
        .unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(
        headers.get("AKSHTTPCustomFeatures").map(String::as_str),
        Some("Microsoft.ContainerService/Foo")
    );
}
