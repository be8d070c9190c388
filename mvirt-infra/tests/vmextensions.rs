//! VM extension service integration tests.

use std::sync::Arc;

use serde_json::{Map, json};

use mvirt_infra::config::ReconcileConfig;
use mvirt_infra::services::vmextensions::{VmExtension, VmExtensionService, VmExtensionSpec};
use mvirt_infra::test_util::{FakeCall, FakeCloud, MemoryVmExtensionScope};
use mvirt_infra::tracker::ResourceSpec;
use mvirt_infra::types::ProvisioningState;
use mvirt_infra::{CallContext, CloudError, ReconcileStatus, Reconciler};

fn extension(name: &str) -> VmExtensionSpec {
    let mut settings = Map::new();
    settings.insert("commandToExecute".to_string(), json!("bootstrap.sh"));
    let mut protected_settings = Map::new();
    protected_settings.insert("token".to_string(), json!("s3cr3t"));

    VmExtensionSpec {
        name: name.to_string(),
        resource_group: "rg".to_string(),
        vm_name: "vm0".to_string(),
        location: "westeurope".to_string(),
        publisher: "mvirt.Extensions".to_string(),
        extension_type: "CustomScript".to_string(),
        version: "2.1".to_string(),
        settings,
        protected_settings,
    }
}

fn service(
    specs: Vec<VmExtensionSpec>,
) -> (
    FakeCloud<VmExtension>,
    Arc<MemoryVmExtensionScope>,
    VmExtensionService<MemoryVmExtensionScope, FakeCloud<VmExtension>>,
) {
    let cloud = FakeCloud::new();
    let scope = Arc::new(MemoryVmExtensionScope::new(specs));
    let service = VmExtensionService::new(Arc::clone(&scope), cloud.clone(), ReconcileConfig::default());
    (cloud, scope, service)
}

#[tokio::test(start_paused = true)]
async fn test_creates_every_extension() {
    let specs = vec![extension("bootstrap"), extension("monitoring")];
    let (cloud, scope, service) = service(specs.clone());

    service.reconcile(&CallContext::new()).await.unwrap();

    for spec in &specs {
        let ext = cloud.resource(&spec.resource_ref()).unwrap();
        assert_eq!(ext.provisioning_state, Some(ProvisioningState::Succeeded));
        assert!(ext.protected_settings.is_empty());
    }
    assert_eq!(cloud.mutating_calls(), 2);
    assert_eq!(scope.bootstrap_status(), Some(ReconcileStatus::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_matching_extensions_are_left_alone() {
    let (cloud, _scope, service) = service(vec![extension("bootstrap")]);

    service.reconcile(&CallContext::new()).await.unwrap();
    cloud.clear_calls();
    service.reconcile(&CallContext::new()).await.unwrap();

    assert_eq!(cloud.mutating_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pending_extension_reports_pending() {
    let (cloud, scope, service) = service(vec![extension("bootstrap")]);
    cloud.set_complete_after_polls(None);

    let err = service.reconcile(&CallContext::new()).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(scope.operation_states().len(), 1);
    assert!(matches!(
        scope.bootstrap_status(),
        Some(ReconcileStatus::Pending { .. })
    ));

    cloud.complete_pending();
    service.reconcile(&CallContext::new()).await.unwrap();
    assert!(scope.operation_states().is_empty());
    assert_eq!(scope.bootstrap_status(), Some(ReconcileStatus::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_wins_over_transient() {
    let busy = extension("bootstrap");
    let broken = extension("monitoring");
    let (cloud, scope, service) = service(vec![busy.clone(), broken.clone()]);

    let mut existing = busy.to_vm_extension();
    existing.provisioning_state = Some(ProvisioningState::Updating);
    cloud.insert(busy.resource_ref(), existing);
    cloud.fail_next(
        FakeCall::Put,
        CloudError::Api {
            status: 409,
            message: "conflict".into(),
        },
    );

    let err = service.reconcile(&CallContext::new()).await.unwrap_err();

    assert!(!err.is_transient());
    assert!(err.to_string().contains("monitoring"));
    assert!(matches!(
        scope.bootstrap_status(),
        Some(ReconcileStatus::Failed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_delete_is_noop() {
    let (cloud, _scope, service) = service(vec![extension("bootstrap")]);

    service.delete(&CallContext::new()).await.unwrap();

    assert!(cloud.calls().is_empty());
}
