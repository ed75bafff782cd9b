//! Integration tests for pod start/stop sequencing.

mod common;

use std::collections::HashMap;

use hyperpod::daemon::PodStartOptions;
use hyperpod::pod::spec::RestartPolicy;
use hyperpod::pod::status::PodPhase;
use hyperpod::vm::{TtyRequest, VmHandle};
use hyperpod::{HyperpodError, KeepMode, VmEventCode, VmResponse};
use hyperpod_test_utils::TestHarness;

use common::eventually;

#[tokio::test]
async fn test_create_and_start() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(None, TestHarness::spec("web", &["nginx"]), false)
        .await
        .unwrap();

    assert!(pod.id().starts_with("pod-"));
    assert_eq!(pod.with_status(|s| s.phase), PodPhase::Created);
    assert_eq!(pod.with_status(|s| s.containers.len()), 1);
    assert!(h.store.has_pod(pod.id()));
    assert_eq!(h.store.container_records(pod.id()).len(), 1);

    let (code, _cause) = h
        .daemon
        .start_pod(pod.id(), PodStartOptions::default())
        .await
        .unwrap();
    assert_eq!(code, VmEventCode::Ok);
    assert_eq!(pod.with_status(|s| s.phase), PodPhase::Running);
    assert!(pod.is_bound());

    let vm = h.vms.last_vm().unwrap();
    assert_eq!(vm.start_calls(), vec![1]);
}

#[tokio::test]
async fn test_double_start_rejected_and_binding_untouched() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(None, TestHarness::spec("web", &["nginx"]), false)
        .await
        .unwrap();

    h.daemon
        .start_pod(pod.id(), PodStartOptions::default())
        .await
        .unwrap();
    let bound_vm = pod.vm().unwrap().id().to_string();

    let err = h
        .daemon
        .start_pod(pod.id(), PodStartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HyperpodError::AlreadyRunning(_)));

    // The existing binding is untouched and no extra VM was allocated.
    assert_eq!(pod.vm().unwrap().id(), bound_vm);
    assert_eq!(h.vms.allocated_count(), 1);
}

#[tokio::test]
async fn test_start_unknown_pod_is_not_found() {
    let h = TestHarness::new();
    let err = h
        .daemon
        .start_pod("pod-missing", PodStartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HyperpodError::NotFound(_)));
}

#[tokio::test]
async fn test_stop_unbound_pod_is_noop_success() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(None, TestHarness::spec("web", &["nginx"]), false)
        .await
        .unwrap();

    let (code, _) = h.daemon.stop_pod(pod.id(), None).await.unwrap();
    assert_eq!(code, VmEventCode::VmShutdown);
}

#[tokio::test]
async fn test_stop_releases_vm_and_event_settles_phase() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(None, TestHarness::spec("web", &["nginx"]), false)
        .await
        .unwrap();
    h.daemon
        .start_pod(pod.id(), PodStartOptions::default())
        .await
        .unwrap();
    let vm = h.vms.last_vm().unwrap();

    let (code, _) = h.daemon.stop_pod(pod.id(), None).await.unwrap();
    assert_eq!(code, VmEventCode::VmShutdown);
    assert!(!pod.is_bound());
    assert_eq!(h.vms.removed(), vec![vm.id().to_string()]);

    // The hypervisor reports the shutdown asynchronously; the state machine
    // settles the terminal phase.
    vm.emit(VmResponse::event(VmEventCode::VmShutdown));
    assert!(
        eventually(|| pod.with_status(|s| s.phase) == PodPhase::Succeeded).await,
        "phase should settle to succeeded"
    );
}

#[tokio::test]
async fn test_stop_forces_kubernetes_restart_policy_to_never() {
    let h = TestHarness::new();
    let spec = TestHarness::kubernetes_spec("kube", &["app"], RestartPolicy::Always);
    let pod = h.daemon.create_pod(None, spec, false).await.unwrap();
    h.daemon
        .start_pod(pod.id(), PodStartOptions::default())
        .await
        .unwrap();

    h.daemon.stop_pod(pod.id(), None).await.unwrap();
    assert_eq!(
        pod.with_status(|s| s.restart_policy),
        RestartPolicy::Never
    );
}

#[tokio::test]
async fn test_start_failure_tears_down_owned_vm() {
    let h = TestHarness::new();
    let mut spec = TestHarness::spec("web", &["nginx"]);
    spec.log_config.driver = "json-file".into();
    spec.log_config
        .options
        .insert("bogus-option".into(), "1".into());
    let pod = h.daemon.create_pod(None, spec, false).await.unwrap();

    let err = h
        .daemon
        .start_pod(pod.id(), PodStartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HyperpodError::LogConfig(_)));

    // The VM allocated by this call is rolled back and the pod is unbound.
    assert!(!pod.is_bound());
    assert_eq!(h.vms.killed().len(), 1);
    assert_eq!(pod.with_status(|s| s.phase), PodPhase::Created);
}

#[tokio::test]
async fn test_start_failure_keeps_caller_supplied_vm() {
    let h = TestHarness::new();
    let mut spec = TestHarness::spec("web", &["nginx"]);
    spec.log_config.driver = "syslog".into(); // not installed
    let pod = h.daemon.create_pod(None, spec, false).await.unwrap();

    let err = h
        .daemon
        .start_pod(
            pod.id(),
            PodStartOptions {
                vm_id: Some("vm-reused".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HyperpodError::LogConfig(_)));

    // A reused VM is never torn down by the failing start.
    assert!(h.vms.killed().is_empty());
    assert!(h.vms.vm("vm-reused").is_some());
}

#[tokio::test]
async fn test_start_ack_without_payload_is_protocol_violation() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(None, TestHarness::spec("web", &["nginx"]), false)
        .await
        .unwrap();

    let vm = h.vms.preallocate("vm-x", KeepMode::None);
    vm.set_start_response(VmResponse::ok(None));

    let err = h
        .daemon
        .start_pod(
            pod.id(),
            PodStartOptions {
                vm_id: Some("vm-x".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HyperpodError::Protocol(_)));
}

#[tokio::test]
async fn test_tty_attached_to_first_container() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(None, TestHarness::spec("web", &["nginx", "sidekick"]), false)
        .await
        .unwrap();
    let first_container = pod.with_status(|s| s.containers[0].id.clone());

    h.daemon
        .start_pod(
            pod.id(),
            PodStartOptions {
                tty: Some(TtyRequest {
                    client_tag: "client-1".into(),
                    stdin: None,
                    stdout: None,
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let vm = h.vms.last_vm().unwrap();
    assert_eq!(
        vm.attached(),
        vec![("client-1".to_string(), first_container)]
    );
}

#[tokio::test]
async fn test_service_discovery_pod_excludes_sidecar_from_tty() {
    let h = TestHarness::new();
    let mut spec = TestHarness::spec("svc", &["app"]);
    spec.services.push(hyperpod::pod::spec::ServiceSpec {
        virtual_ip: "10.254.0.1".into(),
        port: 80,
        backends: vec![hyperpod::pod::spec::ServiceBackend {
            host: "192.168.1.10".into(),
            port: 8080,
        }],
    });
    let pod = h.daemon.create_pod(None, spec, false).await.unwrap();

    // Container 0 is the proxy sidecar; the client terminal must land on
    // the first user container.
    let app_container = pod.with_status(|s| s.containers[1].id.clone());

    h.daemon
        .start_pod(
            pod.id(),
            PodStartOptions {
                tty: Some(TtyRequest {
                    client_tag: "client-1".into(),
                    stdin: None,
                    stdout: None,
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let vm = h.vms.last_vm().unwrap();
    assert_eq!(vm.attached(), vec![("client-1".to_string(), app_container)]);
}

#[tokio::test]
async fn test_set_labels_requires_override() {
    let h = TestHarness::new();
    let mut spec = TestHarness::spec("web", &["nginx"]);
    spec.labels.insert("tier".into(), "front".into());
    let pod = h.daemon.create_pod(None, spec, false).await.unwrap();

    let mut update = HashMap::new();
    update.insert("tier".into(), "back".into());

    let err = h
        .daemon
        .set_pod_labels(pod.id(), false, &update)
        .unwrap_err();
    assert!(matches!(err, HyperpodError::Validation(_)));
    assert_eq!(pod.spec().labels["tier"], "front");

    h.daemon.set_pod_labels(pod.id(), true, &update).unwrap();
    assert_eq!(pod.spec().labels["tier"], "back");
}

#[tokio::test]
async fn test_lookup_by_name() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(None, TestHarness::spec("frontend", &["nginx"]), false)
        .await
        .unwrap();

    let found = h.daemon.get_pod("frontend").unwrap().unwrap();
    assert_eq!(found.id(), pod.id());

    let infos = h.daemon.list_pods().unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].name, "frontend");
}
