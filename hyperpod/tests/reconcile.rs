//! Integration tests for container reconciliation: reuse, rollback, and
//! implicit image volumes.

use hyperpod::pod::reconcile;
use hyperpod_test_utils::TestHarness;

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let h = TestHarness::new();
    let pod = h
        .daemon
        .create_pod(
            Some("pod-idem".into()),
            TestHarness::spec("web", &["a", "b"]),
            false,
        )
        .await
        .unwrap();
    assert_eq!(h.engine.count(), 2);
    let first_ids = h.engine.created_ids();

    // Re-running reconciliation over the resolved spec must reuse every
    // existing container and create none.
    let rec = reconcile::reconcile(h.engine.as_ref(), h.storage.as_ref(), &pod.spec())
        .await
        .unwrap();

    assert_eq!(h.engine.count(), 2);
    assert_eq!(h.engine.created_ids(), first_ids);
    let reconciled_ids: Vec<String> = rec
        .start_infos
        .iter()
        .map(|i| i.container_id.clone())
        .collect();
    assert_eq!(reconciled_ids, first_ids);
}

#[tokio::test]
async fn test_create_failure_rolls_back_only_this_call() {
    let h = TestHarness::new();

    // A survivor from a prior run of the same pod.
    h.daemon
        .create_pod(Some("pod-roll".into()), TestHarness::spec("web", &["c0"]), false)
        .await
        .unwrap();
    let survivor = h.engine.created_ids()[0].clone();
    h.daemon.registry().remove("pod-roll").unwrap();

    // Third container fails; the second was created by this call and must
    // be rolled back, the survivor must not.
    h.engine.fail_create("pod-roll-c2");
    let err = h
        .daemon
        .create_pod(
            Some("pod-roll".into()),
            TestHarness::spec("web", &["c0", "c1", "c2"]),
            false,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("injected create failure"));

    assert!(h.engine.contains(&survivor), "reused container was removed");
    assert_eq!(h.engine.count(), 1);
    assert_eq!(h.engine.removed_ids().len(), 1);

    // The failed create left no pod behind.
    assert!(h.daemon.registry().get("pod-roll").unwrap().is_none());
}

#[tokio::test]
async fn test_rollback_removes_in_reverse_order() {
    let h = TestHarness::new();
    h.engine.fail_create("pod-rev-c2");

    h.daemon
        .create_pod(
            Some("pod-rev".into()),
            TestHarness::spec("web", &["c0", "c1", "c2"]),
            false,
        )
        .await
        .unwrap_err();

    let created = h.engine.created_ids();
    assert_eq!(created.len(), 2);
    let mut expected = created.clone();
    expected.reverse();
    assert_eq!(h.engine.removed_ids(), expected);
    assert_eq!(h.engine.count(), 0);
}

#[tokio::test]
async fn test_image_volumes_are_synthesized_and_provisioned() {
    let h = TestHarness::new();
    h.engine.set_image_volumes("busybox:latest", &["/data"]);

    let pod = h
        .daemon
        .create_pod(Some("pod-vol".into()), TestHarness::spec("web", &["a"]), false)
        .await
        .unwrap();

    let spec = pod.spec();
    let synthesized = spec
        .volumes
        .iter()
        .find(|v| v.name.ends_with("_data"))
        .expect("implicit volume for /data");
    // The provisioner populated the source and the record landed in the
    // store.
    assert!(!synthesized.source.is_empty());
    assert_eq!(synthesized.driver, "vfs");
    assert!(
        h.store
            .volume_records("pod-vol")
            .iter()
            .any(|(name, _)| name == &synthesized.name)
    );
    assert!(
        spec.containers[0]
            .volumes
            .iter()
            .any(|r| r.path == "/data" && !r.read_only)
    );
}

#[tokio::test]
async fn test_spec_env_wins_over_image_env() {
    let h = TestHarness::new();
    h.engine
        .set_image_env("busybox:latest", &["PATH=/usr/bin", "LANG=C"]);

    let mut spec = TestHarness::spec("web", &["a"]);
    spec.containers[0].envs.push(hyperpod::pod::spec::EnvVar {
        name: "LANG".into(),
        value: "en_US.UTF-8".into(),
    });
    let pod = h
        .daemon
        .create_pod(Some("pod-env".into()), spec, false)
        .await
        .unwrap();

    let rec = reconcile::reconcile(h.engine.as_ref(), h.storage.as_ref(), &pod.spec())
        .await
        .unwrap();
    let envs = &rec.start_infos[0].envs;
    assert_eq!(envs.get("PATH").map(String::as_str), Some("/usr/bin"));
    assert_eq!(envs.get("LANG").map(String::as_str), Some("en_US.UTF-8"));
}

#[tokio::test]
async fn test_volume_sources_are_never_recomputed() {
    let h = TestHarness::new();
    let mut spec = TestHarness::spec("web", &["a"]);
    spec.volumes.push(hyperpod::pod::spec::VolumeSpec {
        name: "data".into(),
        ..Default::default()
    });
    spec.containers[0]
        .volumes
        .push(hyperpod::pod::spec::VolumeRef {
            volume: "data".into(),
            path: "/data".into(),
            read_only: false,
        });

    let pod = h
        .daemon
        .create_pod(Some("pod-src".into()), spec, false)
        .await
        .unwrap();
    let source = pod
        .spec()
        .volumes
        .iter()
        .find(|v| v.name == "data")
        .unwrap()
        .source
        .clone();
    assert!(!source.is_empty());

    // Only one creation was recorded for the volume, and a second pass over
    // the resolved spec does not allocate again.
    let creations = h
        .storage
        .created_volumes()
        .iter()
        .filter(|(_, name)| name == "data")
        .count();
    assert_eq!(creations, 1);
}
