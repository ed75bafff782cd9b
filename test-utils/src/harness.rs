//! Assembled daemon over fakes, with a temporary home directory.

use std::sync::Arc;

use hyperpod::daemon::{Collaborators, Daemon, DaemonOptions};
use hyperpod::pod::spec::{ContainerSpec, PodSpec, PodType, RestartPolicy};
use hyperpod::storage::StorageBackend;
use tempfile::TempDir;

use crate::{FakeEngine, FakeStorage, FakeVmProvider, MemoryStore};

/// A daemon wired to fakes; drop tears the temporary home down.
pub struct TestHarness {
    pub daemon: Daemon,
    pub engine: Arc<FakeEngine>,
    pub storage: Arc<FakeStorage>,
    pub vms: Arc<FakeVmProvider>,
    pub store: Arc<MemoryStore>,
    pub home: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_vms(FakeVmProvider::new())
    }

    pub fn with_vms(vms: FakeVmProvider) -> Self {
        let home = TempDir::new().expect("failed to create test home");
        let storage = Arc::new(FakeStorage::new(home.path().join("storage")));
        let engine = Arc::new(FakeEngine::new(storage.root_path().to_path_buf()));
        let vms = Arc::new(vms);
        let store = Arc::new(MemoryStore::new());

        let options = DaemonOptions {
            home_dir: home.path().to_path_buf(),
            ..Default::default()
        };
        let daemon = Daemon::new(
            options,
            Collaborators {
                engine: engine.clone(),
                storage: storage.clone(),
                vms: vms.clone(),
                store: store.clone(),
            },
        )
        .expect("failed to create daemon");

        Self {
            daemon,
            engine,
            storage,
            vms,
            store,
            home,
        }
    }

    /// Minimal valid spec with the given container names.
    pub fn spec(name: &str, containers: &[&str]) -> PodSpec {
        PodSpec {
            name: name.to_string(),
            containers: containers
                .iter()
                .map(|c| ContainerSpec {
                    name: c.to_string(),
                    image: "busybox:latest".to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Kubernetes-typed spec with a restart policy.
    pub fn kubernetes_spec(name: &str, containers: &[&str], policy: RestartPolicy) -> PodSpec {
        let mut spec = Self::spec(name, containers);
        spec.pod_type = PodType::Kubernetes;
        spec.restart_policy = policy;
        spec
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
