//! The daemon: collaborator wiring and the public pod surface.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use hyperpod_shared::vm::{KeepMode, VmEventCode};
use rand::Rng;

use crate::daemon::layout::DaemonLayout;
use crate::daemon::options::DaemonOptions;
use crate::daemon::registry::PodRegistry;
use crate::engine::ContainerEngine;
use crate::init_logging_for;
use crate::logdriver::LogDriverRegistry;
use crate::pod::Pod;
use crate::pod::lifecycle::{self, StartConfig};
use crate::pod::spec::PodSpec;
use crate::pod::status::PodPhase;
use crate::storage::StorageBackend;
use crate::store::PodStore;
use crate::vm::{TtyRequest, VmProvider, tty_pair};

/// External subsystems the daemon drives.
pub struct Collaborators {
    pub engine: Arc<dyn ContainerEngine>,
    pub storage: Arc<dyn StorageBackend>,
    pub vms: Arc<dyn VmProvider>,
    pub store: Arc<dyn PodStore>,
}

/// The pod daemon.
///
/// **Cloning**: cheaply cloneable via `Arc`; all clones share the same
/// state. The event loops hold a clone so asynchronous VM events reach the
/// same registry and collaborators as the public API.
#[derive(Clone)]
pub struct Daemon {
    inner: Arc<DaemonInner>,
}

struct DaemonInner {
    registry: PodRegistry,
    engine: Arc<dyn ContainerEngine>,
    storage: Arc<dyn StorageBackend>,
    vms: Arc<dyn VmProvider>,
    store: Arc<dyn PodStore>,
    log_drivers: LogDriverRegistry,
    layout: DaemonLayout,
    options: DaemonOptions,
}

/// Summary of one registered pod.
#[derive(Debug, Clone)]
pub struct PodInfo {
    pub id: String,
    pub name: String,
    pub phase: PodPhase,
    pub vm_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Options for [`Daemon::start_pod`].
#[derive(Default)]
pub struct PodStartOptions {
    /// Reuse this VM instead of allocating a fresh one.
    pub vm_id: Option<String>,
    pub keep: KeepMode,
    /// Interactive client streams; the call blocks until the attached
    /// session finishes.
    pub tty: Option<TtyRequest>,
}

impl Daemon {
    /// Create a daemon over the given collaborators.
    ///
    /// All setup (directory skeleton, logging) completes before returning;
    /// there is no partially-initialized daemon.
    pub fn new(options: DaemonOptions, collaborators: Collaborators) -> HyperpodResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(HyperpodError::Validation(format!(
                "home_dir must be an absolute path, got: {}",
                options.home_dir.display()
            )));
        }

        let layout = DaemonLayout::new(options.home_dir.clone());
        layout.prepare()?;
        init_logging_for(&layout)?;

        let inner = Arc::new(DaemonInner {
            registry: PodRegistry::new(),
            engine: collaborators.engine,
            storage: collaborators.storage,
            vms: collaborators.vms,
            store: collaborators.store,
            log_drivers: LogDriverRegistry::with_defaults(),
            layout,
            options,
        });

        tracing::debug!("initialized daemon");
        Ok(Self { inner })
    }

    pub(crate) fn engine(&self) -> &dyn ContainerEngine {
        self.inner.engine.as_ref()
    }

    pub(crate) fn storage(&self) -> &dyn StorageBackend {
        self.inner.storage.as_ref()
    }

    pub(crate) fn vms(&self) -> &dyn VmProvider {
        self.inner.vms.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn PodStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn log_drivers(&self) -> &LogDriverRegistry {
        &self.inner.log_drivers
    }

    pub fn registry(&self) -> &PodRegistry {
        &self.inner.registry
    }

    pub fn options(&self) -> &DaemonOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &DaemonLayout {
        &self.inner.layout
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    /// Create a pod from a spec and register it.
    ///
    /// A mid-pipeline failure leaves no pod visible in the registry:
    /// registration is the last step, and a failed persist rolls the
    /// registration back.
    pub async fn create_pod(
        &self,
        id: Option<String>,
        mut spec: PodSpec,
        autoremove: bool,
    ) -> HyperpodResult<Arc<Pod>> {
        if self.inner.registry.count()? >= crate::daemon::constants::MAX_PODS {
            return Err(HyperpodError::Capacity(format!(
                "pod registry is full, the maximum is {}",
                crate::daemon::constants::MAX_PODS
            )));
        }

        spec.id = match id {
            Some(id) if !id.is_empty() => id,
            _ if !spec.id.is_empty() => spec.id.clone(),
            _ => generate_pod_id(),
        };
        tracing::info!(pod_id = %spec.id, name = %spec.name, "creating pod");

        let pod = lifecycle::create(self, spec, autoremove).await?;
        self.inner.registry.add(Arc::clone(&pod))?;

        if let Err(e) = self.persist_pod(&pod) {
            let _ = self.inner.registry.remove(pod.id());
            return Err(e);
        }

        Ok(pod)
    }

    /// Start a registered pod, optionally attaching an interactive client.
    pub async fn start_pod(
        &self,
        pod_ref: &str,
        options: PodStartOptions,
    ) -> HyperpodResult<(VmEventCode, String)> {
        let pod = self.lookup(pod_ref)?;

        let lazy = self.inner.vms.supports_lazy_mode() && options.vm_id.is_none();
        let mut config = StartConfig {
            vm_id: options.vm_id,
            lazy,
            keep: options.keep,
            ttys: Vec::new(),
        };

        let wait_tag = options.tty.as_ref().map(|t| t.client_tag.clone());
        if let Some(request) = options.tty {
            tracing::debug!(pod_id = %pod.id(), client_tag = %request.client_tag, "pod start with client terminal");
            config.ttys.push(tty_pair(
                request.client_tag,
                request.stdin,
                request.stdout,
            ));
        }

        let response = lifecycle::start(self, &pod, config).await?;

        if let Some(tag) = wait_tag
            && let Some(attachment) = pod.take_tty(&tag)
        {
            attachment.wait_for_finish().await;
        }

        Ok((response.code, response.cause))
    }

    /// Create the pod if it is not registered, then start it.
    pub async fn run_pod(
        &self,
        id: Option<String>,
        mut spec: PodSpec,
        autoremove: bool,
        keep: KeepMode,
    ) -> HyperpodResult<(VmEventCode, String)> {
        spec.id = match id {
            Some(id) if !id.is_empty() => id,
            _ if !spec.id.is_empty() => spec.id.clone(),
            _ => generate_pod_id(),
        };
        let lazy = self.inner.vms.supports_lazy_mode();
        let response = self
            .run_pod_internal(
                spec,
                autoremove,
                StartConfig {
                    vm_id: None,
                    lazy,
                    keep,
                    ttys: Vec::new(),
                },
            )
            .await?;
        Ok((response.code, response.cause))
    }

    pub(crate) async fn run_pod_internal(
        &self,
        spec: PodSpec,
        autoremove: bool,
        config: StartConfig,
    ) -> HyperpodResult<hyperpod_shared::vm::VmResponse> {
        let pod = match self.inner.registry.get(&spec.id)? {
            Some(pod) => pod,
            None => self.create_pod(Some(spec.id.clone()), spec, autoremove).await?,
        };
        lifecycle::start(self, &pod, config).await
    }

    /// Stop a pod. Stopping an unbound pod is a no-op success.
    pub async fn stop_pod(
        &self,
        pod_ref: &str,
        target_vm: Option<&str>,
    ) -> HyperpodResult<(VmEventCode, String)> {
        let pod = self.lookup(pod_ref)?;
        let response = lifecycle::stop(self, &pod, target_vm).await?;
        Ok((response.code, response.cause))
    }

    /// Merge labels into a pod's spec and re-persist it.
    pub fn set_pod_labels(
        &self,
        pod_ref: &str,
        override_existing: bool,
        labels: &HashMap<String, String>,
    ) -> HyperpodResult<()> {
        let pod = self.lookup(pod_ref)?;
        pod.set_labels(override_existing, labels)?;
        self.inner
            .store
            .write_pod(pod.id(), &pod.spec().to_json()?)?;
        Ok(())
    }

    /// Fully remove a pod: stop it if bound, remove its containers, its
    /// persisted records, its resource directory, and its registry entry.
    pub async fn clean_pod(&self, pod_id: &str) -> HyperpodResult<()> {
        let pod = self
            .inner
            .registry
            .get(pod_id)?
            .ok_or_else(|| HyperpodError::NotFound(format!("pod {} not found", pod_id)))?;

        if pod.is_bound()
            && let Err(e) = lifecycle::stop(self, &pod, None).await
        {
            tracing::warn!(pod_id = %pod_id, "stop during cleanup failed: {}", e);
        }

        // An autoremove pod tears itself down inside stop; only finish the
        // job if the registry entry is still there.
        if self.inner.registry.get(pod_id)?.is_some() {
            self.teardown_pod(&pod).await;
        }
        Ok(())
    }

    pub fn get_pod(&self, pod_ref: &str) -> HyperpodResult<Option<Arc<Pod>>> {
        match self.lookup(pod_ref) {
            Ok(pod) => Ok(Some(pod)),
            Err(HyperpodError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Summaries of all registered pods.
    pub fn list_pods(&self) -> HyperpodResult<Vec<PodInfo>> {
        let mut infos: Vec<PodInfo> = self
            .inner
            .registry
            .list()?
            .into_iter()
            .map(|pod| {
                pod.with_status(|s| PodInfo {
                    id: s.id.clone(),
                    name: pod.name().to_string(),
                    phase: s.phase,
                    vm_id: s.vm_id.clone(),
                    created_at: s.created_at,
                })
            })
            .collect();
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(infos)
    }

    // ------------------------------------------------------------------
    // Internal helpers (shared with lifecycle/events)
    // ------------------------------------------------------------------

    fn lookup(&self, pod_ref: &str) -> HyperpodResult<Arc<Pod>> {
        let pod = if pod_ref.contains("pod-") {
            self.inner.registry.get(pod_ref)?
        } else {
            self.inner.registry.get_by_name(pod_ref)?
        };
        pod.ok_or_else(|| {
            HyperpodError::NotFound(format!(
                "pod {} cannot be found, please create it first",
                pod_ref
            ))
        })
    }

    fn persist_pod(&self, pod: &Arc<Pod>) -> HyperpodResult<()> {
        self.inner
            .store
            .write_pod(pod.id(), &pod.spec().to_json()?)?;
        let ids: Vec<String> =
            pod.with_status(|s| s.containers.iter().map(|c| c.id.clone()).collect());
        self.inner.store.write_pod_containers(pod.id(), &ids)?;
        Ok(())
    }

    /// Stop loggers, remove the pod's engine containers, and drop the
    /// persisted container list. Failures are logged, not propagated —
    /// callers are teardown paths with no one to report to.
    pub(crate) async fn cleanup_containers(&self, pod: &Arc<Pod>) {
        pod.stop_loggers();
        let ids: Vec<String> =
            pod.with_status(|s| s.containers.iter().map(|c| c.id.clone()).collect());
        for id in ids {
            if let Err(e) = self.inner.engine.remove_container(&id).await {
                tracing::warn!(pod_id = %pod.id(), container_id = %id, "failed to remove container: {}", e);
            }
        }
        if let Err(e) = self.inner.store.delete_pod_containers(pod.id()) {
            tracing::warn!(pod_id = %pod.id(), "failed to delete container records: {}", e);
        }
    }

    /// Resource teardown after a pod left its VM: release the VM and, for
    /// autoremove pods, remove the pod entirely.
    pub(crate) async fn pod_stopped(&self, pod: &Arc<Pod>) {
        let Some(vm) = pod.unbind_vm() else {
            return;
        };
        if let Err(e) = self.inner.vms.remove_vm(vm.id()).await {
            tracing::warn!(vm_id = %vm.id(), "failed to release vm: {}", e);
        }
        if pod.with_status(|s| s.autoremove) {
            self.teardown_pod(pod).await;
        }
    }

    /// Remove every trace of an (already unbound) pod.
    pub(crate) async fn teardown_pod(&self, pod: &Arc<Pod>) {
        tracing::info!(pod_id = %pod.id(), "tearing down pod");
        self.cleanup_containers(pod).await;

        let id = pod.id();
        for result in [
            self.inner.store.delete_pod(id),
            self.inner.store.delete_volumes(id),
        ] {
            if let Err(e) = result {
                tracing::warn!(pod_id = %id, "failed to delete persisted record: {}", e);
            }
        }

        let resource_path = pod.with_status(|s| s.resource_path.clone());
        if resource_path.exists()
            && let Err(e) = std::fs::remove_dir_all(&resource_path)
        {
            tracing::warn!(pod_id = %id, "failed to remove resource dir: {}", e);
        }

        if let Err(e) = self.inner.registry.remove(id) {
            tracing::warn!(pod_id = %id, "failed to remove registry entry: {}", e);
        }
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("home_dir", &self.inner.layout.home_dir())
            .finish()
    }
}

/// Generate a fresh pod id: `pod-` followed by ten lowercase letters.
pub fn generate_pod_id() -> String {
    const ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..10)
        .map(|_| ALPHA[rng.random_range(0..ALPHA.len())] as char)
        .collect();
    format!("pod-{}", suffix)
}

// Compile-time assertion: the daemon is shared with event-loop tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Daemon>;
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pod_id_shape() {
        let id = generate_pod_id();
        assert!(id.starts_with("pod-"));
        assert_eq!(id.len(), 14);
        assert!(id[4..].chars().all(|c| c.is_ascii_lowercase()));
        assert_ne!(generate_pod_id(), generate_pod_id());
    }
}
