//! Pod entity and its lifecycle pipeline.
//!
//! ## Architecture
//!
//! - `spec`: the user-facing specification and validation
//! - `status`: the runtime status aggregate and phase state machine
//! - `preprocess`: resolved-spec derivation (services, hosts, DNS)
//! - `reconcile`: spec containers → engine containers + start infos
//! - `volumes`: volume creation, mounting, file injection
//! - `logging`: per-container log driver + copier binding
//! - `lifecycle`: create / start / stop / restart sequencing
//! - `events`: the VM event state machine

pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod preprocess;
pub mod reconcile;
pub mod spec;
pub mod status;
pub mod volumes;

use std::collections::HashMap;
use std::sync::Arc;

use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use parking_lot::{Mutex, RwLock};

use crate::pod::reconcile::ContainerStartInfo;
use crate::pod::spec::{PodSpec, PodType};
use crate::pod::status::PodStatus;
use crate::storage::VolumeInfo;
use crate::vm::{TtyAttachment, VmHandle};

/// One pod under daemon control.
///
/// Owns exactly one resolved spec and one status, and holds at most one
/// bound VM handle at a time; binding and unbinding are the only legal
/// transitions of the VM reference.
///
/// **Locking**: every field has its own fine-grained lock, none of which is
/// the registry lock. Lifecycle transitions (start/stop/restart) are
/// serialized by `op_lock`, acquired after registry lookup and released
/// before returning, so slow I/O for one pod never blocks another.
pub struct Pod {
    id: String,
    name: String,
    spec: RwLock<PodSpec>,
    status: RwLock<PodStatus>,
    vm: Mutex<Option<Arc<dyn VmHandle>>>,
    start_info: Mutex<Vec<ContainerStartInfo>>,
    volumes: Mutex<Vec<VolumeInfo>>,
    ttys: Mutex<HashMap<String, TtyAttachment>>,
    op_lock: tokio::sync::Mutex<()>,
}

impl Pod {
    pub(crate) fn new(spec: PodSpec, status: PodStatus) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            spec: RwLock::new(spec),
            status: RwLock::new(status),
            vm: Mutex::new(None),
            start_info: Mutex::new(Vec::new()),
            volumes: Mutex::new(Vec::new()),
            ttys: Mutex::new(HashMap::new()),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize a lifecycle transition on this pod.
    pub(crate) async fn lock_op(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    /// Snapshot the resolved spec.
    pub fn spec(&self) -> PodSpec {
        self.spec.read().clone()
    }

    /// Read a value out of the status under its lock.
    pub fn with_status<R>(&self, f: impl FnOnce(&PodStatus) -> R) -> R {
        f(&self.status.read())
    }

    /// Mutate the status under its lock.
    pub(crate) fn with_status_mut<R>(&self, f: impl FnOnce(&mut PodStatus) -> R) -> R {
        f(&mut self.status.write())
    }

    pub fn pod_type(&self) -> PodType {
        self.spec.read().pod_type
    }

    /// Merge labels into the spec. Existing keys are only replaced when
    /// `override_existing` is set.
    pub fn set_labels(
        &self,
        override_existing: bool,
        labels: &HashMap<String, String>,
    ) -> HyperpodResult<()> {
        let mut spec = self.spec.write();
        for k in labels.keys() {
            if spec.labels.contains_key(k) && !override_existing {
                return Err(HyperpodError::Validation(format!(
                    "cannot update label {} without override",
                    k
                )));
            }
        }
        for (k, v) in labels {
            spec.labels.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // VM binding
    // ------------------------------------------------------------------

    /// Bind a VM to this pod. Fails if a VM is already bound.
    pub(crate) fn bind_vm(&self, vm: Arc<dyn VmHandle>) -> HyperpodResult<()> {
        let mut slot = self.vm.lock();
        if slot.is_some() {
            return Err(HyperpodError::AlreadyRunning(format!(
                "pod {} is already bound to a vm",
                self.id
            )));
        }
        self.status.write().vm_id = Some(vm.id().to_string());
        *slot = Some(vm);
        Ok(())
    }

    /// Unbind and return the VM handle, if any.
    pub(crate) fn unbind_vm(&self) -> Option<Arc<dyn VmHandle>> {
        self.status.write().vm_id = None;
        self.vm.lock().take()
    }

    /// The bound VM, if any.
    pub fn vm(&self) -> Option<Arc<dyn VmHandle>> {
        self.vm.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.vm.lock().is_some()
    }

    // ------------------------------------------------------------------
    // Transient artifacts
    // ------------------------------------------------------------------

    pub(crate) fn set_start_info(&self, infos: Vec<ContainerStartInfo>) {
        *self.start_info.lock() = infos;
    }

    pub(crate) fn start_info(&self) -> Vec<ContainerStartInfo> {
        self.start_info.lock().clone()
    }

    pub(crate) fn set_volumes(&self, volumes: Vec<VolumeInfo>) {
        *self.volumes.lock() = volumes;
    }

    pub(crate) fn volumes(&self) -> Vec<VolumeInfo> {
        self.volumes.lock().clone()
    }

    // ------------------------------------------------------------------
    // TTY table
    // ------------------------------------------------------------------

    /// Record an attachment under its client tag.
    pub(crate) fn register_tty(&self, attachment: TtyAttachment) {
        self.ttys
            .lock()
            .insert(attachment.client_tag.clone(), attachment);
    }

    /// Remove and return an attachment by client tag (callers wait on it
    /// outside the lock).
    pub fn take_tty(&self, client_tag: &str) -> Option<TtyAttachment> {
        self.ttys.lock().remove(client_tag)
    }

    // ------------------------------------------------------------------
    // Logging teardown
    // ------------------------------------------------------------------

    /// Stop every container's log copier and close its driver.
    pub(crate) fn stop_loggers(&self) {
        let mut status = self.status.write();
        for c in &mut status.containers {
            if let Some(mut copier) = c.logs.copier.take() {
                copier.stop();
            }
            if let Some(driver) = c.logs.driver.take() {
                driver.close();
            }
        }
    }
}

impl std::fmt::Debug for Pod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pod")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

// Compile-time assertion: pods are shared across control tasks and the
// event loop.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Pod>;
};
