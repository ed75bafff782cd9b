//! Hypervisor fakes: VM handles and the VM provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hyperpod::pod::reconcile::ContainerStartInfo;
use hyperpod::pod::spec::{PodResource, PodSpec};
use hyperpod::storage::VolumeInfo;
use hyperpod::vm::{LogStream, TtyIo, VmHandle, VmProvider};
use hyperpod_shared::errors::HyperpodResult;
use hyperpod_shared::vm::{KeepMode, VmData, VmResponse, VmStatus};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeVmState {
    subscribers: Vec<mpsc::UnboundedSender<VmResponse>>,
    start_calls: Vec<usize>,
    attached: Vec<(String, String)>,
    start_response: Option<VmResponse>,
    stop_response: Option<VmResponse>,
}

/// One fake VM. Events are pushed with [`FakeVm::emit`].
pub struct FakeVm {
    id: String,
    keep: KeepMode,
    status: Mutex<VmStatus>,
    state: Mutex<FakeVmState>,
}

impl FakeVm {
    pub fn new(id: impl Into<String>, keep: KeepMode) -> Self {
        Self {
            id: id.into(),
            keep,
            status: Mutex::new(VmStatus::Running),
            state: Mutex::new(FakeVmState::default()),
        }
    }

    /// Deliver an asynchronous event to every subscriber.
    pub fn emit(&self, response: VmResponse) {
        self.state
            .lock()
            .subscribers
            .retain(|tx| tx.send(response.clone()).is_ok());
    }

    /// Override the response returned by the next pod start.
    pub fn set_start_response(&self, response: VmResponse) {
        self.state.lock().start_response = Some(response);
    }

    /// Override the response returned by pod stops.
    pub fn set_stop_response(&self, response: VmResponse) {
        self.state.lock().stop_response = Some(response);
    }

    /// Container counts passed to each start call.
    pub fn start_calls(&self) -> Vec<usize> {
        self.state.lock().start_calls.clone()
    }

    /// `(client_tag, container_id)` pairs attached so far.
    pub fn attached(&self) -> Vec<(String, String)> {
        self.state.lock().attached.clone()
    }
}

#[async_trait]
impl VmHandle for FakeVm {
    fn id(&self) -> &str {
        &self.id
    }

    fn keep(&self) -> KeepMode {
        self.keep
    }

    fn status(&self) -> VmStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: VmStatus) {
        *self.status.lock() = status;
    }

    async fn start_pod(
        &self,
        _spec: &PodSpec,
        containers: &[ContainerStartInfo],
        _volumes: &[VolumeInfo],
    ) -> VmResponse {
        let mut state = self.state.lock();
        state.start_calls.push(containers.len());
        state
            .start_response
            .take()
            .unwrap_or_else(|| VmResponse::ok(Some(VmData::Ack(b"ack".to_vec()))))
    }

    async fn stop_pod(&self, _pod_id: &str, _target_vm: Option<&str>) -> VmResponse {
        let stop = self.state.lock().stop_response.clone();
        stop.unwrap_or_else(|| {
            VmResponse::event(hyperpod_shared::vm::VmEventCode::VmShutdown)
        })
    }

    async fn attach(&self, tty: TtyIo, container_id: &str) -> HyperpodResult<()> {
        self.state
            .lock()
            .attached
            .push((tty.client_tag.clone(), container_id.to_string()));
        // Dropping the TtyIo releases its completion sender, so waiters
        // resolve immediately.
        Ok(())
    }

    async fn log_output(
        &self,
        _container_id: &str,
        _tag: &str,
    ) -> HyperpodResult<(LogStream, LogStream)> {
        Ok((Box::new(tokio::io::empty()), Box::new(tokio::io::empty())))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<VmResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        rx
    }
}

#[derive(Default)]
struct ProviderState {
    vms: HashMap<String, Arc<FakeVm>>,
    order: Vec<String>,
    next: u64,
    killed: Vec<String>,
    removed: Vec<String>,
}

/// VM provider fake.
pub struct FakeVmProvider {
    lazy: bool,
    state: Mutex<ProviderState>,
}

impl Default for FakeVmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVmProvider {
    pub fn new() -> Self {
        Self {
            lazy: false,
            state: Mutex::new(ProviderState::default()),
        }
    }

    pub fn with_lazy_mode() -> Self {
        Self {
            lazy: true,
            state: Mutex::new(ProviderState::default()),
        }
    }

    pub fn vm(&self, id: &str) -> Option<Arc<FakeVm>> {
        self.state.lock().vms.get(id).cloned()
    }

    /// Register a VM under a fixed id, as if it already existed.
    pub fn preallocate(&self, id: &str, keep: KeepMode) -> Arc<FakeVm> {
        let mut state = self.state.lock();
        let vm = Arc::new(FakeVm::new(id, keep));
        state.vms.insert(id.to_string(), Arc::clone(&vm));
        state.order.push(id.to_string());
        vm
    }

    /// The most recently allocated VM.
    pub fn last_vm(&self) -> Option<Arc<FakeVm>> {
        let state = self.state.lock();
        state.order.last().and_then(|id| state.vms.get(id)).cloned()
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.lock().killed.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().order.len()
    }
}

#[async_trait]
impl VmProvider for FakeVmProvider {
    fn supports_lazy_mode(&self) -> bool {
        self.lazy
    }

    async fn get_vm(
        &self,
        id: Option<&str>,
        _resource: &PodResource,
        _lazy: bool,
        keep: KeepMode,
    ) -> HyperpodResult<Arc<dyn VmHandle>> {
        let mut state = self.state.lock();
        let vm = match id {
            Some(id) => match state.vms.get(id) {
                Some(vm) => Arc::clone(vm),
                None => {
                    let vm = Arc::new(FakeVm::new(id, keep));
                    state.vms.insert(id.to_string(), Arc::clone(&vm));
                    state.order.push(id.to_string());
                    vm
                }
            },
            None => {
                state.next += 1;
                let vm_id = format!("vm-{}", state.next);
                let vm = Arc::new(FakeVm::new(&vm_id, keep));
                state.vms.insert(vm_id.clone(), Arc::clone(&vm));
                state.order.push(vm_id);
                vm
            }
        };
        Ok(vm)
    }

    async fn kill_vm(&self, id: &str) -> HyperpodResult<()> {
        let mut state = self.state.lock();
        state.vms.remove(id);
        state.killed.push(id.to_string());
        Ok(())
    }

    async fn remove_vm(&self, id: &str) -> HyperpodResult<()> {
        let mut state = self.state.lock();
        state.vms.remove(id);
        state.removed.push(id.to_string());
        Ok(())
    }
}
