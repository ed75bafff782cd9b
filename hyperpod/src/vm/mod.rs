//! Hypervisor seam: VM handles, the VM provider, and TTY plumbing.
//!
//! A [`VmHandle`] is owned by the hypervisor subsystem; a pod holds a
//! non-owning `Arc` reference only while it is bound. Asynchronous lifecycle
//! events arrive on the handle's subscription channel and are consumed by the
//! pod's event loop.

use std::sync::Arc;

use async_trait::async_trait;
use hyperpod_shared::errors::HyperpodResult;
use hyperpod_shared::vm::{KeepMode, VmResponse, VmStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::pod::reconcile::ContainerStartInfo;
use crate::pod::spec::{PodResource, PodSpec};
use crate::storage::VolumeInfo;

/// Byte stream read from the guest (container stdout/stderr).
pub type LogStream = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Interactive stream pair handed to the VM for one container.
///
/// The hypervisor consumes the streams and signals `done` with the
/// container's exit code when the attached session ends.
pub struct TtyIo {
    pub client_tag: String,
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub done: oneshot::Sender<i32>,
}

impl std::fmt::Debug for TtyIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtyIo")
            .field("client_tag", &self.client_tag)
            .finish()
    }
}

/// Pod-side half of an attachment: kept in the pod's TTY table so a caller
/// can block until the session completes.
#[derive(Debug)]
pub struct TtyAttachment {
    pub client_tag: String,
    done: oneshot::Receiver<i32>,
}

impl TtyAttachment {
    /// Wait until the VM signals the end of the attached session.
    ///
    /// Returns the exit code, or `None` if the VM dropped the sender without
    /// signalling (VM teardown).
    pub async fn wait_for_finish(self) -> Option<i32> {
        self.done.await.ok()
    }
}

/// Caller-supplied interactive streams for one container, as accepted by
/// the daemon's public start operation.
pub struct TtyRequest {
    pub client_tag: String,
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl std::fmt::Debug for TtyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtyRequest")
            .field("client_tag", &self.client_tag)
            .finish()
    }
}

/// Build a connected (VM half, pod half) TTY pair for a client tag.
pub fn tty_pair(
    client_tag: impl Into<String>,
    stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
) -> (TtyIo, TtyAttachment) {
    let client_tag = client_tag.into();
    let (done_tx, done_rx) = oneshot::channel();
    (
        TtyIo {
            client_tag: client_tag.clone(),
            stdin,
            stdout,
            done: done_tx,
        },
        TtyAttachment {
            client_tag,
            done: done_rx,
        },
    )
}

/// One hypervisor virtual machine.
#[async_trait]
pub trait VmHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Keep-mode the VM was requested with.
    fn keep(&self) -> KeepMode;

    fn status(&self) -> VmStatus;

    fn set_status(&self, status: VmStatus);

    /// Launch the pod's containers inside the VM.
    ///
    /// A successful response carries an acknowledgement payload; the caller
    /// treats a payload-less `Ok` as a protocol violation.
    async fn start_pod(
        &self,
        spec: &PodSpec,
        containers: &[ContainerStartInfo],
        volumes: &[VolumeInfo],
    ) -> VmResponse;

    /// Stop the pod; `target_vm` narrows the stop to a specific VM id.
    ///
    /// The response distinguishes a pod-only stop (VM kept) from a full VM
    /// shutdown.
    async fn stop_pod(&self, pod_id: &str, target_vm: Option<&str>) -> VmResponse;

    /// Wire an interactive stream pair to a container.
    async fn attach(&self, tty: TtyIo, container_id: &str) -> HyperpodResult<()>;

    /// Obtain live stdout/stderr streams for a container.
    async fn log_output(
        &self,
        container_id: &str,
        tag: &str,
    ) -> HyperpodResult<(LogStream, LogStream)>;

    /// Subscribe to the VM's asynchronous response events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<VmResponse>;
}

/// The hypervisor subsystem: allocates, reuses, and discards VMs.
#[async_trait]
pub trait VmProvider: Send + Sync {
    /// Whether the hypervisor can defer VM boot until pod start (lazy mode).
    fn supports_lazy_mode(&self) -> bool;

    /// Obtain a VM: an existing one when `id` is given, otherwise a fresh
    /// (or lazily created) instance sized for `resource`.
    async fn get_vm(
        &self,
        id: Option<&str>,
        resource: &PodResource,
        lazy: bool,
        keep: KeepMode,
    ) -> HyperpodResult<Arc<dyn VmHandle>>;

    /// Forcefully tear a VM down (rollback path).
    async fn kill_vm(&self, id: &str) -> HyperpodResult<()>;

    /// Release a VM that reported shutdown (bookkeeping only).
    async fn remove_vm(&self, id: &str) -> HyperpodResult<()>;
}
