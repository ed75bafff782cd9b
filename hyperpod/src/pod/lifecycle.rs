//! Pod lifecycle sequencing: create, start, stop, restart.
//!
//! Within one pod the pipeline is a strict sequence — preprocessing,
//! reconciliation, volume creation, provisioning, logging, TTY attach, VM
//! start — with the error of each step checked before the next begins.
//! Failures roll back only what this call created: containers from this
//! reconciliation, opened log drivers, and the VM when this call allocated
//! it.

use std::sync::Arc;

use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use hyperpod_shared::vm::{KeepMode, VmEventCode, VmResponse};

use crate::daemon::Daemon;
use crate::pod::preprocess::{self, PreprocessEnv};
use crate::pod::spec::{PodSpec, PodType, RestartPolicy};
use crate::pod::status::{PodPhase, PodStatus};
use crate::pod::{Pod, events, logging, reconcile, volumes};
use crate::vm::{TtyAttachment, TtyIo, VmHandle};

/// Build a pod from a validated spec: preprocess, reconcile containers,
/// create volumes, and populate the status aggregate.
///
/// The returned pod is not yet registered; the daemon adds it to the
/// registry after this returns so a mid-pipeline failure leaves no
/// partially-created pod visible.
pub(crate) async fn create(
    daemon: &Daemon,
    spec: PodSpec,
    autoremove: bool,
) -> HyperpodResult<Arc<Pod>> {
    spec.validate()?;

    let resource_path = daemon.layout().resource_path(&spec.id);
    std::fs::create_dir_all(&resource_path).map_err(|e| {
        HyperpodError::Storage(format!(
            "cannot create resource dir {}: {}",
            resource_path.display(),
            e
        ))
    })?;

    let env = PreprocessEnv::new(resource_path.clone());
    let resolved = preprocess::preprocess(&spec, &env)?;

    let mut reconciliation =
        reconcile::reconcile(daemon.engine(), daemon.storage(), &resolved).await?;
    volumes::create_volumes(daemon.storage(), daemon.store(), &mut reconciliation.spec).await?;

    let mut status = PodStatus::new(
        spec.id.clone(),
        reconciliation.spec.pod_type,
        reconciliation.spec.restart_policy,
        autoremove,
        resource_path,
    );
    for (c, details) in reconciliation
        .spec
        .containers
        .iter()
        .zip(&reconciliation.details)
    {
        status.add_container(
            details.id.clone(),
            c.name.clone(),
            c.image.clone(),
            details.resolved_cmd(),
        );
    }

    let pod = Arc::new(Pod::new(reconciliation.spec, status));
    pod.set_start_info(reconciliation.start_infos);
    Ok(pod)
}

/// Options for one start operation.
pub struct StartConfig {
    /// Reuse this VM instead of allocating one. The pod only owns (and
    /// rolls back) VMs it allocated itself.
    pub vm_id: Option<String>,
    pub lazy: bool,
    pub keep: KeepMode,
    /// Interactive stream pairs, in container order.
    pub ttys: Vec<(TtyIo, TtyAttachment)>,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            vm_id: None,
            lazy: false,
            keep: KeepMode::None,
            ttys: Vec::new(),
        }
    }
}

/// Bind a VM and start the pod inside it.
pub(crate) async fn start(
    daemon: &Daemon,
    pod: &Arc<Pod>,
    config: StartConfig,
) -> HyperpodResult<VmResponse> {
    let _op = pod.lock_op().await;

    let (phase, pod_type) = pod.with_status(|s| (s.phase, s.pod_type));
    if phase.is_running() || pod.is_bound() {
        return Err(HyperpodError::AlreadyRunning(format!(
            "pod {} is already running",
            pod.id()
        )));
    }
    if pod_type == PodType::Kubernetes && phase != PodPhase::Created {
        return Err(HyperpodError::AlreadyRunning(format!(
            "invalid pod status for start: {}",
            phase
        )));
    }

    let spec = pod.spec();
    let owns_vm = config.vm_id.is_none();
    let vm = daemon
        .vms()
        .get_vm(
            config.vm_id.as_deref(),
            &spec.resource,
            config.lazy,
            config.keep,
        )
        .await?;
    pod.bind_vm(Arc::clone(&vm))?;
    tracing::info!(pod_id = %pod.id(), vm_id = %vm.id(), "starting pod");

    // Everything up to the VM-level start is "preparing": a failure here
    // tears down an owned VM. A failure after the start call leaves the VM
    // to the event handler.
    let prepared = async {
        prepare(daemon, pod, vm.as_ref()).await?;
        logging::start_logging(
            pod,
            vm.as_ref(),
            daemon.log_drivers(),
            &daemon.options().default_log,
        )
        .await?;
        attach_ttys(pod, vm.as_ref(), config.ttys).await
    }
    .await;

    if let Err(e) = prepared {
        pod.stop_loggers();
        pod.unbind_vm();
        if owns_vm {
            if let Err(kill_err) = daemon.vms().kill_vm(vm.id()).await {
                tracing::warn!(vm_id = %vm.id(), "failed to tear down vm: {}", kill_err);
            }
        }
        return Err(e);
    }

    // Subscribe before the start call so termination events are never lost.
    events::spawn_event_loop(daemon.clone(), Arc::clone(pod), Arc::clone(&vm));

    let start_infos = pod.start_info();
    let vm_volumes = pod.volumes();
    let response = vm.start_pod(&spec, &start_infos, &vm_volumes).await;

    if response.code == VmEventCode::Failed {
        pod.stop_loggers();
        return Err(HyperpodError::Engine(format!(
            "vm failed to start pod {}: {}",
            pod.id(),
            response.cause
        )));
    }
    // The VM call succeeded, but an acknowledgement without payload breaks
    // the protocol contract.
    if response.data.is_none() {
        pod.stop_loggers();
        return Err(HyperpodError::Protocol(format!(
            "vm acknowledged start of pod {} with no payload",
            pod.id()
        )));
    }

    pod.with_status_mut(|s| s.transition_to(PodPhase::Running))?;
    tracing::info!(pod_id = %pod.id(), vm_id = %vm.id(), "pod running");
    Ok(response)
}

/// Mount container layers, inject files, and mount volumes into the VM
/// shared directory.
async fn prepare(daemon: &Daemon, pod: &Arc<Pod>, vm: &dyn VmHandle) -> HyperpodResult<()> {
    let spec = pod.spec();
    let mut infos = pod.start_info();

    if infos.len() != spec.containers.len() {
        return Err(HyperpodError::Internal(format!(
            "prepare error: pod {} did not get container infos for all containers",
            pod.id()
        )));
    }

    let shared_dir = daemon.layout().vm_shared_dir(vm.id());

    for (idx, c) in spec.containers.iter().enumerate() {
        let mount = daemon
            .storage()
            .prepare_container(&infos[idx].mount_id, &shared_dir)
            .await?;
        volumes::inject_files(
            daemon.storage(),
            &spec,
            c,
            &infos[idx].mount_id,
            &shared_dir,
        )
        .await?;
        infos[idx].mount = Some(mount);
    }
    pod.set_start_info(infos);

    let mounted = volumes::mount_volumes(daemon.storage(), &spec, &shared_dir).await?;
    pod.set_volumes(mounted);

    Ok(())
}

/// Wire caller-supplied stream pairs to containers, in container order.
///
/// For service-discovery pods the first container is the proxy sidecar and
/// is excluded from TTY targets.
async fn attach_ttys(
    pod: &Arc<Pod>,
    vm: &dyn VmHandle,
    ttys: Vec<(TtyIo, TtyAttachment)>,
) -> HyperpodResult<()> {
    let infos = pod.start_info();
    let targets: Vec<&str> = if pod.pod_type() == PodType::ServiceDiscovery {
        infos.iter().skip(1).map(|i| i.container_id.as_str()).collect()
    } else {
        infos.iter().map(|i| i.container_id.as_str()).collect()
    };

    for (idx, (tty, attachment)) in ttys.into_iter().enumerate() {
        let Some(container_id) = targets.get(idx) else {
            break;
        };
        let client_tag = tty.client_tag.clone();
        pod.register_tty(attachment);
        vm.attach(tty, container_id).await.map_err(|e| {
            tracing::error!(
                pod_id = %pod.id(),
                client_tag = %client_tag,
                "failed to attach client before start: {}", e
            );
            e
        })?;
        tracing::debug!(pod_id = %pod.id(), client_tag = %client_tag, "attached client");
    }

    Ok(())
}

/// Stop the pod; a stop on an unbound pod is a no-op success.
pub(crate) async fn stop(
    daemon: &Daemon,
    pod: &Arc<Pod>,
    target_vm: Option<&str>,
) -> HyperpodResult<VmResponse> {
    let _op = pod.lock_op().await;
    tracing::info!(pod_id = %pod.id(), "preparing to stop pod");

    // An explicit stop of a kubernetes pod is operator intent: the pod must
    // not come back on its own.
    if pod.pod_type() == PodType::Kubernetes {
        pod.with_status_mut(|s| s.restart_policy = RestartPolicy::Never);
    }

    let Some(vm) = pod.vm() else {
        return Ok(VmResponse::event(VmEventCode::VmShutdown));
    };

    let response = vm.stop_pod(pod.id(), target_vm).await;

    if response.code == VmEventCode::VmShutdown {
        if let Err(e) = daemon.vms().remove_vm(vm.id()).await {
            tracing::warn!(vm_id = %vm.id(), "failed to release vm: {}", e);
        }
    }

    pod.unbind_vm();

    if pod.with_status(|s| s.autoremove) {
        daemon.teardown_pod(pod).await;
    }

    Ok(response)
}

/// Policy-triggered restart: tear down the pod's containers and registry
/// entry, then run the same create+start pipeline again from the
/// last-persisted spec.
pub(crate) async fn restart(daemon: &Daemon, pod_id: &str) -> HyperpodResult<()> {
    if let Some(backoff) = daemon.options().restart_backoff {
        tokio::time::sleep(backoff).await;
    }

    tracing::info!(pod_id = %pod_id, "restarting pod");

    if let Some(pod) = daemon.registry().get(pod_id)? {
        daemon.cleanup_containers(&pod).await;
        daemon.registry().remove(pod_id)?;
    }
    daemon.store().delete_volumes(pod_id)?;

    let raw = daemon
        .store()
        .read_pod(pod_id)?
        .ok_or_else(|| HyperpodError::NotFound(format!("no persisted spec for pod {}", pod_id)))?;
    let spec = PodSpec::from_json(&raw)?;

    let lazy = daemon.vms().supports_lazy_mode();
    daemon
        .run_pod_internal(
            spec,
            false,
            StartConfig {
                vm_id: None,
                lazy,
                keep: KeepMode::None,
                ttys: Vec::new(),
            },
        )
        .await?;

    // Re-persist pod and container records for the fresh containers.
    if let Some(pod) = daemon.registry().get(pod_id)? {
        daemon.store().write_pod(pod_id, &pod.spec().to_json()?)?;
        let ids = pod.with_status(|s| s.containers.iter().map(|c| c.id.clone()).collect::<Vec<_>>());
        daemon.store().write_pod_containers(pod_id, &ids)?;
    }

    Ok(())
}
