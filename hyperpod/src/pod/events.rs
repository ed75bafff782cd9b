//! VM event state machine.
//!
//! Termination events arrive asynchronously on the bound VM's channel. The
//! decision of what an event means is a pure function of (event code,
//! keep-mode, pod phase, pod type, restart policy) — see [`plan`] — and the
//! handler only executes the resulting side effects. Events never propagate
//! errors: there is no synchronous caller, so failures are logged and the
//! loop continues.

use std::sync::Arc;

use hyperpod_shared::vm::{VmEventCode, VmResponse, VmStatus};

use crate::daemon::Daemon;
use crate::pod::spec::{PodType, RestartPolicy};
use crate::pod::status::{ContainerPhase, PodPhase};
use crate::pod::{Pod, lifecycle};
use crate::vm::VmHandle;

/// What a kubernetes-typed pod does after the shutdown branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum K8sAction {
    #[default]
    None,
    /// Re-create and re-start the pod with the same id.
    Restart,
    /// Remove containers and delete every persisted record.
    Cleanup,
}

/// Side effects decided for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventPlan {
    pub stop_loggers: bool,
    /// Record per-container exit codes from the event payload.
    pub record_exits: bool,
    pub vm_to_idle: bool,
    /// Full pod cleanup for an autoremove pod that finished in place.
    pub autoremove_clean: bool,
    /// Transition Running → Succeeded and mark all containers succeeded.
    pub succeed_if_running: bool,
    /// Unbind the VM and run the pod-stopped teardown.
    pub teardown: bool,
    pub k8s_action: K8sAction,
    /// Leave the event loop.
    pub exit_loop: bool,
    /// The VM itself is gone (vs. kept for another pod).
    pub close_vm: bool,
}

/// Decide the side effects of one event. Pure; see module docs.
pub fn plan(
    code: VmEventCode,
    keep: hyperpod_shared::vm::KeepMode,
    phase: PodPhase,
    pod_type: PodType,
    policy: RestartPolicy,
    autoremove: bool,
) -> EventPlan {
    match code {
        VmEventCode::PodFinished => {
            if keep.keeps_vm() {
                // The VM idles with the pod still bound; no phase change.
                EventPlan {
                    vm_to_idle: true,
                    ..Default::default()
                }
            } else {
                EventPlan {
                    stop_loggers: true,
                    record_exits: true,
                    vm_to_idle: true,
                    autoremove_clean: autoremove,
                    ..Default::default()
                }
            }
        }
        VmEventCode::VmShutdown | VmEventCode::PodStopped => {
            let effective_phase = if phase.is_running() {
                PodPhase::Succeeded
            } else {
                phase
            };
            let k8s_action = if pod_type == PodType::Kubernetes {
                match effective_phase {
                    PodPhase::Succeeded if policy == RestartPolicy::Always => K8sAction::Restart,
                    PodPhase::Failed if policy != RestartPolicy::Never => K8sAction::Restart,
                    PodPhase::Succeeded | PodPhase::Failed => K8sAction::Cleanup,
                    _ => K8sAction::None,
                }
            } else {
                K8sAction::None
            };
            EventPlan {
                stop_loggers: phase.is_running(),
                succeed_if_running: true,
                teardown: true,
                k8s_action,
                exit_loop: true,
                // A pod-stop that keeps the VM leaves the channel open for
                // the next pod on this VM.
                close_vm: code == VmEventCode::VmShutdown,
                ..Default::default()
            }
        }
        VmEventCode::Ok | VmEventCode::Failed => EventPlan::default(),
    }
}

/// Execute the plan for one event.
pub(crate) async fn handle_event(
    daemon: &Daemon,
    pod: &Arc<Pod>,
    vm: &Arc<dyn VmHandle>,
    response: &VmResponse,
) -> EventPlan {
    let (phase, policy, autoremove, pod_type) =
        pod.with_status(|s| (s.phase, s.restart_policy, s.autoremove, s.pod_type));
    let plan = plan(response.code, vm.keep(), phase, pod_type, policy, autoremove);
    tracing::debug!(
        pod_id = %pod.id(),
        vm_id = %vm.id(),
        code = ?response.code,
        ?plan,
        "handling vm event"
    );

    if plan.stop_loggers {
        pod.stop_loggers();
    }
    if plan.record_exits
        && let Some(codes) = response.exit_codes()
    {
        pod.with_status_mut(|s| s.set_exit_codes(codes));
    }
    if plan.vm_to_idle {
        vm.set_status(VmStatus::Idle);
    }
    if plan.succeed_if_running && phase.is_running() {
        pod.with_status_mut(|s| {
            if let Err(e) = s.transition_to(PodPhase::Succeeded) {
                tracing::warn!(pod_id = %s.id, "phase transition rejected: {}", e);
            }
            s.set_container_phase(ContainerPhase::Succeeded);
        });
    }
    if plan.teardown {
        daemon.pod_stopped(pod).await;
    }
    if plan.autoremove_clean
        && let Err(e) = daemon.clean_pod(pod.id()).await
    {
        tracing::warn!(pod_id = %pod.id(), "autoremove cleanup failed: {}", e);
    }

    match plan.k8s_action {
        K8sAction::Restart => {
            // Fire-and-forget: the restart has no caller to report to, so
            // its failures are only observable in the logs.
            let daemon = daemon.clone();
            let pod_id = pod.id().to_string();
            tokio::spawn(async move {
                if let Err(e) = lifecycle::restart(&daemon, &pod_id).await {
                    tracing::error!(pod_id = %pod_id, "policy restart failed: {}", e);
                }
            });
        }
        K8sAction::Cleanup => {
            daemon.cleanup_containers(pod).await;
            let id = pod.id();
            for result in [
                daemon.store().delete_pod(id),
                daemon.store().delete_pod_containers(id),
                daemon.store().delete_volumes(id),
            ] {
                if let Err(e) = result {
                    tracing::warn!(pod_id = %id, "cleanup of persisted records failed: {}", e);
                }
            }
        }
        K8sAction::None => {}
    }

    if plan.close_vm {
        vm.set_status(VmStatus::Shutdown);
    }

    plan
}

/// Consume the VM's event channel until a terminating event.
pub(crate) fn spawn_event_loop(daemon: Daemon, pod: Arc<Pod>, vm: Arc<dyn VmHandle>) {
    let mut rx = vm.subscribe();
    tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let plan = handle_event(&daemon, &pod, &vm, &response).await;
            if plan.exit_loop {
                break;
            }
        }
        tracing::debug!(pod_id = %pod.id(), vm_id = %vm.id(), "event loop exited");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperpod_shared::vm::KeepMode;

    #[test]
    fn test_finished_with_keep_leaves_pod_alone() {
        let p = plan(
            VmEventCode::PodFinished,
            KeepMode::AfterFinish,
            PodPhase::Running,
            PodType::Normal,
            RestartPolicy::Never,
            true,
        );
        assert!(p.vm_to_idle);
        assert!(!p.stop_loggers);
        assert!(!p.record_exits);
        assert!(!p.autoremove_clean);
        assert!(!p.exit_loop);
    }

    #[test]
    fn test_finished_without_keep_records_exits() {
        let p = plan(
            VmEventCode::PodFinished,
            KeepMode::None,
            PodPhase::Running,
            PodType::Normal,
            RestartPolicy::Never,
            false,
        );
        assert!(p.stop_loggers);
        assert!(p.record_exits);
        assert!(p.vm_to_idle);
        assert!(!p.autoremove_clean);
        assert!(!p.exit_loop);
    }

    #[test]
    fn test_finished_autoremove_cleans() {
        let p = plan(
            VmEventCode::PodFinished,
            KeepMode::None,
            PodPhase::Running,
            PodType::Normal,
            RestartPolicy::Never,
            true,
        );
        assert!(p.autoremove_clean);
    }

    #[test]
    fn test_shutdown_tears_down_and_exits() {
        let p = plan(
            VmEventCode::VmShutdown,
            KeepMode::None,
            PodPhase::Running,
            PodType::Normal,
            RestartPolicy::Never,
            false,
        );
        assert!(p.stop_loggers);
        assert!(p.succeed_if_running);
        assert!(p.teardown);
        assert!(p.exit_loop);
        assert!(p.close_vm);
        assert_eq!(p.k8s_action, K8sAction::None);
    }

    #[test]
    fn test_pod_stopped_keeps_vm_channel() {
        let p = plan(
            VmEventCode::PodStopped,
            KeepMode::Alive,
            PodPhase::Running,
            PodType::Normal,
            RestartPolicy::Never,
            false,
        );
        assert!(p.exit_loop);
        assert!(!p.close_vm);
    }

    #[test]
    fn test_k8s_succeeded_always_restarts() {
        let p = plan(
            VmEventCode::VmShutdown,
            KeepMode::None,
            PodPhase::Running,
            PodType::Kubernetes,
            RestartPolicy::Always,
            false,
        );
        assert_eq!(p.k8s_action, K8sAction::Restart);
    }

    #[test]
    fn test_k8s_succeeded_on_failure_policy_cleans_up() {
        let p = plan(
            VmEventCode::VmShutdown,
            KeepMode::None,
            PodPhase::Running,
            PodType::Kubernetes,
            RestartPolicy::OnFailure,
            false,
        );
        assert_eq!(p.k8s_action, K8sAction::Cleanup);
    }

    #[test]
    fn test_k8s_failed_restarts_unless_never() {
        let restart = plan(
            VmEventCode::VmShutdown,
            KeepMode::None,
            PodPhase::Failed,
            PodType::Kubernetes,
            RestartPolicy::OnFailure,
            false,
        );
        assert_eq!(restart.k8s_action, K8sAction::Restart);

        let cleanup = plan(
            VmEventCode::VmShutdown,
            KeepMode::None,
            PodPhase::Failed,
            PodType::Kubernetes,
            RestartPolicy::Never,
            false,
        );
        assert_eq!(cleanup.k8s_action, K8sAction::Cleanup);
    }

    #[test]
    fn test_non_k8s_never_restarts() {
        let p = plan(
            VmEventCode::VmShutdown,
            KeepMode::None,
            PodPhase::Failed,
            PodType::Normal,
            RestartPolicy::Always,
            false,
        );
        assert_eq!(p.k8s_action, K8sAction::None);
    }

    #[test]
    fn test_ack_codes_are_ignored() {
        let p = plan(
            VmEventCode::Ok,
            KeepMode::None,
            PodPhase::Running,
            PodType::Kubernetes,
            RestartPolicy::Always,
            true,
        );
        assert_eq!(p, EventPlan::default());
    }
}
