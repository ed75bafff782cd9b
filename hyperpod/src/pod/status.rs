//! Pod lifecycle status and state machine.
//!
//! Defines the phases a pod moves through and the valid transitions between
//! them. The status aggregate survives VM restarts; only the VM binding and
//! the per-container log handles change when a pod is re-bound.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use serde::{Deserialize, Serialize};

use crate::logdriver::{LogCopier, LogDriver};
use crate::pod::spec::{PodType, RestartPolicy};

/// Lifecycle phase of a pod.
///
/// ```text
/// create() → Created (containers reconciled, not VM-bound)
/// start()  → Running (VM-bound, start acknowledged)
/// events   → Succeeded | Failed (VM-unbound, terminal unless restart
///            policy reactivates the pod)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    /// Spec validated and containers reconciled; no VM bound.
    Created,
    /// VM bound and start acknowledged.
    Running,
    /// All containers exited successfully; VM unbound.
    Succeeded,
    /// At least one container failed; VM unbound.
    Failed,
}

impl PodPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, PodPhase::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }

    /// Check if start() can be called from this phase.
    pub fn can_start(&self) -> bool {
        !self.is_running()
    }

    /// Check if transition to the target phase is valid.
    pub fn can_transition_to(&self, target: PodPhase) -> bool {
        use PodPhase::*;
        matches!(
            (self, target),
            (Created, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                // A kept-VM pod can be re-acknowledged without an
                // intervening Created phase.
                | (Succeeded, Running)
                | (Failed, Running)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Created => "created",
            PodPhase::Running => "running",
            PodPhase::Succeeded => "succeeded",
            PodPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-container phase inside a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerPhase {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// Log binding of one container: driver, copier, and resolved log path.
#[derive(Default)]
pub struct LogStatus {
    pub driver: Option<Arc<dyn LogDriver>>,
    pub copier: Option<LogCopier>,
    pub log_path: Option<PathBuf>,
}

impl std::fmt::Debug for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStatus")
            .field("driver", &self.driver.as_ref().map(|d| d.name()))
            .field("copier", &self.copier.is_some())
            .field("log_path", &self.log_path)
            .finish()
    }
}

/// Runtime status of one container, 1:1 and order-preserving with the
/// resolved spec's container list.
#[derive(Debug)]
pub struct ContainerStatus {
    pub id: String,
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub phase: ContainerPhase,
    pub exit_code: Option<u32>,
    pub logs: LogStatus,
}

impl ContainerStatus {
    pub fn new(id: String, name: String, image: String, cmd: Vec<String>) -> Self {
        Self {
            id,
            name,
            image,
            cmd,
            phase: ContainerPhase::Created,
            exit_code: None,
            logs: LogStatus::default(),
        }
    }
}

/// Mutable runtime aggregate of a pod. One per pod, guarded by the pod's
/// own status lock (never by the registry lock).
#[derive(Debug)]
pub struct PodStatus {
    pub id: String,
    /// Bound VM id; `None` while unbound.
    pub vm_id: Option<String>,
    pub phase: PodPhase,
    pub autoremove: bool,
    pub restart_policy: RestartPolicy,
    pub pod_type: PodType,
    /// Per-pod on-disk scratch directory.
    pub resource_path: PathBuf,
    pub containers: Vec<ContainerStatus>,
    pub created_at: DateTime<Utc>,
}

impl PodStatus {
    pub fn new(
        id: String,
        pod_type: PodType,
        restart_policy: RestartPolicy,
        autoremove: bool,
        resource_path: PathBuf,
    ) -> Self {
        Self {
            id,
            vm_id: None,
            phase: PodPhase::Created,
            autoremove,
            restart_policy,
            pod_type,
            resource_path,
            containers: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Attempt a phase transition with validation.
    pub fn transition_to(&mut self, next: PodPhase) -> HyperpodResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(HyperpodError::Internal(format!(
                "pod {}: cannot transition from {} to {}",
                self.id, self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Append a container entry during reconciliation.
    pub fn add_container(&mut self, id: String, name: String, image: String, cmd: Vec<String>) {
        self.containers
            .push(ContainerStatus::new(id, name, image, cmd));
    }

    /// Record per-container exit codes from a pod-finished event.
    ///
    /// Codes are positional; a missing code leaves the container untouched.
    pub fn set_exit_codes(&mut self, codes: &[u32]) {
        for (c, code) in self.containers.iter_mut().zip(codes) {
            c.exit_code = Some(*code);
            c.phase = if *code == 0 {
                ContainerPhase::Succeeded
            } else {
                ContainerPhase::Failed
            };
        }
        if self.containers.iter().any(|c| c.phase == ContainerPhase::Failed) {
            self.phase = PodPhase::Failed;
        }
    }

    /// Mark every container with the given phase.
    pub fn set_container_phase(&mut self, phase: ContainerPhase) {
        for c in &mut self.containers {
            c.phase = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_is_running() {
        assert!(!PodPhase::Created.is_running());
        assert!(PodPhase::Running.is_running());
        assert!(!PodPhase::Succeeded.is_running());
        assert!(!PodPhase::Failed.is_running());
    }

    #[test]
    fn test_phase_is_terminal() {
        assert!(!PodPhase::Created.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(PodPhase::Created.can_transition_to(PodPhase::Running));
        assert!(PodPhase::Running.can_transition_to(PodPhase::Succeeded));
        assert!(PodPhase::Running.can_transition_to(PodPhase::Failed));
        assert!(PodPhase::Succeeded.can_transition_to(PodPhase::Running));
        assert!(PodPhase::Failed.can_transition_to(PodPhase::Running));

        assert!(!PodPhase::Created.can_transition_to(PodPhase::Succeeded));
        assert!(!PodPhase::Created.can_transition_to(PodPhase::Failed));
        assert!(!PodPhase::Running.can_transition_to(PodPhase::Created));
        assert!(!PodPhase::Succeeded.can_transition_to(PodPhase::Failed));
    }

    #[test]
    fn test_status_transition() {
        let mut status = PodStatus::new(
            "pod-a".into(),
            PodType::Normal,
            RestartPolicy::Never,
            false,
            PathBuf::from("/tmp/pod-a"),
        );
        assert_eq!(status.phase, PodPhase::Created);

        status.transition_to(PodPhase::Running).unwrap();
        assert_eq!(status.phase, PodPhase::Running);

        status.transition_to(PodPhase::Succeeded).unwrap();
        assert_eq!(status.phase, PodPhase::Succeeded);
    }

    #[test]
    fn test_invalid_transition_keeps_phase() {
        let mut status = PodStatus::new(
            "pod-a".into(),
            PodType::Normal,
            RestartPolicy::Never,
            false,
            PathBuf::from("/tmp/pod-a"),
        );
        assert!(status.transition_to(PodPhase::Succeeded).is_err());
        assert_eq!(status.phase, PodPhase::Created);
    }

    #[test]
    fn test_set_exit_codes() {
        let mut status = PodStatus::new(
            "pod-a".into(),
            PodType::Normal,
            RestartPolicy::Never,
            false,
            PathBuf::from("/tmp/pod-a"),
        );
        status.add_container("c1".into(), "one".into(), "img".into(), vec![]);
        status.add_container("c2".into(), "two".into(), "img".into(), vec![]);
        status.phase = PodPhase::Running;

        status.set_exit_codes(&[0, 2]);

        assert_eq!(status.containers[0].phase, ContainerPhase::Succeeded);
        assert_eq!(status.containers[0].exit_code, Some(0));
        assert_eq!(status.containers[1].phase, ContainerPhase::Failed);
        assert_eq!(status.containers[1].exit_code, Some(2));
        assert_eq!(status.phase, PodPhase::Failed);
    }

    #[test]
    fn test_set_exit_codes_all_zero_keeps_phase() {
        let mut status = PodStatus::new(
            "pod-a".into(),
            PodType::Normal,
            RestartPolicy::Never,
            false,
            PathBuf::from("/tmp/pod-a"),
        );
        status.add_container("c1".into(), "one".into(), "img".into(), vec![]);
        status.phase = PodPhase::Running;

        status.set_exit_codes(&[0]);

        assert_eq!(status.containers[0].phase, ContainerPhase::Succeeded);
        assert_eq!(status.phase, PodPhase::Running);
    }
}
