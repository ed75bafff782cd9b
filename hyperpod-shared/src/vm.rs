//! VM wire types.
//!
//! These types cross the boundary between the daemon and a hypervisor
//! backend: the response envelope returned by pod start/stop calls and
//! delivered on the per-VM event channel, plus the keep-mode and VM status
//! enums the event state machine dispatches on.

use serde::{Deserialize, Serialize};

/// What happens to a VM after the pod running in it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeepMode {
    /// Discard the VM when the pod terminates.
    #[default]
    None,
    /// Keep the VM idle after the pod finishes so another pod can reuse it.
    AfterFinish,
    /// Keep the VM alive even across explicit pod stops.
    Alive,
}

impl KeepMode {
    /// Whether the VM survives pod completion.
    pub fn keeps_vm(&self) -> bool {
        !matches!(self, KeepMode::None)
    }
}

/// Coarse VM-level status, owned by the hypervisor subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    /// VM is booted but no pod is running in it.
    Idle,
    /// VM is running a pod.
    Running,
    /// VM has shut down.
    Shutdown,
}

/// Event / response codes emitted by a hypervisor backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VmEventCode {
    /// Operation acknowledged.
    Ok,
    /// All containers of the pod exited; the VM may stay up.
    PodFinished,
    /// The pod was stopped but the VM was kept for reuse.
    PodStopped,
    /// The VM itself shut down.
    VmShutdown,
    /// Backend-reported failure.
    Failed,
}

/// Payload attached to a [`VmResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmData {
    /// Opaque acknowledgement payload from a pod start.
    Ack(Vec<u8>),
    /// Per-container exit codes, order-matching the pod's containers.
    ExitCodes(Vec<u32>),
}

/// Response envelope from hypervisor calls and the per-VM event channel.
#[derive(Debug, Clone)]
pub struct VmResponse {
    pub code: VmEventCode,
    pub cause: String,
    pub data: Option<VmData>,
}

impl VmResponse {
    pub fn ok(data: Option<VmData>) -> Self {
        Self {
            code: VmEventCode::Ok,
            cause: String::new(),
            data,
        }
    }

    pub fn event(code: VmEventCode) -> Self {
        Self {
            code,
            cause: String::new(),
            data: None,
        }
    }

    pub fn failed(cause: impl Into<String>) -> Self {
        Self {
            code: VmEventCode::Failed,
            cause: cause.into(),
            data: None,
        }
    }

    /// Exit codes carried by a pod-finished event, if any.
    pub fn exit_codes(&self) -> Option<&[u32]> {
        match &self.data {
            Some(VmData::ExitCodes(codes)) => Some(codes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_mode_keeps_vm() {
        assert!(!KeepMode::None.keeps_vm());
        assert!(KeepMode::AfterFinish.keeps_vm());
        assert!(KeepMode::Alive.keeps_vm());
    }

    #[test]
    fn test_exit_codes_accessor() {
        let resp = VmResponse {
            code: VmEventCode::PodFinished,
            cause: String::new(),
            data: Some(VmData::ExitCodes(vec![0, 1])),
        };
        assert_eq!(resp.exit_codes(), Some(&[0u32, 1][..]));
        assert_eq!(VmResponse::event(VmEventCode::VmShutdown).exit_codes(), None);
    }
}
