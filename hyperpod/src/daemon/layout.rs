//! On-disk layout of the daemon home directory.
//!
//! ```text
//! <home>/
//!   pods/<pod-id>/          per-pod resource (scratch) directory
//!   vms/<vm-id>/share_dir/  directory exported to the guest
//!   logs/                   daemon log files
//!   hyperpod.db             pod store
//! ```

use std::path::{Path, PathBuf};

use hyperpod_shared::constants::share;
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};

use crate::daemon::constants::dirs;

/// Resolves every path the daemon touches from the home directory.
#[derive(Debug, Clone)]
pub struct DaemonLayout {
    home: PathBuf,
}

impl DaemonLayout {
    pub fn new(home: PathBuf) -> Self {
        Self { home }
    }

    /// Create the directory skeleton.
    pub fn prepare(&self) -> HyperpodResult<()> {
        for dir in [self.pods_dir(), self.vms_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                HyperpodError::Storage(format!(
                    "failed to initialize {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    pub fn pods_dir(&self) -> PathBuf {
        self.home.join(dirs::PODS)
    }

    pub fn vms_dir(&self) -> PathBuf {
        self.home.join(dirs::VMS)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join(dirs::LOGS)
    }

    pub fn store_path(&self) -> PathBuf {
        self.home.join(dirs::STORE_FILE)
    }

    /// Per-pod on-disk scratch directory.
    pub fn resource_path(&self, pod_id: &str) -> PathBuf {
        self.pods_dir().join(pod_id)
    }

    /// Directory shared between the host and one VM's guest.
    pub fn vm_shared_dir(&self, vm_id: &str) -> PathBuf {
        self.vms_dir().join(vm_id).join(share::DIR_TAG)
    }
}
