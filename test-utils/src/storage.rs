//! In-memory storage backend fake.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hyperpod::pod::spec::VolumeSpec;
use hyperpod::storage::{ContainerMountInfo, StorageBackend, VolumeInfo};
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use parking_lot::Mutex;

/// Record of one injected file.
#[derive(Debug, Clone)]
pub struct InjectedFile {
    pub mount_id: String,
    pub target: PathBuf,
    pub content: Vec<u8>,
    pub perm: u32,
}

#[derive(Default)]
struct StorageState {
    created_volumes: Vec<(String, String)>,
    injected: Vec<InjectedFile>,
    prepared: Vec<String>,
    fail_volume_names: HashSet<String>,
}

/// Storage backend fake using real directories under a test root.
pub struct FakeStorage {
    root: PathBuf,
    state: Mutex<StorageState>,
}

impl FakeStorage {
    pub fn new(root: PathBuf) -> Self {
        std::fs::create_dir_all(&root).expect("failed to create fake storage root");
        Self {
            root,
            state: Mutex::new(StorageState::default()),
        }
    }

    /// Make creation of the named volume fail.
    pub fn fail_volume(&self, name: &str) {
        self.state.lock().fail_volume_names.insert(name.to_string());
    }

    /// `(pod_id, volume_name)` pairs created so far.
    pub fn created_volumes(&self) -> Vec<(String, String)> {
        self.state.lock().created_volumes.clone()
    }

    pub fn injected_files(&self) -> Vec<InjectedFile> {
        self.state.lock().injected.clone()
    }

    pub fn prepared_mounts(&self) -> Vec<String> {
        self.state.lock().prepared.clone()
    }
}

#[async_trait]
impl StorageBackend for FakeStorage {
    fn driver_name(&self) -> &str {
        "overlay"
    }

    fn root_path(&self) -> &Path {
        &self.root
    }

    fn is_block_backed(&self) -> bool {
        false
    }

    async fn create_volume(&self, pod_id: &str, name: &str) -> HyperpodResult<VolumeInfo> {
        {
            let state = self.state.lock();
            if state.fail_volume_names.contains(name) {
                return Err(HyperpodError::Storage(format!(
                    "injected volume failure for {}",
                    name
                )));
            }
        }

        let path = self.root.join("volumes").join(pod_id).join(name);
        std::fs::create_dir_all(&path)?;
        self.state
            .lock()
            .created_volumes
            .push((pod_id.to_string(), name.to_string()));
        Ok(VolumeInfo {
            name: name.to_string(),
            filepath: path,
            fstype: "dir".to_string(),
        })
    }

    async fn probe_volume(
        &self,
        spec: &VolumeSpec,
        _shared_dir: &Path,
    ) -> HyperpodResult<VolumeInfo> {
        Ok(VolumeInfo {
            name: spec.name.clone(),
            filepath: PathBuf::from(&spec.source),
            fstype: if spec.fstype.is_empty() {
                "dir".to_string()
            } else {
                spec.fstype.clone()
            },
        })
    }

    async fn prepare_container(
        &self,
        mount_id: &str,
        shared_dir: &Path,
    ) -> HyperpodResult<ContainerMountInfo> {
        let rootfs = shared_dir.join(mount_id).join("rootfs");
        std::fs::create_dir_all(&rootfs)?;
        self.state.lock().prepared.push(mount_id.to_string());
        Ok(ContainerMountInfo {
            mount_id: mount_id.to_string(),
            rootfs,
            fstype: "dir".to_string(),
        })
    }

    async fn inject_file(
        &self,
        content: &[u8],
        mount_id: &str,
        target: &Path,
        shared_dir: &Path,
        perm: u32,
        _uid: u32,
        _gid: u32,
    ) -> HyperpodResult<()> {
        let rel = target.strip_prefix("/").unwrap_or(target);
        let dest = shared_dir.join(mount_id).join("rootfs").join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, content)?;

        self.state.lock().injected.push(InjectedFile {
            mount_id: mount_id.to_string(),
            target: target.to_path_buf(),
            content: content.to_vec(),
            perm,
        });
        Ok(())
    }
}
