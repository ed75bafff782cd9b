//! Storage backend trait and mount-id resolution.
//!
//! The backend owns the overlay/devicemapper mechanics; the daemon only asks
//! it to create volumes, prepare container layers for a VM shared directory,
//! and inject files into a container's writable layer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};

use crate::pod::spec::VolumeSpec;

/// A resolved, host-visible volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    /// Host path (directory for vfs-style drivers, device node for
    /// block-backed drivers).
    pub filepath: PathBuf,
    pub fstype: String,
}

/// A container layer prepared under a VM shared directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMountInfo {
    pub mount_id: String,
    /// Root of the container filesystem as seen from the shared dir.
    pub rootfs: PathBuf,
    pub fstype: String,
}

/// The storage seam.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Driver name, e.g. `"overlay"` or `"devicemapper"`.
    fn driver_name(&self) -> &str;

    /// Root of the backend's on-disk layout.
    fn root_path(&self) -> &Path;

    /// Whether volumes are raw block devices (no intermediate mount step).
    fn is_block_backed(&self) -> bool;

    /// Allocate a new volume owned by `pod_id`.
    async fn create_volume(&self, pod_id: &str, name: &str) -> HyperpodResult<VolumeInfo>;

    /// Probe an already-created volume and make it reachable under the VM
    /// shared directory.
    async fn probe_volume(
        &self,
        spec: &VolumeSpec,
        shared_dir: &Path,
    ) -> HyperpodResult<VolumeInfo>;

    /// Mount a container's layer under the VM shared directory.
    async fn prepare_container(
        &self,
        mount_id: &str,
        shared_dir: &Path,
    ) -> HyperpodResult<ContainerMountInfo>;

    /// Write `content` into the container's writable layer at `target`,
    /// creating parent directories and applying permission/owner bits.
    async fn inject_file(
        &self,
        content: &[u8],
        mount_id: &str,
        target: &Path,
        shared_dir: &Path,
        perm: u32,
        uid: u32,
        gid: u32,
    ) -> HyperpodResult<()>;
}

/// Resolve the storage mount id for an engine container.
///
/// The id lives at a deterministic path derived from the driver name and
/// container id. A missing id is fatal for pod creation: without it the VM
/// cannot mount the container's filesystem.
pub async fn mount_id_for_container(
    storage: &dyn StorageBackend,
    container_id: &str,
) -> HyperpodResult<String> {
    let id_path = storage
        .root_path()
        .join("image")
        .join(storage.driver_name())
        .join("layerdb/mounts")
        .join(container_id)
        .join("mount-id");

    let raw = tokio::fs::read_to_string(&id_path).await.map_err(|e| {
        HyperpodError::Storage(format!(
            "cannot find mount id for container {} at {}: {}",
            container_id,
            id_path.display(),
            e
        ))
    })?;

    Ok(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PathOnlyBackend {
        root: PathBuf,
    }

    #[async_trait]
    impl StorageBackend for PathOnlyBackend {
        fn driver_name(&self) -> &str {
            "overlay"
        }

        fn root_path(&self) -> &Path {
            &self.root
        }

        fn is_block_backed(&self) -> bool {
            false
        }

        async fn create_volume(&self, _: &str, _: &str) -> HyperpodResult<VolumeInfo> {
            unimplemented!()
        }

        async fn probe_volume(&self, _: &VolumeSpec, _: &Path) -> HyperpodResult<VolumeInfo> {
            unimplemented!()
        }

        async fn prepare_container(
            &self,
            _: &str,
            _: &Path,
        ) -> HyperpodResult<ContainerMountInfo> {
            unimplemented!()
        }

        async fn inject_file(
            &self,
            _: &[u8],
            _: &str,
            _: &Path,
            _: &Path,
            _: u32,
            _: u32,
            _: u32,
        ) -> HyperpodResult<()> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_mount_id_read_and_trimmed() {
        let home = tempfile::tempdir().unwrap();
        let backend = PathOnlyBackend {
            root: home.path().to_path_buf(),
        };
        let dir = home.path().join("image/overlay/layerdb/mounts/abc123");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("mount-id"), "deadbeef\n").unwrap();

        let id = mount_id_for_container(&backend, "abc123").await.unwrap();
        assert_eq!(id, "deadbeef");
    }

    #[tokio::test]
    async fn test_missing_mount_id_is_storage_error() {
        let home = tempfile::tempdir().unwrap();
        let backend = PathOnlyBackend {
            root: home.path().to_path_buf(),
        };
        let err = mount_id_for_container(&backend, "nope").await.unwrap_err();
        assert!(matches!(err, HyperpodError::Storage(_)));
    }
}
