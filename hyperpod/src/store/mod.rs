//! Persistent pod records.
//!
//! The lifecycle code treats persistence as an opaque record store: the pod
//! spec as one serialized blob per id, plus the container-id list and volume
//! records needed for restart and cleanup. The default implementation is
//! SQLite-backed; tests use an in-memory store.

mod sqlite;

pub use sqlite::SqliteStore;

use hyperpod_shared::errors::HyperpodResult;

/// Record store for pods, their container ids, and their volumes.
pub trait PodStore: Send + Sync {
    /// Write (or overwrite) the serialized spec for a pod.
    fn write_pod(&self, id: &str, spec_json: &str) -> HyperpodResult<()>;

    /// Read a pod's serialized spec, if present.
    fn read_pod(&self, id: &str) -> HyperpodResult<Option<String>>;

    fn delete_pod(&self, id: &str) -> HyperpodResult<()>;

    /// Replace the recorded container-id list for a pod.
    fn write_pod_containers(&self, id: &str, container_ids: &[String]) -> HyperpodResult<()>;

    fn read_pod_containers(&self, id: &str) -> HyperpodResult<Vec<String>>;

    fn delete_pod_containers(&self, id: &str) -> HyperpodResult<()>;

    /// Record a created volume for a pod.
    fn write_volume(&self, pod_id: &str, name: &str, source: &str) -> HyperpodResult<()>;

    fn delete_volumes(&self, pod_id: &str) -> HyperpodResult<()>;
}
