//! In-memory pod store.

use std::collections::HashMap;

use hyperpod::store::PodStore;
use hyperpod_shared::errors::HyperpodResult;
use parking_lot::Mutex;

#[derive(Default)]
struct StoreState {
    pods: HashMap<String, String>,
    containers: HashMap<String, Vec<String>>,
    volumes: HashMap<String, Vec<(String, String)>>,
}

/// Pod store fake with inspection helpers.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pod(&self, id: &str) -> bool {
        self.state.lock().pods.contains_key(id)
    }

    pub fn container_records(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn volume_records(&self, id: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .volumes
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

impl PodStore for MemoryStore {
    fn write_pod(&self, id: &str, spec_json: &str) -> HyperpodResult<()> {
        self.state
            .lock()
            .pods
            .insert(id.to_string(), spec_json.to_string());
        Ok(())
    }

    fn read_pod(&self, id: &str) -> HyperpodResult<Option<String>> {
        Ok(self.state.lock().pods.get(id).cloned())
    }

    fn delete_pod(&self, id: &str) -> HyperpodResult<()> {
        self.state.lock().pods.remove(id);
        Ok(())
    }

    fn write_pod_containers(&self, id: &str, container_ids: &[String]) -> HyperpodResult<()> {
        self.state
            .lock()
            .containers
            .insert(id.to_string(), container_ids.to_vec());
        Ok(())
    }

    fn read_pod_containers(&self, id: &str) -> HyperpodResult<Vec<String>> {
        Ok(self.container_records(id))
    }

    fn delete_pod_containers(&self, id: &str) -> HyperpodResult<()> {
        self.state.lock().containers.remove(id);
        Ok(())
    }

    fn write_volume(&self, pod_id: &str, name: &str, source: &str) -> HyperpodResult<()> {
        self.state
            .lock()
            .volumes
            .entry(pod_id.to_string())
            .or_default()
            .push((name.to_string(), source.to_string()));
        Ok(())
    }

    fn delete_volumes(&self, pod_id: &str) -> HyperpodResult<()> {
        self.state.lock().volumes.remove(pod_id);
        Ok(())
    }
}
