//! In-memory container engine fake.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use hyperpod::engine::{ContainerConfig, ContainerDetails, ContainerEngine};
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use parking_lot::Mutex;

/// One fake engine container.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub config: ContainerConfig,
}

#[derive(Default)]
struct EngineState {
    containers: HashMap<String, FakeContainer>,
    created_order: Vec<String>,
    removed: Vec<String>,
    next_id: u64,
    fail_create_names: HashSet<String>,
    image_volumes: HashMap<String, Vec<String>>,
    image_env: HashMap<String, Vec<String>>,
}

/// Container engine fake. Seeds a mount-id file under the storage root for
/// every created container so mount-id resolution succeeds.
pub struct FakeEngine {
    storage_root: PathBuf,
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new(storage_root: PathBuf) -> Self {
        Self {
            storage_root,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Make creation of the container with this engine name fail.
    pub fn fail_create(&self, name: &str) {
        self.state.lock().fail_create_names.insert(name.to_string());
    }

    /// Declare anonymous volumes for an image.
    pub fn set_image_volumes(&self, image: &str, volumes: &[&str]) {
        self.state.lock().image_volumes.insert(
            image.to_string(),
            volumes.iter().map(|v| v.to_string()).collect(),
        );
    }

    /// Declare default environment entries for an image.
    pub fn set_image_env(&self, image: &str, env: &[&str]) {
        self.state
            .lock()
            .image_env
            .insert(image.to_string(), env.iter().map(|e| e.to_string()).collect());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().containers.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Ids of every container created over the fake's lifetime, in order.
    pub fn created_ids(&self) -> Vec<String> {
        self.state.lock().created_order.clone()
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    fn seed_mount_id(&self, container_id: &str) -> HyperpodResult<()> {
        let dir = self
            .storage_root
            .join("image/overlay/layerdb/mounts")
            .join(container_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("mount-id"), format!("mnt-{}\n", container_id))?;
        Ok(())
    }

    fn details(&self, container: &FakeContainer, state: &EngineState) -> ContainerDetails {
        let (path, args) = if !container.config.entrypoint.is_empty() {
            let mut args = container.config.entrypoint[1..].to_vec();
            args.extend(container.config.command.iter().cloned());
            (container.config.entrypoint[0].clone(), args)
        } else if !container.config.command.is_empty() {
            (
                container.config.command[0].clone(),
                container.config.command[1..].to_vec(),
            )
        } else {
            ("/bin/sh".to_string(), Vec::new())
        };

        ContainerDetails {
            id: container.id.clone(),
            name: format!("/{}", container.name),
            image: container.config.image.clone(),
            working_dir: "/".to_string(),
            path,
            args,
            env: state
                .image_env
                .get(&container.config.image)
                .cloned()
                .unwrap_or_else(|| vec!["PATH=/usr/local/bin:/usr/bin:/bin".to_string()]),
            image_volumes: state
                .image_volumes
                .get(&container.config.image)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn create_container(
        &self,
        name: &str,
        config: ContainerConfig,
    ) -> HyperpodResult<String> {
        let id = {
            let mut state = self.state.lock();
            if state.fail_create_names.contains(name) {
                return Err(HyperpodError::Engine(format!(
                    "injected create failure for {}",
                    name
                )));
            }
            state.next_id += 1;
            let id = format!("ctr-{:04}", state.next_id);
            state.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    name: name.to_string(),
                    config,
                },
            );
            state.created_order.push(id.clone());
            id
        };
        self.seed_mount_id(&id)?;
        Ok(id)
    }

    async fn inspect_container(&self, id: &str) -> HyperpodResult<ContainerDetails> {
        let state = self.state.lock();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| HyperpodError::NotFound(format!("container {} not found", id)))?;
        Ok(self.details(container, &state))
    }

    async fn remove_container(&self, id: &str) -> HyperpodResult<()> {
        let mut state = self.state.lock();
        state
            .containers
            .remove(id)
            .ok_or_else(|| HyperpodError::NotFound(format!("container {} not found", id)))?;
        state.removed.push(id.to_string());
        Ok(())
    }

    async fn list_pod_containers(&self, pod_id: &str) -> HyperpodResult<Vec<String>> {
        let prefix = format!("{}-", pod_id);
        let state = self.state.lock();
        Ok(state
            .created_order
            .iter()
            .filter(|id| {
                state
                    .containers
                    .get(*id)
                    .is_some_and(|c| c.name.starts_with(&prefix))
            })
            .cloned()
            .collect())
    }
}
