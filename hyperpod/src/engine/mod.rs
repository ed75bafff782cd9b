//! Container engine trait.
//!
//! The engine owns image and container storage; the daemon only creates,
//! inspects, and removes named containers through this seam. Embedded and
//! remote engines are alternate implementations of the same trait — the pod
//! pipeline exists once, written against it.

use std::collections::HashMap;

use async_trait::async_trait;
use hyperpod_shared::errors::HyperpodResult;

/// Creation parameters for one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub image: String,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    /// The pod pipeline always disables engine networking; the VM layer
    /// provides the pod's network.
    pub network_disabled: bool,
}

/// Inspection result for an engine container.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    /// Engine-side name; may carry a leading `/`.
    pub name: String,
    pub image: String,
    pub working_dir: String,
    /// Resolved executable (entrypoint head after image defaults applied).
    pub path: String,
    /// Resolved arguments following `path`.
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` entries, image defaults included.
    pub env: Vec<String>,
    /// Mount points declared by the image (anonymous volumes).
    pub image_volumes: Vec<String>,
}

impl ContainerDetails {
    /// Engine name with the leading `/` stripped.
    pub fn plain_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// Environment parsed into a map.
    pub fn env_map(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .filter_map(|kv| {
                kv.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect()
    }

    /// Resolved command: `path` followed by `args`.
    pub fn resolved_cmd(&self) -> Vec<String> {
        let mut cmd = Vec::with_capacity(1 + self.args.len());
        cmd.push(self.path.clone());
        cmd.extend(self.args.iter().cloned());
        cmd
    }
}

/// The container engine seam.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a container and return its id.
    async fn create_container(
        &self,
        name: &str,
        config: ContainerConfig,
    ) -> HyperpodResult<String>;

    /// Inspect a container by id.
    async fn inspect_container(&self, id: &str) -> HyperpodResult<ContainerDetails>;

    /// Remove a container by id.
    async fn remove_container(&self, id: &str) -> HyperpodResult<()>;

    /// Ids of the containers previously created for a pod, if any.
    async fn list_pod_containers(&self, pod_id: &str) -> HyperpodResult<Vec<String>>;
}
