//! User-facing pod specification.
//!
//! A [`PodSpec`] is the declarative template a caller submits. After
//! validation the daemon derives a *resolved* spec from it (preprocessing and
//! reconciliation add synthesized volumes, files, and containers); the
//! submitted value itself is never mutated.

use std::collections::{HashMap, HashSet};

use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use serde::{Deserialize, Serialize};

/// How a pod is scheduled and restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PodType {
    /// Plain pod, no restart policy handling.
    #[default]
    Normal,
    /// Kubernetes-managed pod; restart policy applies on termination.
    Kubernetes,
    /// Pod fronted by a service-discovery proxy sidecar (container 0).
    ServiceDiscovery,
}

/// Restart policy for kubernetes-typed pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    Never,
    Always,
    OnFailure,
}

/// VM sizing carried by the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodResource {
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
}

fn default_vcpus() -> u32 {
    1
}

fn default_memory_mib() -> u32 {
    128
}

impl Default for PodResource {
    fn default() -> Self {
        Self {
            vcpus: default_vcpus(),
            memory_mib: default_memory_mib(),
        }
    }
}

/// One environment entry of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Reference from a container to a pod-level volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRef {
    /// Name of the pod-level volume.
    pub volume: String,
    /// Mount path inside the container.
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Reference from a container to a pod-level file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileRef {
    /// Name of the pod-level file.
    pub filename: String,
    /// Target path inside the container. A trailing `/` means "directory";
    /// the file name is appended at injection time.
    pub path: String,
    /// Octal permission string, e.g. `"0644"`.
    #[serde(default)]
    pub perm: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub group: String,
}

/// One container of the pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub envs: Vec<EnvVar>,
    #[serde(default)]
    pub volumes: Vec<VolumeRef>,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub tty: bool,
}

/// A pod-level volume declaration.
///
/// `source` is empty until the provisioner creates the volume; once
/// populated it is never recomputed for the pod's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub fstype: String,
}

/// A pod-level file declaration, injected into container filesystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileSpec {
    pub name: String,
    /// `file://` (always) or `http(s)://` (with the `remote-files` feature)
    /// source. Mutually exclusive with `contents`.
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub contents: String,
    /// `"raw"` (default) or `"base64"`.
    #[serde(default)]
    pub encoding: String,
}

/// One service exported through the discovery proxy sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub virtual_ip: String,
    pub port: u16,
    pub backends: Vec<ServiceBackend>,
}

/// A single backend of a [`ServiceSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBackend {
    pub host: String,
    pub port: u16,
}

/// Log driver selection and options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LogConfig {
    /// Driver type, e.g. `"json-file"`. `"none"` disables logging, empty
    /// means "use the daemon default".
    #[serde(rename = "type", default)]
    pub driver: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl LogConfig {
    pub fn is_disabled(&self) -> bool {
        self.driver == "none"
    }
}

/// The pod specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PodSpec {
    /// Assigned by the daemon at creation; callers normally leave it empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub log_config: LogConfig,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub pod_type: PodType,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub resource: PodResource,
}

impl PodSpec {
    /// Parse a persisted spec record.
    pub fn from_json(raw: &str) -> HyperpodResult<Self> {
        let spec: PodSpec = serde_json::from_str(raw)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_json(&self) -> HyperpodResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Validate the user-supplied template.
    ///
    /// Checks the structural rules only; cross-resource resolution (volume
    /// sources, mount ids) happens later in the pipeline.
    pub fn validate(&self) -> HyperpodResult<()> {
        if self.name.is_empty() {
            return Err(HyperpodError::Validation("pod name is empty".into()));
        }

        if self.containers.is_empty() {
            return Err(HyperpodError::Validation(format!(
                "pod {} declares no containers",
                self.name
            )));
        }

        let mut container_names = HashSet::new();
        for c in &self.containers {
            if c.image.is_empty() {
                return Err(HyperpodError::Validation(format!(
                    "container {} has no image",
                    c.name
                )));
            }
            if !c.name.is_empty() && !container_names.insert(c.name.as_str()) {
                return Err(HyperpodError::Validation(format!(
                    "duplicate container name {}",
                    c.name
                )));
            }
        }

        let mut volume_names = HashSet::new();
        for v in &self.volumes {
            if v.name.is_empty() {
                return Err(HyperpodError::Validation("volume with empty name".into()));
            }
            if !volume_names.insert(v.name.as_str()) {
                return Err(HyperpodError::Validation(format!(
                    "duplicate volume name {}",
                    v.name
                )));
            }
        }

        let mut file_names = HashSet::new();
        for f in &self.files {
            if f.name.is_empty() {
                return Err(HyperpodError::Validation("file with empty name".into()));
            }
            if !file_names.insert(f.name.as_str()) {
                return Err(HyperpodError::Validation(format!(
                    "duplicate file name {}",
                    f.name
                )));
            }
            if !f.uri.is_empty() && !f.contents.is_empty() {
                return Err(HyperpodError::Validation(format!(
                    "file {} declares both uri and contents",
                    f.name
                )));
            }
        }

        for c in &self.containers {
            for vref in &c.volumes {
                if !volume_names.contains(vref.volume.as_str()) {
                    return Err(HyperpodError::Validation(format!(
                        "container {} references undeclared volume {}",
                        c.name, vref.volume
                    )));
                }
            }
            for fref in &c.files {
                if !file_names.contains(fref.filename.as_str()) {
                    return Err(HyperpodError::Validation(format!(
                        "container {} references undeclared file {}",
                        c.name, fref.filename
                    )));
                }
            }
        }

        Ok(())
    }

    /// Pod-scoped engine name of a spec container.
    ///
    /// Containers are created under `<pod-id>-<name>` so entries from a
    /// prior run of the same pod can be found again by name.
    pub fn scoped_container_name(&self, container: &ContainerSpec) -> String {
        if container.name.is_empty() {
            format!("{}-{}", self.id, container.image.replace(['/', ':'], "-"))
        } else {
            format!("{}-{}", self.id, container.name)
        }
    }
}
