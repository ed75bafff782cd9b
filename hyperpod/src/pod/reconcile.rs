//! Container reconciliation.
//!
//! Maps the resolved spec's containers onto existing-or-new container engine
//! entries. Entries created by a previous run are reused by name (the engine
//! survives daemon restarts); missing ones are created with networking
//! disabled, since the VM layer provides the pod's network. A creation
//! failure rolls back every container created *by this call*, in reverse
//! order; reused containers are never rolled back.

use std::collections::HashMap;

use hyperpod_shared::errors::{HyperpodError, HyperpodResult};

use crate::engine::{ContainerConfig, ContainerDetails, ContainerEngine};
use crate::pod::spec::{PodSpec, VolumeRef, VolumeSpec};
use crate::storage::{ContainerMountInfo, StorageBackend, mount_id_for_container};

/// Reconciliation artifact for one container, consumed once at pod start.
#[derive(Debug, Clone, Default)]
pub struct ContainerStartInfo {
    /// Engine container id.
    pub container_id: String,
    /// Storage mount id (the VM mounts the container filesystem by it).
    pub mount_id: String,
    pub image: String,
    pub workdir: String,
    /// Resolved executable + arguments.
    pub cmd: Vec<String>,
    /// Engine env merged under spec env; spec entries win on collision.
    pub envs: HashMap<String, String>,
    /// Filled by Prepare once the layer is mounted under the shared dir.
    pub mount: Option<ContainerMountInfo>,
}

/// Result of reconciling one pod.
#[derive(Debug)]
pub struct Reconciliation {
    /// Resolved spec including synthesized implicit volumes.
    pub spec: PodSpec,
    /// Order-matching the spec's containers.
    pub start_infos: Vec<ContainerStartInfo>,
    /// Raw inspections, order-matching the spec's containers.
    pub details: Vec<ContainerDetails>,
}

/// Reconcile the resolved spec against the engine.
pub async fn reconcile(
    engine: &dyn ContainerEngine,
    storage: &dyn StorageBackend,
    spec: &PodSpec,
) -> HyperpodResult<Reconciliation> {
    let mut resolved = spec.clone();

    let mut slots = try_load_containers(engine, &resolved).await?;
    create_missing_containers(engine, &resolved, &mut slots).await?;
    let details = inspect_all(&resolved, slots)?;
    let start_infos = parse_details(storage, &mut resolved, &details).await?;

    Ok(Reconciliation {
        spec: resolved,
        start_infos,
        details,
    })
}

/// Index engine containers previously created for this pod by spec slot.
async fn try_load_containers(
    engine: &dyn ContainerEngine,
    spec: &PodSpec,
) -> HyperpodResult<Vec<Option<ContainerDetails>>> {
    let mut slots: Vec<Option<ContainerDetails>> = vec![None; spec.containers.len()];

    let ids = match engine.list_pod_containers(&spec.id).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::debug!(pod_id = %spec.id, "no prior containers loaded: {}", e);
            return Ok(slots);
        }
    };

    let name_index: HashMap<String, usize> = spec
        .containers
        .iter()
        .enumerate()
        .map(|(idx, c)| (spec.scoped_container_name(c), idx))
        .collect();

    for id in ids {
        let details = match engine.inspect_container(&id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(pod_id = %spec.id, container_id = %id, "failed to load container: {}", e);
                continue;
            }
        };
        match name_index.get(details.plain_name()) {
            Some(&idx) => {
                tracing::debug!(
                    pod_id = %spec.id,
                    container_id = %details.id,
                    name = %details.plain_name(),
                    "reusing existing container"
                );
                slots[idx] = Some(details);
            }
            None => {
                tracing::warn!(
                    pod_id = %spec.id,
                    container_id = %details.id,
                    name = %details.plain_name(),
                    "loaded container does not belong to this pod's spec"
                );
            }
        }
    }

    Ok(slots)
}

/// Create engine containers for every unfilled slot, rolling back this
/// call's creations on failure.
async fn create_missing_containers(
    engine: &dyn ContainerEngine,
    spec: &PodSpec,
    slots: &mut [Option<ContainerDetails>],
) -> HyperpodResult<()> {
    let mut created: Vec<String> = Vec::new();

    for (idx, c) in spec.containers.iter().enumerate() {
        if slots[idx].is_some() {
            tracing::debug!(pod_id = %spec.id, name = %c.name, "container already present, skipping create");
            continue;
        }

        let config = ContainerConfig {
            image: c.image.clone(),
            command: c.command.clone(),
            entrypoint: c.entrypoint.clone(),
            network_disabled: true,
        };
        let name = spec.scoped_container_name(c);

        let result = async {
            let id = engine.create_container(&name, config).await?;
            created.push(id.clone());
            tracing::info!(pod_id = %spec.id, container_id = %id, name = %name, "created container");
            engine.inspect_container(&id).await
        }
        .await;

        match result {
            Ok(details) => slots[idx] = Some(details),
            Err(e) => {
                rollback_created(engine, spec, &created).await;
                return Err(e);
            }
        }
    }

    Ok(())
}

async fn rollback_created(engine: &dyn ContainerEngine, spec: &PodSpec, created: &[String]) {
    for id in created.iter().rev() {
        tracing::info!(pod_id = %spec.id, container_id = %id, "rolling back container");
        if let Err(e) = engine.remove_container(id).await {
            tracing::warn!(pod_id = %spec.id, container_id = %id, "rollback failed: {}", e);
        }
    }
}

fn inspect_all(
    spec: &PodSpec,
    slots: Vec<Option<ContainerDetails>>,
) -> HyperpodResult<Vec<ContainerDetails>> {
    slots
        .into_iter()
        .zip(&spec.containers)
        .map(|(slot, c)| {
            slot.ok_or_else(|| {
                HyperpodError::Engine(format!(
                    "container {} of pod {} has no inspection result",
                    c.name, spec.id
                ))
            })
        })
        .collect()
}

/// Extract start infos and fold engine-derived data back into the resolved
/// spec.
async fn parse_details(
    storage: &dyn StorageBackend,
    spec: &mut PodSpec,
    details: &[ContainerDetails],
) -> HyperpodResult<Vec<ContainerStartInfo>> {
    let mut infos = Vec::with_capacity(details.len());

    for (idx, info) in details.iter().enumerate() {
        if spec.containers[idx].name.is_empty() {
            let prefix = format!("{}-", spec.id);
            spec.containers[idx].name = info
                .plain_name()
                .strip_prefix(&prefix)
                .unwrap_or(info.plain_name())
                .to_string();
        }
        if spec.containers[idx].image.is_empty() {
            spec.containers[idx].image = info.image.clone();
        }

        let mount_id = mount_id_for_container(storage, &info.id).await?;

        let mut envs = info.env_map();
        for e in &spec.containers[idx].envs {
            envs.insert(e.name.clone(), e.value.clone());
        }

        // The VM consumes the resolved command from the start info; the
        // spec's own command/entrypoint must not be applied a second time.
        spec.containers[idx].entrypoint.clear();
        spec.containers[idx].command.clear();

        synthesize_image_volumes(spec, idx, info);

        infos.push(ContainerStartInfo {
            container_id: info.id.clone(),
            mount_id,
            image: info.image.clone(),
            workdir: info.working_dir.clone(),
            cmd: info.resolved_cmd(),
            envs,
            mount: None,
        });
    }

    Ok(infos)
}

/// Back every image-declared mount point with a pod volume, unless the spec
/// already references one at that path.
fn synthesize_image_volumes(spec: &mut PodSpec, idx: usize, info: &ContainerDetails) {
    if info.image_volumes.is_empty() {
        return;
    }

    let existing: Vec<String> = spec.containers[idx]
        .volumes
        .iter()
        .map(|v| v.path.clone())
        .collect();

    for target in &info.image_volumes {
        if existing.iter().any(|p| p == target) {
            continue;
        }

        let name = format!("{}{}", info.id, target.replace('/', "_"));
        if !spec.volumes.iter().any(|v| v.name == name) {
            spec.volumes.push(VolumeSpec {
                name: name.clone(),
                source: String::new(),
                driver: String::new(),
                fstype: String::new(),
            });
        }
        spec.containers[idx].volumes.push(VolumeRef {
            volume: name,
            path: target.clone(),
            read_only: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::spec::ContainerSpec;

    #[test]
    fn test_synthesize_image_volumes_skips_covered_paths() {
        let mut spec = PodSpec {
            id: "pod-a".into(),
            name: "a".into(),
            containers: vec![ContainerSpec {
                name: "db".into(),
                image: "postgres".into(),
                volumes: vec![VolumeRef {
                    volume: "data".into(),
                    path: "/var/lib/postgresql/data".into(),
                    read_only: false,
                }],
                ..Default::default()
            }],
            volumes: vec![VolumeSpec {
                name: "data".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let info = ContainerDetails {
            id: "cid1".into(),
            image_volumes: vec!["/var/lib/postgresql/data".into(), "/scratch".into()],
            ..Default::default()
        };

        synthesize_image_volumes(&mut spec, 0, &info);

        assert_eq!(spec.volumes.len(), 2);
        assert_eq!(spec.volumes[1].name, "cid1_scratch");
        assert!(spec.volumes[1].source.is_empty());
        assert_eq!(spec.containers[0].volumes.len(), 2);
        assert_eq!(spec.containers[0].volumes[1].path, "/scratch");
        assert!(!spec.containers[0].volumes[1].read_only);
    }
}
