//! Spec preprocessing.
//!
//! Runs once at pod creation and produces the *resolved* spec the rest of
//! the pipeline operates on; the caller's submitted spec is left untouched.
//! Steps run in order and short-circuit on error:
//!
//! 1. expand service-discovery declarations into the proxy sidecar,
//! 2. synthesize the service configuration file,
//! 3. inject `/etc/hosts` as a shared volume,
//! 4. inject the host's resolv.conf as per-container file references.
//!
//! Hosts/DNS injection runs after service expansion so the sidecar receives
//! host and DNS files like any other container.

use std::path::PathBuf;

use hyperpod_shared::constants::{guest_paths, reserved};
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};

use crate::daemon::constants::images;
use crate::pod::spec::{
    ContainerSpec, FileRef, FileSpec, PodSpec, PodType, ServiceSpec, VolumeRef, VolumeSpec,
};

/// Environment the preprocessor works against. The host resolv.conf path is
/// a parameter so tests can point it at a fixture.
#[derive(Debug, Clone)]
pub struct PreprocessEnv {
    /// Per-pod on-disk scratch directory (already created).
    pub resource_path: PathBuf,
    /// Host resolver configuration, normally `/etc/resolv.conf`.
    pub resolv_conf: PathBuf,
}

impl PreprocessEnv {
    pub fn new(resource_path: PathBuf) -> Self {
        Self {
            resource_path,
            resolv_conf: PathBuf::from(guest_paths::RESOLV_CONF),
        }
    }
}

/// Produce the resolved spec for a validated user spec.
pub fn preprocess(spec: &PodSpec, env: &PreprocessEnv) -> HyperpodResult<PodSpec> {
    let mut resolved = spec.clone();

    expand_services(&mut resolved)?;
    setup_service_files(&mut resolved, env)?;
    setup_etc_hosts(&mut resolved, env)?;
    setup_dns(&mut resolved, env)?;

    Ok(resolved)
}

const SIDECAR_NAME: &str = "service-discovery";

/// Insert the service-discovery proxy sidecar as container 0 and tag the
/// pod type. Re-running on an already-expanded (persisted) spec is a no-op.
fn expand_services(spec: &mut PodSpec) -> HyperpodResult<()> {
    if spec.services.is_empty() {
        return Ok(());
    }

    if spec
        .containers
        .first()
        .is_some_and(|c| c.name == SIDECAR_NAME)
    {
        spec.pod_type = PodType::ServiceDiscovery;
        return Ok(());
    }

    tracing::debug!(pod_id = %spec.id, services = spec.services.len(), "expanding service discovery");
    spec.containers.insert(
        0,
        ContainerSpec {
            name: SIDECAR_NAME.to_string(),
            image: images::SERVICE_PROXY.to_string(),
            ..Default::default()
        },
    );
    spec.pod_type = PodType::ServiceDiscovery;
    Ok(())
}

/// Write the proxy configuration under the pod resource dir and mount it
/// into the sidecar.
fn setup_service_files(spec: &mut PodSpec, env: &PreprocessEnv) -> HyperpodResult<()> {
    if spec.services.is_empty() {
        return Ok(());
    }

    let services_dir = env.resource_path.join("services");
    std::fs::create_dir_all(&services_dir)?;
    let config_path = services_dir.join("proxy.cfg");
    std::fs::write(&config_path, render_proxy_config(&spec.services))?;

    if !spec.volumes.iter().any(|v| v.name == reserved::SERVICE_VOLUME) {
        spec.volumes.push(VolumeSpec {
            name: reserved::SERVICE_VOLUME.to_string(),
            source: services_dir.to_string_lossy().into_owned(),
            driver: "vfs".to_string(),
            fstype: String::new(),
        });
    }

    let sidecar = spec
        .containers
        .first_mut()
        .ok_or_else(|| HyperpodError::Validation("service pod has no sidecar".into()))?;
    if !sidecar
        .volumes
        .iter()
        .any(|v| v.volume == reserved::SERVICE_VOLUME)
    {
        sidecar.volumes.push(VolumeRef {
            volume: reserved::SERVICE_VOLUME.to_string(),
            path: guest_paths::SERVICE_CONFIG_DIR.to_string(),
            read_only: false,
        });
    }

    Ok(())
}

fn render_proxy_config(services: &[ServiceSpec]) -> String {
    let mut out = String::from("global\n    daemon\n\ndefaults\n    mode tcp\n");
    for (idx, svc) in services.iter().enumerate() {
        out.push_str(&format!(
            "\nlisten service-{}\n    bind {}:{}\n",
            idx, svc.virtual_ip, svc.port
        ));
        for (b, backend) in svc.backends.iter().enumerate() {
            out.push_str(&format!(
                "    server backend-{} {}:{}\n",
                b, backend.host, backend.port
            ));
        }
    }
    out
}

/// Write the pod-scoped hosts file on first use and return its path.
fn prepare_hosts(env: &PreprocessEnv) -> HyperpodResult<PathBuf> {
    std::fs::create_dir_all(&env.resource_path)?;
    let hosts_path = env.resource_path.join("hosts");
    if !hosts_path.exists() {
        std::fs::write(&hosts_path, "127.0.0.1 localhost\n::1 localhost\n")?;
    }
    Ok(hosts_path)
}

/// Share one hosts file into every container that does not already declare a
/// volume or file at `/etc/hosts`.
fn setup_etc_hosts(spec: &mut PodSpec, env: &PreprocessEnv) -> HyperpodResult<()> {
    let hosts_path = guest_paths::ETC_HOSTS;
    let mut host_volume_added = false;

    for idx in 0..spec.containers.len() {
        let c = &spec.containers[idx];
        let covered = c.volumes.iter().any(|v| v.path == hosts_path)
            || c.files.iter().any(|f| f.path == hosts_path);
        if covered {
            continue;
        }

        if !host_volume_added
            && !spec.volumes.iter().any(|v| v.name == reserved::HOSTS_VOLUME)
        {
            let hosts_file = prepare_hosts(env)?;
            spec.volumes.push(VolumeSpec {
                name: reserved::HOSTS_VOLUME.to_string(),
                source: hosts_file.to_string_lossy().into_owned(),
                driver: "vfs".to_string(),
                fstype: String::new(),
            });
        }
        host_volume_added = true;

        spec.containers[idx].volumes.push(VolumeRef {
            volume: reserved::HOSTS_VOLUME.to_string(),
            path: hosts_path.to_string(),
            read_only: false,
        });
    }

    Ok(())
}

/// Inject the host's resolv.conf into each container, unless:
///
/// - the pod declares DNS servers (the pod follows its own DNS setup),
/// - the host file is missing or not a regular file,
/// - the user supplies a file sourced from exactly the host resolv.conf
///   (their way of opting out), or
/// - a container declares its own `/etc/resolv.conf` file (that container
///   is left alone).
fn setup_dns(spec: &mut PodSpec, env: &PreprocessEnv) -> HyperpodResult<()> {
    let resolv_target = guest_paths::RESOLV_CONF;
    let file_id = format!("{}-resolvconf", spec.id);
    let host_uri = format!("file://{}", env.resolv_conf.display());

    if !spec.dns.is_empty() {
        tracing::debug!(pod_id = %spec.id, "pod declares DNS servers, skipping resolv.conf insert");
        return Ok(());
    }

    match std::fs::metadata(&env.resolv_conf) {
        Ok(meta) if meta.is_file() => {}
        _ => {
            tracing::debug!(
                pod_id = %spec.id,
                "host resolv.conf missing or not a regular file, skipping insert"
            );
            return Ok(());
        }
    }

    if spec.files.iter().any(|f| f.uri == host_uri) {
        tracing::debug!(pod_id = %spec.id, "user already sources host resolv.conf, skipping insert");
        return Ok(());
    }

    spec.files.push(FileSpec {
        name: file_id.clone(),
        uri: host_uri,
        contents: String::new(),
        encoding: "raw".to_string(),
    });

    for c in &mut spec.containers {
        if c.files.iter().any(|f| f.path == resolv_target) {
            continue;
        }
        c.files.push(FileRef {
            filename: file_id.clone(),
            path: resolv_target.to_string(),
            perm: "0644".to_string(),
            user: String::new(),
            group: String::new(),
        });
    }

    Ok(())
}
