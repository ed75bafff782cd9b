//! Per-pod log binding.
//!
//! Resolves the effective log configuration, creates one driver per
//! container before the VM-level start, and wires copiers from the VM's live
//! output streams into the drivers. A single invalid option aborts before
//! any container gets a driver, so a pod is never partially configured.

use rand::Rng;
use rand::distr::Alphanumeric;

use hyperpod_shared::errors::HyperpodResult;

use crate::logdriver::{LogContext, LogCopier, LogDriverRegistry, jsonfile};
use crate::pod::Pod;
use crate::pod::spec::LogConfig;
use crate::vm::VmHandle;

/// Pod-declared configuration, falling back to the daemon default.
pub(crate) fn effective_config(spec_config: &LogConfig, default: &LogConfig) -> LogConfig {
    if spec_config.driver.is_empty() {
        default.clone()
    } else {
        spec_config.clone()
    }
}

/// Create a log driver for every container that lacks one.
///
/// Options are validated against the driver's accepted set before any
/// driver instance is allocated.
pub(crate) fn bind_drivers(
    pod: &Pod,
    registry: &LogDriverRegistry,
    default: &LogConfig,
) -> HyperpodResult<()> {
    let spec = pod.spec();
    let config = effective_config(&spec.log_config, default);
    if config.is_disabled() {
        return Ok(());
    }

    let needs: Vec<usize> = pod.with_status(|status| {
        status
            .containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.logs.driver.is_none())
            .map(|(idx, _)| idx)
            .collect()
    });
    if needs.is_empty() {
        return Ok(());
    }

    let factory = registry.get(&config.driver)?;
    factory.validate_options(&config.options)?;
    tracing::debug!(pod_id = %pod.id(), driver = %config.driver, "configuring log driver");

    let start_infos = pod.start_info();
    let resource_path = pod.with_status(|status| status.resource_path.clone());

    for idx in needs {
        let (container_id, container_name, container_image, created) =
            pod.with_status(|status| {
                let c = &status.containers[idx];
                (
                    c.id.clone(),
                    c.name.clone(),
                    c.image.clone(),
                    status.created_at,
                )
            });

        let mut ctx = LogContext {
            container_id: container_id.clone(),
            container_name,
            container_image,
            options: config.options.clone(),
            created: Some(created),
            ..Default::default()
        };
        if let Some(info) = start_infos.get(idx) {
            ctx.cmd = info.cmd.clone();
            ctx.workdir = info.workdir.clone();
        }
        if config.driver == jsonfile::DRIVER_NAME {
            ctx.log_path = Some(resource_path.join(format!("{}-json.log", container_id)));
        }

        let driver = factory.create(ctx)?;
        pod.with_status_mut(|status| {
            let c = &mut status.containers[idx];
            c.logs.log_path = driver.log_path();
            c.logs.driver = Some(driver);
        });
        tracing::debug!(
            pod_id = %pod.id(),
            container_id = %container_id,
            "configured logger"
        );
    }

    Ok(())
}

/// Bind drivers and start one copier per container from the VM's live
/// stdout/stderr streams. Copiers only start once their driver exists.
pub(crate) async fn start_logging(
    pod: &Pod,
    vm: &dyn VmHandle,
    registry: &LogDriverRegistry,
    default: &LogConfig,
) -> HyperpodResult<()> {
    bind_drivers(pod, registry, default)?;

    let spec = pod.spec();
    if effective_config(&spec.log_config, default).is_disabled() {
        return Ok(());
    }

    let container_count = pod.with_status(|status| status.containers.len());
    for idx in 0..container_count {
        let (container_id, driver) = pod.with_status(|status| {
            let c = &status.containers[idx];
            (c.id.clone(), c.logs.driver.clone())
        });
        let Some(driver) = driver else { continue };

        let tag = format!("log-{}", random_tag(8));
        let (stdout, stderr) = vm.log_output(&container_id, &tag).await?;

        let mut copier = LogCopier::new(container_id.clone(), stdout, stderr, driver);
        copier.run();
        pod.with_status_mut(|status| {
            status.containers[idx].logs.copier = Some(copier);
        });
    }

    Ok(())
}

fn random_tag(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
