//! Hyperpod — a daemon that runs pods inside hypervisor-isolated VMs.
//!
//! A pod is a named group of containers scheduled together into one virtual
//! machine. The daemon reconciles a declarative [`pod::spec::PodSpec`]
//! against a container engine, provisions volumes and logging, binds the
//! pod to a VM, and reacts to asynchronous VM events to enforce restart
//! policy and cleanup.
//!
//! ## Architecture
//!
//! - [`daemon`]: the registry, options, and public surface
//! - [`pod`]: the pod entity and its lifecycle pipeline
//! - [`engine`], [`storage`], [`vm`], [`store`]: collaborator seams
//! - [`logdriver`]: log drivers and the output copier
//!
//! ```no_run
//! use std::sync::Arc;
//! use hyperpod::daemon::{Collaborators, Daemon, DaemonOptions, PodStartOptions};
//! # async fn example(collaborators: Collaborators) -> hyperpod_shared::HyperpodResult<()> {
//! let daemon = Daemon::new(DaemonOptions::default(), collaborators)?;
//! let spec = hyperpod::pod::spec::PodSpec {
//!     name: "web".into(),
//!     containers: vec![hyperpod::pod::spec::ContainerSpec {
//!         name: "nginx".into(),
//!         image: "nginx:latest".into(),
//!         ..Default::default()
//!     }],
//!     ..Default::default()
//! };
//! let pod = daemon.create_pod(None, spec, false).await?;
//! daemon.start_pod(pod.id(), PodStartOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod daemon;
pub mod engine;
pub mod logdriver;
mod logging;
pub mod pod;
pub mod storage;
pub mod store;
pub mod vm;

pub use daemon::{Collaborators, Daemon, DaemonOptions, PodInfo, PodStartOptions};
pub use logging::init_logging_for;
pub use pod::Pod;
pub use pod::spec::PodSpec;
pub use pod::status::{PodPhase, PodStatus};

// Re-export the shared crate's core types for convenience.
pub use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
pub use hyperpod_shared::vm::{KeepMode, VmEventCode, VmResponse};
