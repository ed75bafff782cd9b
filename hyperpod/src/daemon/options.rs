//! Daemon configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::daemon::constants::{defaults, envs};
use crate::pod::spec::LogConfig;

/// Configuration for a [`crate::daemon::Daemon`].
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Daemon home directory; everything the daemon writes lives below it.
    pub home_dir: PathBuf,

    /// Log configuration applied to pods that do not declare their own.
    pub default_log: LogConfig,

    /// Optional delay between policy-driven restarts of the same pod.
    ///
    /// `None` preserves the immediate, unlimited retry behavior; setting a
    /// backoff throttles a pod that fails on every start.
    pub restart_backoff: Option<Duration>,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            default_log: LogConfig {
                driver: defaults::LOG_DRIVER.to_string(),
                options: HashMap::new(),
            },
            restart_backoff: None,
        }
    }
}

fn default_home_dir() -> PathBuf {
    if let Ok(home) = std::env::var(envs::HYPERPOD_HOME) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|h| h.join(".hyperpod"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/hyperpod"))
}
