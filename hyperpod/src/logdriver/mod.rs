//! Log drivers: the driver trait, the factory registry, and the copier that
//! relays container output into a driver.

mod copier;
pub mod jsonfile;

pub use copier::LogCopier;
pub use jsonfile::JsonFileFactory;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hyperpod_shared::errors::{HyperpodError, HyperpodResult};

/// One log line captured from a container stream.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub line: String,
    /// `"stdout"` or `"stderr"`.
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(line: String, source: &'static str) -> Self {
        Self {
            line,
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Context handed to a factory when a driver instance is created for one
/// container.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub container_id: String,
    pub container_name: String,
    pub container_image: String,
    /// Resolved command from reconciliation.
    pub cmd: Vec<String>,
    /// Resolved working directory from reconciliation.
    pub workdir: String,
    /// Deterministic per-container path for file-based drivers.
    pub log_path: Option<PathBuf>,
    pub options: HashMap<String, String>,
    pub created: Option<DateTime<Utc>>,
}

/// An active per-container log driver.
pub trait LogDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn log(&self, msg: LogMessage) -> HyperpodResult<()>;

    /// On-disk path for file-based drivers.
    fn log_path(&self) -> Option<PathBuf> {
        None
    }

    /// Flush and release resources. Idempotent.
    fn close(&self);
}

/// Creates drivers of one type.
pub trait LogDriverFactory: Send + Sync + std::fmt::Debug {
    fn driver_type(&self) -> &'static str;

    /// Reject unknown or malformed options before any driver is allocated.
    fn validate_options(&self, options: &HashMap<String, String>) -> HyperpodResult<()>;

    fn create(&self, ctx: LogContext) -> HyperpodResult<Arc<dyn LogDriver>>;
}

/// Registry of installed log driver factories.
#[derive(Clone, Default)]
pub struct LogDriverRegistry {
    factories: HashMap<&'static str, Arc<dyn LogDriverFactory>>,
}

impl LogDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in drivers installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonFileFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn LogDriverFactory>) {
        self.factories.insert(factory.driver_type(), factory);
    }

    pub fn get(&self, driver_type: &str) -> HyperpodResult<Arc<dyn LogDriverFactory>> {
        self.factories.get(driver_type).cloned().ok_or_else(|| {
            HyperpodError::LogConfig(format!("unknown log driver {}", driver_type))
        })
    }
}

impl std::fmt::Debug for LogDriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDriverRegistry")
            .field("drivers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_json_file() {
        let registry = LogDriverRegistry::with_defaults();
        assert!(registry.get("json-file").is_ok());
    }

    #[test]
    fn test_unknown_driver_is_log_config_error() {
        let registry = LogDriverRegistry::with_defaults();
        let err = registry.get("syslog").unwrap_err();
        assert!(matches!(err, HyperpodError::LogConfig(_)));
    }
}
