//! Thread-safe pod registry.
//!
//! One readers-writer lock guards the id map and the name index together so
//! the capacity check and insertion are atomic. The lock covers index
//! operations only — lifecycle I/O runs under each pod's own operation
//! lock, never under this one, so unrelated pods' start/stop never
//! serialize here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use hyperpod_shared::errors::{HyperpodError, HyperpodResult};

use crate::daemon::constants::MAX_PODS;
use crate::pod::Pod;

/// Registry of live pods, indexed by id and by name.
#[derive(Debug, Default)]
pub struct PodRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    pods: HashMap<String, Arc<Pod>>,
    names: HashMap<String, String>,
}

impl PodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pod.
    ///
    /// Fails with `Capacity` when the pod ceiling is reached and with a
    /// duplicate-id error when the id is already present; neither failure
    /// mutates the registry.
    pub fn add(&self, pod: Arc<Pod>) -> HyperpodResult<()> {
        let mut inner = self.write()?;

        if inner.pods.len() >= MAX_PODS {
            return Err(HyperpodError::Capacity(format!(
                "pod registry is full, the maximum is {}",
                MAX_PODS
            )));
        }
        if inner.pods.contains_key(pod.id()) {
            return Err(HyperpodError::Validation(format!(
                "pod {} already registered",
                pod.id()
            )));
        }

        tracing::debug!(pod_id = %pod.id(), name = %pod.name(), "registering pod");
        inner
            .names
            .insert(pod.name().to_string(), pod.id().to_string());
        inner.pods.insert(pod.id().to_string(), pod);
        Ok(())
    }

    pub fn get(&self, id: &str) -> HyperpodResult<Option<Arc<Pod>>> {
        Ok(self.read()?.pods.get(id).cloned())
    }

    pub fn get_by_name(&self, name: &str) -> HyperpodResult<Option<Arc<Pod>>> {
        let inner = self.read()?;
        Ok(inner
            .names
            .get(name)
            .and_then(|id| inner.pods.get(id))
            .cloned())
    }

    /// Remove a pod by id, returning it if present.
    pub fn remove(&self, id: &str) -> HyperpodResult<Option<Arc<Pod>>> {
        let mut inner = self.write()?;
        let pod = inner.pods.remove(id);
        if let Some(pod) = &pod {
            // Only drop the name mapping if it still points at this pod.
            if inner.names.get(pod.name()).map(String::as_str) == Some(id) {
                inner.names.remove(pod.name());
            }
            tracing::debug!(pod_id = %id, "removed pod from registry");
        }
        Ok(pod)
    }

    pub fn count(&self) -> HyperpodResult<usize> {
        Ok(self.read()?.pods.len())
    }

    pub fn list(&self) -> HyperpodResult<Vec<Arc<Pod>>> {
        Ok(self.read()?.pods.values().cloned().collect())
    }

    fn read(&self) -> HyperpodResult<std::sync::RwLockReadGuard<'_, RegistryInner>> {
        self.inner.read().map_err(|e| {
            HyperpodError::Internal(format!("pod registry lock poisoned (read): {}", e))
        })
    }

    fn write(&self) -> HyperpodResult<std::sync::RwLockWriteGuard<'_, RegistryInner>> {
        self.inner.write().map_err(|e| {
            HyperpodError::Internal(format!("pod registry lock poisoned (write): {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::spec::{ContainerSpec, PodSpec};
    use crate::pod::status::PodStatus;
    use std::path::PathBuf;

    fn test_pod(id: &str, name: &str) -> Arc<Pod> {
        let spec = PodSpec {
            id: id.to_string(),
            name: name.to_string(),
            containers: vec![ContainerSpec {
                name: "main".into(),
                image: "busybox".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let status = PodStatus::new(
            id.to_string(),
            spec.pod_type,
            spec.restart_policy,
            false,
            PathBuf::from("/tmp").join(id),
        );
        Arc::new(Pod::new(spec, status))
    }

    #[test]
    fn test_add_and_get() {
        let registry = PodRegistry::new();
        registry.add(test_pod("pod-a", "a")).unwrap();

        assert!(registry.get("pod-a").unwrap().is_some());
        assert!(registry.get("pod-b").unwrap().is_none());
        assert_eq!(registry.count().unwrap(), 1);
    }

    #[test]
    fn test_get_by_name() {
        let registry = PodRegistry::new();
        registry.add(test_pod("pod-a", "web")).unwrap();

        let pod = registry.get_by_name("web").unwrap().unwrap();
        assert_eq!(pod.id(), "pod-a");
        assert!(registry.get_by_name("db").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = PodRegistry::new();
        registry.add(test_pod("pod-a", "a")).unwrap();

        let err = registry.add(test_pod("pod-a", "other")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.count().unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = PodRegistry::new();
        registry.add(test_pod("pod-a", "a")).unwrap();

        assert!(registry.remove("pod-a").unwrap().is_some());
        assert!(registry.get("pod-a").unwrap().is_none());
        assert!(registry.get_by_name("a").unwrap().is_none());
        assert!(registry.remove("pod-a").unwrap().is_none());
    }

    #[test]
    fn test_capacity_ceiling() {
        let registry = PodRegistry::new();
        for i in 0..MAX_PODS {
            registry
                .add(test_pod(&format!("pod-{}", i), &format!("p{}", i)))
                .unwrap();
        }

        let err = registry.add(test_pod("pod-over", "over")).unwrap_err();
        assert!(matches!(err, HyperpodError::Capacity(_)));
        assert_eq!(registry.count().unwrap(), MAX_PODS);
        assert!(registry.get("pod-over").unwrap().is_none());
    }
}
