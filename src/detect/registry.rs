use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::{DetectionCapability, DetectorBackend};

/// Registry of detector backends, selectable by name.
///
/// Backends are stored as `Arc<dyn DetectorBackend>` and handed out as shared
/// read-only capabilities; `detect` takes `&self`, so no lock is needed.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        self.register_shared(Arc::new(backend));
    }

    pub fn register_shared(&mut self, backend: Arc<dyn DetectorBackend>) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, backend);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DetectorBackend>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<dyn DetectorBackend>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Select a backend that finds both balls and mitts.
    ///
    /// Prefers the default backend when it qualifies.
    pub fn backend_for_pipeline(&self) -> Result<Arc<dyn DetectorBackend>> {
        let qualifies = |backend: &Arc<dyn DetectorBackend>| {
            backend.supports(DetectionCapability::Ball) && backend.supports(DetectionCapability::Mitt)
        };

        if let Some(default_backend) = self.default_backend() {
            if qualifies(&default_backend) {
                return Ok(default_backend);
            }
        }

        for name in self.list() {
            if let Some(backend) = self.get(&name) {
                if qualifies(&backend) {
                    return Ok(backend);
                }
            }
        }

        Err(anyhow!(
            "no registered backend detects both balls and mitts (registered: {})",
            self.list().join(", ")
        ))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{CpuBackend, StubBackend};

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(CpuBackend::new());
        registry.register(StubBackend::new());

        let backend = registry.default_backend().expect("default backend");
        assert_eq!(backend.name(), "cpu");
        assert_eq!(registry.list(), vec!["cpu".to_string(), "stub".to_string()]);
    }

    #[test]
    fn set_default_requires_registration() {
        let mut registry = BackendRegistry::new();
        registry.register(CpuBackend::new());
        assert!(registry.set_default("tract").is_err());
        registry.register(StubBackend::new());
        registry.set_default("stub").unwrap();
        assert_eq!(registry.backend_for_pipeline().unwrap().name(), "stub");
    }

    #[test]
    fn empty_registry_has_no_pipeline_backend() {
        let registry = BackendRegistry::new();
        assert!(registry.backend_for_pipeline().is_err());
    }
}
