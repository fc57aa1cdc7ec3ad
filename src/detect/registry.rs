use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use super::backend::DetectorBackend;
use super::result::Detection;

pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
/// Several pipelines may share one backend.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
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
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
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
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// The named backend, or the default when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<SharedBackend> {
        match name {
            Some(name) => self
                .get(name)
                .ok_or_else(|| anyhow!("backend '{}' not registered", name)),
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no detector backends registered")),
        }
    }

    /// Run detection on the named (or default) backend.
    pub fn detect(&self, name: Option<&str>, image: &RgbImage) -> Result<Vec<Detection>> {
        let backend = self.resolve(name)?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.detect(image)
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
    use crate::detect::StubBackend;
    use crate::geometry::Rect;

    #[test]
    fn first_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new(vec![]));
        assert!(registry.default_backend().is_some());
        assert_eq!(registry.list(), vec!["stub".to_string()]);
        assert!(registry.set_default("missing").is_err());
        Ok(())
    }

    #[test]
    fn detect_routes_to_named_backend() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new(vec![Detection {
            bbox: Rect::new(1, 2, 3, 4),
            confidence: 0.9,
            class_id: 0,
            label: None,
        }]));
        let image = RgbImage::new(8, 8);
        assert_eq!(registry.detect(Some("stub"), &image)?.len(), 1);
        assert_eq!(registry.detect(None, &image)?.len(), 1);
        assert!(registry.detect(Some("yolo"), &image).is_err());
        Ok(())
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = BackendRegistry::default();
        assert!(registry.resolve(None).is_err());
    }
}
