use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::GrayImage;

use crate::config::DetectorSettings;
use crate::detect::result::DetectionBox;

use super::backend::{DetectionCapability, DetectorBackend};
#[cfg(feature = "backend-tract")]
use super::backends::TractBackend;
use super::backends::{CpuBackend, StubBackend};

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn DetectorBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Build a registry holding the backend named in `settings` as default.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        match settings.backend.as_str() {
            "cpu" => registry.register(
                CpuBackend::new()
                    .with_threshold(settings.threshold)
                    .with_min_area(settings.min_area),
            ),
            "stub" => registry.register(StubBackend::new()),
            #[cfg(feature = "backend-tract")]
            "tract" => {
                let model_path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
                let backend = TractBackend::new(
                    model_path,
                    settings.model_width,
                    settings.model_height,
                    settings.model_channels,
                )?
                .with_threshold(settings.score_threshold);
                registry.register(backend);
            }
            #[cfg(not(feature = "backend-tract"))]
            "tract" => {
                return Err(anyhow!(
                    "detector backend 'tract' requires the backend-tract feature"
                ))
            }
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        if let Some(backend) = registry.default_backend() {
            backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?
                .warm_up()?;
        }
        Ok(registry)
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
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Select a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability.
    pub fn backend_for_capability(
        &self,
        capability: DetectionCapability,
    ) -> Result<Arc<Mutex<dyn DetectorBackend>>> {
        if let Some(default_backend) = self.default_backend() {
            let supports = {
                let guard = default_backend
                    .lock()
                    .map_err(|_| anyhow!("default backend lock poisoned"))?;
                guard.supports(capability)
            };
            if supports {
                return Ok(default_backend);
            }
        }

        for backend in self.backends.values() {
            let supports = {
                let guard = backend
                    .lock()
                    .map_err(|_| anyhow!("backend lock poisoned"))?;
                guard.supports(capability)
            };
            if supports {
                return Ok(backend.clone());
            }
        }

        Err(anyhow!(
            "no registered backend supports capability {:?}",
            capability
        ))
    }

    /// Run detection using a backend that supports the requested capability.
    pub fn detect_with_capability(
        &self,
        capability: DetectionCapability,
        image: &GrayImage,
    ) -> Result<Vec<DetectionBox>> {
        let backend = self.backend_for_capability(capability)?;
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
