use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::error::SentinelError;

use super::backend::Detector;
use super::backends::StubBackend;

/// Registry of named detector backends.
///
/// Backends are shared as `Arc<dyn Detector>`; every camera worker holds a
/// clone of the selected one.
pub struct DetectorRegistry {
    backends: HashMap<String, Arc<dyn Detector>>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Build the registry for a configuration and select its backend.
    ///
    /// The stub backend is always available. The tract backend is loaded only
    /// when selected, since loading a model is expensive.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self, SentinelError> {
        let mut registry = Self::new();
        registry.register(StubBackend::new());

        match settings.backend.as_str() {
            "stub" => {}
            #[cfg(feature = "backend-tract")]
            "tract" => {
                let model_path = settings.model_path.as_ref().ok_or_else(|| {
                    SentinelError::DetectorInit("tract backend requires detector.model_path".into())
                })?;
                let backend = super::TractBackend::new(model_path, settings.input_size)
                    .map_err(|e| SentinelError::DetectorInit(format!("{:#}", e)))?
                    .with_iou_threshold(settings.iou_threshold);
                registry.register(backend);
            }
            #[cfg(not(feature = "backend-tract"))]
            "tract" => {
                return Err(SentinelError::DetectorInit(
                    "tract backend requires the backend-tract feature".into(),
                ));
            }
            other => {
                return Err(SentinelError::DetectorInit(format!(
                    "unknown detector backend '{}'",
                    other
                )));
            }
        }

        registry
            .set_default(&settings.backend)
            .map_err(|e| SentinelError::DetectorInit(e.to_string()))?;
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<D: Detector + 'static>(&mut self, backend: D) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(backend));
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
    pub fn get(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<dyn Detector>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Default backend, warmed up and ready to share with workers.
    pub fn ready_backend(&self) -> Result<Arc<dyn Detector>, SentinelError> {
        let backend = self
            .default_backend()
            .ok_or_else(|| SentinelError::DetectorInit("no detector backend registered".into()))?;
        backend.warm_up().map_err(|e| {
            SentinelError::DetectorInit(format!("{} warm-up failed: {:#}", backend.name(), e))
        })?;
        Ok(backend)
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
