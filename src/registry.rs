//! Model registry: discovery and tracking of servable models.
//!
//! The registry is the only persistent shared state in the coordinator.
//! Routing reads a snapshot `Arc` cloned under a read lock held only for
//! the clone; refresh builds the replacement map in full and swaps it, so
//! in-flight readers see either the old or the new snapshot, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{InferenceBackend, ModelState};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::metrics::CoordinatorMetrics;
use crate::types::tensor::{ModelSpec, SpecSnapshot};

/// Health of the registry as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryStatus {
    Initializing,
    Healthy,
    Unhealthy,
}

/// Registry of servable models and their specifications.
pub struct ModelRegistry {
    backend: Arc<dyn InferenceBackend>,
    specs: RwLock<Arc<SpecSnapshot>>,
    status: RwLock<RegistryStatus>,
    connect_attempts: u32,
    retry_delay: Duration,
    metrics: Arc<CoordinatorMetrics>,
}

impl ModelRegistry {
    /// Creates an empty registry; call [`initialize`](Self::initialize)
    /// before routing.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        config: &BackendConfig,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            backend,
            specs: RwLock::new(Arc::new(HashMap::new())),
            status: RwLock::new(RegistryStatus::Initializing),
            connect_attempts: config.connect_attempts,
            retry_delay: config.retry_delay(),
            metrics,
        }
    }

    /// Discovers servable models, retrying up to the configured bound with
    /// a fixed delay between attempts.
    ///
    /// Exhausting every attempt leaves the registry unhealthy with an empty
    /// snapshot and returns [`Error::Configuration`].
    pub async fn initialize(&self) -> Result<()> {
        for attempt in 1..=self.connect_attempts {
            match self.discover().await {
                Ok(specs) => {
                    let count = specs.len();
                    self.swap_snapshot(specs);
                    *self.status.write().unwrap() = RegistryStatus::Healthy;
                    info!(models_count = count, "Registry initialized");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        max_attempts = self.connect_attempts,
                        error = %e,
                        "Registry initialization attempt failed"
                    );
                    if attempt < self.connect_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        *self.status.write().unwrap() = RegistryStatus::Unhealthy;
        error!(
            attempts = self.connect_attempts,
            "Registry failed to initialize after all attempts"
        );
        Err(Error::configuration(format!(
            "registry never became healthy after {} discovery attempts",
            self.connect_attempts
        )))
    }

    /// Re-runs discovery once and atomically swaps the snapshot.
    pub async fn refresh(&self) -> Result<usize> {
        let specs = self.discover().await?;
        let count = specs.len();
        self.swap_snapshot(specs);
        *self.status.write().unwrap() = RegistryStatus::Healthy;
        info!(models_count = count, "Registry refreshed");
        Ok(count)
    }

    /// One discovery pass: readiness probe, repository index, then metadata
    /// for every READY model. A per-model metadata failure marks that model
    /// unavailable and continues with the rest.
    async fn discover(&self) -> Result<SpecSnapshot> {
        if !self.backend.is_ready().await? {
            return Err(Error::backend("inference server not ready"));
        }

        let models = self.backend.discover_models().await?;
        let mut specs = HashMap::new();

        for model in models {
            if model.state != ModelState::Ready {
                continue;
            }
            match self.backend.model_metadata(&model.name).await {
                Ok(spec) => {
                    self.metrics.set_model_availability(&model.name, true);
                    info!(
                        model = %model.name,
                        platform = %spec.platform,
                        "Loaded model metadata"
                    );
                    specs.insert(model.name, spec);
                }
                Err(e) => {
                    warn!(
                        model = %model.name,
                        error = %e,
                        "Failed to load model metadata, marking unavailable"
                    );
                    self.metrics.set_model_availability(&model.name, false);
                }
            }
        }

        Ok(specs)
    }

    fn swap_snapshot(&self, specs: SpecSnapshot) {
        *self.specs.write().unwrap() = Arc::new(specs);
    }

    /// Current registry health.
    pub fn status(&self) -> RegistryStatus {
        *self.status.read().unwrap()
    }

    /// Read-only view of the servable models. Cheap to clone and safe to
    /// hold across awaits.
    pub fn snapshot(&self) -> Arc<SpecSnapshot> {
        self.specs.read().unwrap().clone()
    }

    /// Looks up one model's spec in the current snapshot.
    pub fn get(&self, model: &str) -> Option<ModelSpec> {
        self.snapshot().get(model).cloned()
    }

    /// Number of servable models in the current snapshot.
    pub fn model_count(&self) -> usize {
        self.snapshot().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::backend::{DiscoveredModel, ModelState};
    use crate::types::tensor::{Datatype, TensorSpec};

    fn spec(name: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            inputs: vec![TensorSpec {
                name: "input__0".to_string(),
                datatype: Datatype::Fp32,
                shape: vec![-1, 4],
            }],
            outputs: vec![TensorSpec {
                name: "output__0".to_string(),
                datatype: Datatype::Fp32,
                shape: vec![-1, 2],
            }],
            platform: "onnxruntime_onnx".to_string(),
            max_batch_size: 8,
        }
    }

    fn fast_config() -> BackendConfig {
        BackendConfig {
            connect_attempts: 5,
            retry_delay_secs: 0,
            ..BackendConfig::default()
        }
    }

    fn registry_over(backend: MockBackend) -> (ModelRegistry, Arc<CoordinatorMetrics>) {
        let metrics = Arc::new(CoordinatorMetrics::new());
        let backend: Arc<dyn InferenceBackend> = Arc::new(backend);
        (
            ModelRegistry::new(backend, &fast_config(), metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_unhealthy_after_bounded_attempts() {
        let backend = Arc::new(
            MockBackend::new()
                .with_model(spec("classifier"))
                .with_ready_failures(5),
        );
        let metrics = Arc::new(CoordinatorMetrics::new());
        let registry = ModelRegistry::new(backend.clone(), &fast_config(), metrics.clone());

        assert_eq!(registry.status(), RegistryStatus::Initializing);
        let err = registry.initialize().await.unwrap_err();
        assert_eq!(err.kind(), "configuration");

        assert_eq!(registry.status(), RegistryStatus::Unhealthy);
        assert!(registry.snapshot().is_empty());
        assert_eq!(backend.ready_calls(), 5);
        // no model was ever marked available
        assert!(metrics.availability().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_recovers_from_transient_failures() {
        let backend = MockBackend::new()
            .with_model(spec("classifier"))
            .with_ready_failures(2);
        let (registry, _) = registry_over(backend);

        registry.initialize().await.unwrap();
        assert_eq!(registry.status(), RegistryStatus::Healthy);
        assert_eq!(registry.model_count(), 1);
        assert!(registry.get("classifier").is_some());
    }

    #[tokio::test]
    async fn test_metadata_failure_is_not_fatal() {
        let backend = MockBackend::new()
            .with_model(spec("classifier"))
            .with_model(spec("broken_model"))
            .with_metadata_error("broken_model");
        let (registry, metrics) = registry_over(backend);

        registry.initialize().await.unwrap();
        assert_eq!(registry.status(), RegistryStatus::Healthy);
        assert!(registry.get("classifier").is_some());
        assert!(registry.get("broken_model").is_none());

        let availability = metrics.availability();
        assert_eq!(availability["classifier"], true);
        assert_eq!(availability["broken_model"], false);
    }

    #[tokio::test]
    async fn test_non_ready_models_are_skipped() {
        let backend = MockBackend::new().with_model(spec("classifier"));
        backend.state.lock().unwrap().models.push(DiscoveredModel {
            name: "loading_model".to_string(),
            state: ModelState::Loading,
        });
        let (registry, _) = registry_over(backend);

        registry.initialize().await.unwrap();
        assert_eq!(registry.model_count(), 1);
        assert!(registry.get("loading_model").is_none());
    }

    #[tokio::test]
    async fn test_refresh_swaps_snapshot_wholesale() {
        let backend = Arc::new(MockBackend::new().with_model(spec("old_model")));
        let metrics = Arc::new(CoordinatorMetrics::new());
        let registry = ModelRegistry::new(backend.clone(), &fast_config(), metrics);

        registry.initialize().await.unwrap();
        let before = registry.snapshot();
        assert!(before.contains_key("old_model"));

        {
            let mut state = backend.state.lock().unwrap();
            state.models.clear();
            state.metadata.clear();
            state.models.push(DiscoveredModel {
                name: "new_model".to_string(),
                state: ModelState::Ready,
            });
            state
                .metadata
                .insert("new_model".to_string(), spec("new_model"));
        }

        let count = registry.refresh().await.unwrap();
        assert_eq!(count, 1);
        let after = registry.snapshot();
        assert!(after.contains_key("new_model"));
        assert!(!after.contains_key("old_model"));
        // the snapshot held before the refresh is unchanged
        assert!(before.contains_key("old_model"));
    }
}
