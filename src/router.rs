//! Request routing: registry lookup, marshaling, dispatch, unmarshaling.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::InferenceBackend;
use crate::error::{Error, Result};
use crate::marshal;
use crate::metrics::CoordinatorMetrics;
use crate::registry::ModelRegistry;
use crate::types::request::InferenceRequest;
use crate::types::result::{InferenceResult, ResultMetadata};

/// Routes inference requests to the backend and annotates the results.
///
/// One explicitly constructed instance is shared by reference across
/// request handlers; it holds no per-request state.
pub struct InferenceRouter {
    backend: Arc<dyn InferenceBackend>,
    registry: Arc<ModelRegistry>,
    metrics: Arc<CoordinatorMetrics>,
    identity: String,
}

impl InferenceRouter {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        registry: Arc<ModelRegistry>,
        metrics: Arc<CoordinatorMetrics>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            metrics,
            identity: identity.into(),
        }
    }

    /// Routes one request: lookup, marshal, dispatch, parse.
    ///
    /// Backend failures are wrapped, never retried here; retry policy
    /// belongs to the caller. The request is observed in the metrics
    /// regardless of outcome.
    pub async fn route(&self, request: &InferenceRequest) -> Result<InferenceResult> {
        let started = Instant::now();
        let outcome = self.route_inner(request, started).await;

        self.metrics
            .record_request(&request.model_name, outcome.is_ok(), started.elapsed());

        match &outcome {
            Ok(result) => {
                info!(
                    model = %request.model_name,
                    execution_time_ms = result.metadata.execution_time_ms,
                    inference_time_ms = result.metadata.inference_time_ms,
                    "Inference completed"
                );
            }
            Err(e) => {
                warn!(model = %request.model_name, error = %e, "Inference failed");
            }
        }

        outcome
    }

    async fn route_inner(
        &self,
        request: &InferenceRequest,
        started: Instant,
    ) -> Result<InferenceResult> {
        let spec = self
            .registry
            .get(&request.model_name)
            .ok_or_else(|| Error::ModelNotFound {
                model: request.model_name.clone(),
            })?;

        let tensors = marshal::build_request_tensors(&spec, &request.inputs)?;
        let requested_outputs: Vec<String> =
            spec.outputs.iter().map(|o| o.name.clone()).collect();

        debug!(
            model = %request.model_name,
            inputs = tensors.len(),
            outputs = requested_outputs.len(),
            "Dispatching inference"
        );

        let inference_started = Instant::now();
        let raw_outputs = self
            .backend
            .infer(&request.model_name, &tensors, &requested_outputs)
            .await?;
        let inference_time = inference_started.elapsed();

        let outputs = marshal::parse_response_tensors(&spec, &raw_outputs)?;
        let execution_time = started.elapsed();

        Ok(InferenceResult {
            model: request.model_name.clone(),
            outputs,
            metadata: ResultMetadata {
                execution_time_ms: Some(execution_time.as_millis() as u64),
                inference_time_ms: Some(inference_time.as_millis() as u64),
                agent_id: Some(self.identity.clone()),
                request_id: Some(Uuid::new_v4()),
                timestamp: Some(Utc::now()),
            },
        })
    }
}
