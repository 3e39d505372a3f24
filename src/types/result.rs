//! Inference result shape shared by the router and the aggregation engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::tensor::TensorValue;

/// Timing and provenance attached to a result.
///
/// All fields are optional on ingest so results produced elsewhere (other
/// coordinators, redundant workers) aggregate cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Wall-clock time for the whole routing call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Time spent strictly inside the backend inference call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_time_ms: Option<u64>,
    /// Identity of the coordinator that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Per-call id, fresh for every routed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One model's outputs for one routed request. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    #[serde(default)]
    pub model: String,
    pub outputs: HashMap<String, TensorValue>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}
