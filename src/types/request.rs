//! Inbound inference request shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A routing request: target model plus named input payloads.
///
/// Each input is either a bare JSON value (shape and datatype inferred
/// against the model's declared input spec) or an explicit
/// `{data, shape?, datatype?}` override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model_name: String,
    pub inputs: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HashMap<String, Value>>,
}

impl InferenceRequest {
    /// Creates a request for the given model with no inputs yet.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            inputs: HashMap::new(),
            parameters: None,
        }
    }

    /// Adds a named input payload.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, payload: Value) -> Self {
        self.inputs.insert(name.into(), payload);
        self
    }
}
