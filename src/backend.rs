//! Backend inference server client.
//!
//! The coordinator treats the serving process as an opaque synchronous RPC
//! peer: discover models, fetch metadata, run inference. [`HttpBackend`]
//! speaks the KServe v2 JSON protocol (as served by Triton and
//! compatibles); anything else can slot in behind [`InferenceBackend`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::types::tensor::{Datatype, ModelSpec, TensorDescriptor};

/// Lifecycle state of a model as reported by the serving process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelState {
    Ready,
    Unavailable,
    Loading,
    Unloading,
    #[serde(other)]
    #[default]
    Unknown,
}

/// One entry from the backend's model repository index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub name: String,
    #[serde(default)]
    pub state: ModelState,
}

/// A raw output tensor exactly as returned by the backend.
///
/// Shape and datatype are optional on ingest; the marshaler falls back to
/// the model's declared output spec when the response omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<Datatype>,
    pub data: Value,
}

/// The backend inference call surface the core consumes.
///
/// Implementations may block on network I/O; callers own deadlines.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Whether the serving process is ready to accept inference.
    async fn is_ready(&self) -> Result<bool>;

    /// Enumerates models known to the serving process.
    async fn discover_models(&self) -> Result<Vec<DiscoveredModel>>;

    /// Loads input/output metadata for one model.
    async fn model_metadata(&self, name: &str) -> Result<ModelSpec>;

    /// Runs inference and returns the raw response tensors.
    async fn infer(
        &self,
        model: &str,
        inputs: &[TensorDescriptor],
        requested_outputs: &[String],
    ) -> Result<Vec<RawOutput>>;
}

#[derive(Serialize)]
struct WireInput<'a> {
    name: &'a str,
    shape: &'a [usize],
    datatype: Datatype,
    data: Value,
}

#[derive(Serialize)]
struct WireRequestedOutput<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct WireInferRequest<'a> {
    inputs: Vec<WireInput<'a>>,
    outputs: Vec<WireRequestedOutput<'a>>,
}

#[derive(Deserialize)]
struct WireInferResponse {
    #[serde(default)]
    outputs: Vec<RawOutput>,
}

#[derive(Deserialize)]
struct WireTensorMetadata {
    name: String,
    datatype: Datatype,
    shape: Vec<i64>,
}

#[derive(Deserialize)]
struct WireModelMetadata {
    name: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    inputs: Vec<WireTensorMetadata>,
    #[serde(default)]
    outputs: Vec<WireTensorMetadata>,
    #[serde(default)]
    max_batch_size: u32,
}

impl From<WireModelMetadata> for ModelSpec {
    fn from(wire: WireModelMetadata) -> Self {
        let convert = |tensors: Vec<WireTensorMetadata>| {
            tensors
                .into_iter()
                .map(|t| crate::types::tensor::TensorSpec {
                    name: t.name,
                    datatype: t.datatype,
                    shape: t.shape,
                })
                .collect()
        };
        ModelSpec {
            name: wire.name,
            inputs: convert(wire.inputs),
            outputs: convert(wire.outputs),
            platform: wire.platform,
            max_batch_size: wire.max_batch_size,
        }
    }
}

/// HTTP client for a KServe v2 compatible inference server.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Builds a client against the configured base URL.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_error_body(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::backend(format!("HTTP {status}: {body}"))
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn is_ready(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/v2/health/ready"))
            .send()
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn discover_models(&self) -> Result<Vec<DiscoveredModel>> {
        let response = self
            .client
            .post(self.url("/v2/repository/index"))
            .json(&HashMap::<String, Value>::new())
            .send()
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::read_error_body(response).await);
        }
        response
            .json::<Vec<DiscoveredModel>>()
            .await
            .map_err(|e| Error::backend(format!("bad repository index: {e}")))
    }

    async fn model_metadata(&self, name: &str) -> Result<ModelSpec> {
        let response = self
            .client
            .get(self.url(&format!("/v2/models/{name}")))
            .send()
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::read_error_body(response).await);
        }
        let wire: WireModelMetadata = response
            .json()
            .await
            .map_err(|e| Error::backend(format!("bad model metadata for {name}: {e}")))?;
        Ok(wire.into())
    }

    async fn infer(
        &self,
        model: &str,
        inputs: &[TensorDescriptor],
        requested_outputs: &[String],
    ) -> Result<Vec<RawOutput>> {
        let body = WireInferRequest {
            inputs: inputs
                .iter()
                .map(|t| WireInput {
                    name: &t.name,
                    shape: &t.shape,
                    datatype: t.datatype,
                    data: t.data.to_json(),
                })
                .collect(),
            outputs: requested_outputs
                .iter()
                .map(|name| WireRequestedOutput { name })
                .collect(),
        };

        let response = self
            .client
            .post(self.url(&format!("/v2/models/{model}/infer")))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::read_error_body(response).await);
        }
        let parsed: WireInferResponse = response
            .json()
            .await
            .map_err(|e| Error::backend(format!("bad inference response from {model}: {e}")))?;
        Ok(parsed.outputs)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable backend double shared by registry and router tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockState {
        pub ready_failures: u32,
        pub ready_calls: u32,
        pub discover_error: Option<String>,
        pub models: Vec<DiscoveredModel>,
        pub metadata: HashMap<String, ModelSpec>,
        pub metadata_errors: HashSet<String>,
        pub infer_error: Option<String>,
        pub infer_response: Vec<RawOutput>,
        pub infer_calls: Vec<(String, Vec<TensorDescriptor>, Vec<String>)>,
    }

    #[derive(Default)]
    pub struct MockBackend {
        pub state: Mutex<MockState>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_model(self, spec: ModelSpec) -> Self {
            {
                let mut state = self.state.lock().unwrap();
                state.models.push(DiscoveredModel {
                    name: spec.name.clone(),
                    state: ModelState::Ready,
                });
                state.metadata.insert(spec.name.clone(), spec);
            }
            self
        }

        pub fn with_ready_failures(self, failures: u32) -> Self {
            self.state.lock().unwrap().ready_failures = failures;
            self
        }

        pub fn with_metadata_error(self, model: &str) -> Self {
            self.state
                .lock()
                .unwrap()
                .metadata_errors
                .insert(model.to_string());
            self
        }

        pub fn with_infer_response(self, outputs: Vec<RawOutput>) -> Self {
            self.state.lock().unwrap().infer_response = outputs;
            self
        }

        pub fn with_infer_error(self, message: &str) -> Self {
            self.state.lock().unwrap().infer_error = Some(message.to_string());
            self
        }

        pub fn ready_calls(&self) -> u32 {
            self.state.lock().unwrap().ready_calls
        }
    }

    #[async_trait]
    impl InferenceBackend for MockBackend {
        async fn is_ready(&self) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            state.ready_calls += 1;
            if state.ready_calls <= state.ready_failures {
                return Err(Error::backend("connection refused"));
            }
            Ok(true)
        }

        async fn discover_models(&self) -> Result<Vec<DiscoveredModel>> {
            let state = self.state.lock().unwrap();
            if let Some(message) = &state.discover_error {
                return Err(Error::backend(message.clone()));
            }
            Ok(state.models.clone())
        }

        async fn model_metadata(&self, name: &str) -> Result<ModelSpec> {
            let state = self.state.lock().unwrap();
            if state.metadata_errors.contains(name) {
                return Err(Error::backend(format!("metadata unavailable for {name}")));
            }
            state
                .metadata
                .get(name)
                .cloned()
                .ok_or_else(|| Error::backend(format!("no such model: {name}")))
        }

        async fn infer(
            &self,
            model: &str,
            inputs: &[TensorDescriptor],
            requested_outputs: &[String],
        ) -> Result<Vec<RawOutput>> {
            let mut state = self.state.lock().unwrap();
            state.infer_calls.push((
                model.to_string(),
                inputs.to_vec(),
                requested_outputs.to_vec(),
            ));
            if let Some(message) = &state.infer_error {
                return Err(Error::backend(message.clone()));
            }
            Ok(state.infer_response.clone())
        }
    }
}
