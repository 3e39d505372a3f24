//! Error types for the inference coordinator.

use thiserror::Error;

use crate::types::tensor::Datatype;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the coordinator core.
///
/// Every variant carries the offending name where one exists, so callers
/// (and tests) can act on the error without parsing message text.
#[derive(Error, Debug)]
pub enum Error {
    /// The registry never became healthy during startup.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the failure.
        message: String,
    },

    /// The requested model is unknown or not currently servable.
    #[error("model not found or not available: {model}")]
    ModelNotFound {
        /// The requested model name.
        model: String,
    },

    /// A declared model input was absent from the request.
    #[error("missing required input: {input}")]
    MissingInput {
        /// Name of the missing input.
        input: String,
    },

    /// The element count implied by a tensor's shape does not match its data.
    #[error("shape mismatch for tensor '{tensor}': shape implies {expected} elements, data has {actual}")]
    ShapeMismatch {
        /// Name of the offending tensor.
        tensor: String,
        /// Element count implied by the declared shape.
        expected: usize,
        /// Element count actually supplied.
        actual: usize,
    },

    /// A value could not be represented in the requested datatype.
    #[error("unsupported value for tensor '{tensor}' ({datatype}): {message}")]
    UnsupportedValue {
        /// Name of the offending tensor.
        tensor: String,
        /// The datatype the value was validated against.
        datatype: Datatype,
        /// Description of the offending value.
        message: String,
    },

    /// A declared model output was absent from the backend response.
    #[error("output missing from response: {output}")]
    OutputMissing {
        /// Name of the missing output.
        output: String,
    },

    /// Wrapped failure from the backend inference server.
    ///
    /// The coordinator never retries these; retry policy is a caller concern.
    #[error("backend error: {message}")]
    Backend {
        /// Error message.
        message: String,
    },

    /// An aggregation batch with no results.
    #[error("no results to aggregate")]
    EmptyBatch,

    /// Malformed aggregation input.
    #[error("aggregation error: {message}")]
    Aggregation {
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Stable machine-readable tag for this error, used in error replies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::MissingInput { .. } => "missing_input",
            Self::ShapeMismatch { .. } => "shape_mismatch",
            Self::UnsupportedValue { .. } => "unsupported_value",
            Self::OutputMissing { .. } => "output_missing",
            Self::Backend { .. } => "backend",
            Self::EmptyBatch => "empty_batch",
            Self::Aggregation { .. } => "aggregation",
        }
    }

    /// Returns `true` for caller-fault validation errors, which must never
    /// be retried.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingInput { .. }
                | Self::ShapeMismatch { .. }
                | Self::UnsupportedValue { .. }
                | Self::OutputMissing { .. }
        )
    }

    /// Returns `true` if retrying the call might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates an aggregation error.
    #[must_use]
    pub fn aggregation(message: impl Into<String>) -> Self {
        Self::Aggregation {
            message: message.into(),
        }
    }

    /// Creates an unsupported-value error for the named tensor.
    #[must_use]
    pub fn unsupported_value(
        tensor: impl Into<String>,
        datatype: Datatype,
        message: impl Into<String>,
    ) -> Self {
        Self::UnsupportedValue {
            tensor: tensor.into(),
            datatype,
            message: message.into(),
        }
    }
}
