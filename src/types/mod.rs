//! Type definitions for the inference coordinator

pub mod request;
pub mod result;
pub mod tensor;

pub use request::InferenceRequest;
pub use result::{InferenceResult, ResultMetadata};
pub use tensor::{Datatype, ModelSpec, TensorData, TensorDescriptor, TensorSpec, TensorValue};
