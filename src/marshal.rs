//! Tensor marshaling between caller payloads and backend tensors.
//!
//! Validation happens here, once, against the model's declared specs: a
//! request that passes marshaling is structurally ready for dispatch, and
//! a response that parses carries every declared output.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::backend::RawOutput;
use crate::error::{Error, Result};
use crate::types::tensor::{
    infer_shape, Datatype, ModelSpec, TensorData, TensorDescriptor, TensorSpec, TensorValue,
};

/// Explicit caller override for one input tensor.
#[derive(Debug, Deserialize)]
struct TensorOverride {
    data: Value,
    #[serde(default)]
    shape: Option<Vec<usize>>,
    #[serde(default)]
    datatype: Option<Datatype>,
}

/// Builds backend-ready tensors for every declared input of the model.
///
/// Every `TensorSpec` in `spec.inputs` must have a corresponding entry in
/// `inputs`; the first missing one fails the whole request. Bare payloads
/// take the spec's datatype with an inferred shape; explicit overrides take
/// the caller-declared shape/datatype, validated against the payload's
/// element count.
pub fn build_request_tensors(
    spec: &ModelSpec,
    inputs: &HashMap<String, Value>,
) -> Result<Vec<TensorDescriptor>> {
    let mut tensors = Vec::with_capacity(spec.inputs.len());
    for input_spec in &spec.inputs {
        let payload = inputs.get(&input_spec.name).ok_or_else(|| Error::MissingInput {
            input: input_spec.name.clone(),
        })?;
        tensors.push(build_one(input_spec, payload)?);
    }
    Ok(tensors)
}

fn build_one(spec: &TensorSpec, payload: &Value) -> Result<TensorDescriptor> {
    let (datatype, shape, data) = if let Some(obj) = payload.as_object() {
        if !obj.contains_key("data") {
            return Err(Error::unsupported_value(
                &spec.name,
                spec.datatype,
                "object payload must carry a data field".to_string(),
            ));
        }
        let ov: TensorOverride = serde_json::from_value(payload.clone()).map_err(|e| {
            Error::unsupported_value(&spec.name, spec.datatype, format!("bad override: {e}"))
        })?;
        // caller-declared shape/datatype take precedence over the spec
        let datatype = ov.datatype.unwrap_or(spec.datatype);
        let data = TensorData::from_json(datatype, &ov.data, &spec.name)?;
        let shape = match ov.shape {
            Some(shape) => shape,
            None => infer_shape(&ov.data, &spec.name, datatype)?,
        };
        (datatype, shape, data)
    } else {
        let datatype = spec.datatype;
        let shape = infer_shape(payload, &spec.name, datatype)?;
        let data = TensorData::from_json(datatype, payload, &spec.name)?;
        (datatype, shape, data)
    };

    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(Error::ShapeMismatch {
            tensor: spec.name.clone(),
            expected,
            actual: data.len(),
        });
    }

    Ok(TensorDescriptor {
        name: spec.name.clone(),
        shape,
        datatype,
        data,
    })
}

/// Converts raw backend outputs into typed values, one per declared output.
///
/// A declared output absent from the response fails the whole call. The
/// datatype declared in the response wins; the spec's declared datatype is
/// the fallback when the response omits it.
pub fn parse_response_tensors(
    spec: &ModelSpec,
    raw_outputs: &[RawOutput],
) -> Result<HashMap<String, TensorValue>> {
    let by_name: HashMap<&str, &RawOutput> = raw_outputs
        .iter()
        .map(|output| (output.name.as_str(), output))
        .collect();

    let mut outputs = HashMap::with_capacity(spec.outputs.len());
    for output_spec in &spec.outputs {
        let raw = by_name
            .get(output_spec.name.as_str())
            .ok_or_else(|| Error::OutputMissing {
                output: output_spec.name.clone(),
            })?;
        let datatype = raw.datatype.unwrap_or(output_spec.datatype);
        let data = TensorData::from_json(datatype, &raw.data, &output_spec.name)?;
        let shape = match &raw.shape {
            Some(shape) => shape.clone(),
            None => infer_shape(&raw.data, &output_spec.name, datatype)?,
        };
        let value = TensorValue::new(&output_spec.name, shape, datatype, data)?;
        outputs.insert(output_spec.name.clone(), value);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier_spec() -> ModelSpec {
        ModelSpec {
            name: "classifier".to_string(),
            inputs: vec![
                TensorSpec {
                    name: "features".to_string(),
                    datatype: Datatype::Fp32,
                    shape: vec![-1, 4],
                },
                TensorSpec {
                    name: "mask".to_string(),
                    datatype: Datatype::Int64,
                    shape: vec![-1, 4],
                },
            ],
            outputs: vec![TensorSpec {
                name: "probabilities".to_string(),
                datatype: Datatype::Fp32,
                shape: vec![-1, 2],
            }],
            platform: "onnxruntime_onnx".to_string(),
            max_batch_size: 8,
        }
    }

    fn full_inputs() -> HashMap<String, Value> {
        let mut inputs = HashMap::new();
        inputs.insert("features".to_string(), json!([[0.1, 0.2, 0.3, 0.4]]));
        inputs.insert("mask".to_string(), json!([[1, 1, 1, 0]]));
        inputs
    }

    #[test]
    fn test_every_missing_input_is_reported_by_name() {
        let spec = classifier_spec();
        for missing in ["features", "mask"] {
            let mut inputs = full_inputs();
            inputs.remove(missing);
            match build_request_tensors(&spec, &inputs).unwrap_err() {
                Error::MissingInput { input } => assert_eq!(input, missing),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_bare_value_takes_spec_datatype_and_inferred_shape() {
        let spec = classifier_spec();
        let tensors = build_request_tensors(&spec, &full_inputs()).unwrap();
        assert_eq!(tensors.len(), 2);

        let features = &tensors[0];
        assert_eq!(features.name, "features");
        assert_eq!(features.shape, vec![1, 4]);
        assert_eq!(features.datatype, Datatype::Fp32);

        let mask = &tensors[1];
        assert_eq!(mask.datatype, Datatype::Int64);
        assert_eq!(mask.data, TensorData::Int64(vec![1, 1, 1, 0]));
    }

    #[test]
    fn test_override_takes_precedence_over_spec() {
        let spec = classifier_spec();
        let mut inputs = full_inputs();
        inputs.insert(
            "features".to_string(),
            json!({"data": [1.0, 2.0, 3.0, 4.0], "shape": [2, 2], "datatype": "FP64"}),
        );
        let tensors = build_request_tensors(&spec, &inputs).unwrap();
        let features = &tensors[0];
        assert_eq!(features.shape, vec![2, 2]);
        assert_eq!(features.datatype, Datatype::Fp64);
    }

    #[test]
    fn test_override_shape_must_match_element_count() {
        let spec = classifier_spec();
        let mut inputs = full_inputs();
        inputs.insert(
            "features".to_string(),
            json!({"data": [1.0, 2.0, 3.0], "shape": [2, 2]}),
        );
        match build_request_tensors(&spec, &inputs).unwrap_err() {
            Error::ShapeMismatch {
                tensor,
                expected,
                actual,
            } => {
                assert_eq!(tensor, "features");
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_override_defaults_fill_from_spec_and_payload() {
        let spec = classifier_spec();
        let mut inputs = full_inputs();
        inputs.insert("features".to_string(), json!({"data": [[0.5, 0.5, 0.5, 0.5]]}));
        let tensors = build_request_tensors(&spec, &inputs).unwrap();
        let features = &tensors[0];
        assert_eq!(features.shape, vec![1, 4]);
        assert_eq!(features.datatype, Datatype::Fp32);
    }

    #[test]
    fn test_strings_are_not_cast_to_numbers() {
        let spec = classifier_spec();
        let mut inputs = full_inputs();
        inputs.insert("features".to_string(), json!([["a", "b", "c", "d"]]));
        let err = build_request_tensors(&spec, &inputs).unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");
    }

    #[test]
    fn test_ragged_payload_rejected() {
        let spec = classifier_spec();
        let mut inputs = full_inputs();
        inputs.insert("features".to_string(), json!([[0.1, 0.2], [0.3]]));
        let err = build_request_tensors(&spec, &inputs).unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");
    }

    #[test]
    fn test_object_without_data_rejected() {
        let spec = classifier_spec();
        let mut inputs = full_inputs();
        inputs.insert("features".to_string(), json!({"values": [1, 2, 3, 4]}));
        let err = build_request_tensors(&spec, &inputs).unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");
    }

    #[test]
    fn test_parse_reports_missing_outputs() {
        let spec = classifier_spec();
        match parse_response_tensors(&spec, &[]).unwrap_err() {
            Error::OutputMissing { output } => assert_eq!(output, "probabilities"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_converts_declared_outputs() {
        let spec = classifier_spec();
        let raw = vec![RawOutput {
            name: "probabilities".to_string(),
            shape: Some(vec![1, 2]),
            datatype: Some(Datatype::Fp32),
            data: json!([0.25, 0.75]),
        }];
        let outputs = parse_response_tensors(&spec, &raw).unwrap();
        let p = &outputs["probabilities"];
        assert_eq!(p.shape, vec![1, 2]);
        assert_eq!(p.data, TensorData::Fp32(vec![0.25, 0.75]));
    }

    #[test]
    fn test_parse_falls_back_to_spec_datatype() {
        let spec = classifier_spec();
        let raw = vec![RawOutput {
            name: "probabilities".to_string(),
            shape: None,
            datatype: None,
            data: json!([0.25, 0.75]),
        }];
        let outputs = parse_response_tensors(&spec, &raw).unwrap();
        assert_eq!(outputs["probabilities"].datatype, Datatype::Fp32);
        assert_eq!(outputs["probabilities"].shape, vec![2]);
    }

    #[test]
    fn test_parse_validates_response_element_count() {
        let spec = classifier_spec();
        let raw = vec![RawOutput {
            name: "probabilities".to_string(),
            shape: Some(vec![1, 2]),
            datatype: Some(Datatype::Fp32),
            data: json!([0.25, 0.75, 0.5]),
        }];
        let err = parse_response_tensors(&spec, &raw).unwrap_err();
        assert_eq!(err.kind(), "shape_mismatch");
    }

    #[test]
    fn test_build_then_parse_round_trip() {
        // a model whose inputs mirror its outputs round-trips values exactly
        let spec = ModelSpec {
            name: "echo".to_string(),
            inputs: vec![
                TensorSpec {
                    name: "logits".to_string(),
                    datatype: Datatype::Fp32,
                    shape: vec![-1, 2],
                },
                TensorSpec {
                    name: "labels".to_string(),
                    datatype: Datatype::Int64,
                    shape: vec![-1],
                },
            ],
            outputs: vec![
                TensorSpec {
                    name: "logits".to_string(),
                    datatype: Datatype::Fp32,
                    shape: vec![-1, 2],
                },
                TensorSpec {
                    name: "labels".to_string(),
                    datatype: Datatype::Int64,
                    shape: vec![-1],
                },
            ],
            platform: String::new(),
            max_batch_size: 0,
        };

        let mut inputs = HashMap::new();
        inputs.insert("logits".to_string(), json!([[0.5, -1.5], [2.0, 0.0]]));
        inputs.insert("labels".to_string(), json!([1, 0]));

        let tensors = build_request_tensors(&spec, &inputs).unwrap();
        let raw: Vec<RawOutput> = tensors
            .iter()
            .map(|t| RawOutput {
                name: t.name.clone(),
                shape: Some(t.shape.clone()),
                datatype: Some(t.datatype),
                data: t.data.to_json(),
            })
            .collect();

        let parsed = parse_response_tensors(&spec, &raw).unwrap();
        for tensor in &tensors {
            let value = &parsed[&tensor.name];
            assert_eq!(value.shape, tensor.shape);
            assert_eq!(value.datatype, tensor.datatype);
            assert_eq!(value.data, tensor.data);
        }
    }
}
