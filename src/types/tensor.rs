//! Tensor datatypes, payloads, and model specifications.
//!
//! All conversion from caller-supplied JSON into typed tensor data happens
//! here, once, so arithmetic downstream never has to guess at element types.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Wire-level tensor datatypes understood by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "UINT8")]
    Uint8,
    #[serde(rename = "INT32")]
    Int32,
    #[serde(rename = "INT64")]
    Int64,
    #[serde(rename = "FP32")]
    Fp32,
    #[serde(rename = "FP64")]
    Fp64,
    #[serde(rename = "STRING")]
    String,
}

impl Datatype {
    /// Wire name of this datatype.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Uint8 => "UINT8",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Fp32 => "FP32",
            Self::Fp64 => "FP64",
            Self::String => "STRING",
        }
    }

    /// Whether values of this datatype participate in numeric aggregation.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool | Self::String)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat tensor payload, one lane per supported datatype.
///
/// The tagged union replaces dynamic array typing: a value is converted
/// exactly once, at the marshaling boundary, and carries its type from
/// then on.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    Uint8(Vec<u8>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Fp32(Vec<f32>),
    Fp64(Vec<f64>),
    String(Vec<String>),
}

impl TensorData {
    /// Number of elements in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Uint8(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Fp32(v) => v.len(),
            Self::Fp64(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The datatype this payload was converted to.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        match self {
            Self::Bool(_) => Datatype::Bool,
            Self::Uint8(_) => Datatype::Uint8,
            Self::Int32(_) => Datatype::Int32,
            Self::Int64(_) => Datatype::Int64,
            Self::Fp32(_) => Datatype::Fp32,
            Self::Fp64(_) => Datatype::Fp64,
            Self::String(_) => Datatype::String,
        }
    }

    /// Numeric lanes widened to `f64` for aggregation arithmetic.
    ///
    /// Returns `None` for BOOL and STRING payloads.
    #[must_use]
    pub fn as_f64_lane(&self) -> Option<Vec<f64>> {
        match self {
            Self::Uint8(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Self::Int32(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Self::Int64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Fp32(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Self::Fp64(v) => Some(v.clone()),
            Self::Bool(_) | Self::String(_) => None,
        }
    }

    /// Converts a JSON value (flat or nested array, or a single scalar)
    /// into a payload of the given datatype.
    ///
    /// No coercion across incompatible datatypes is attempted: strings are
    /// rejected for numeric datatypes, numbers for STRING, fractional
    /// values for integer datatypes.
    pub fn from_json(datatype: Datatype, value: &Value, tensor: &str) -> Result<Self> {
        let mut leaves = Vec::new();
        collect_leaves(value, &mut leaves);

        match datatype {
            Datatype::Fp32 => leaves
                .iter()
                .map(|v| leaf_f64(v, tensor, datatype).map(|x| x as f32))
                .collect::<Result<Vec<_>>>()
                .map(Self::Fp32),
            Datatype::Fp64 => leaves
                .iter()
                .map(|v| leaf_f64(v, tensor, datatype))
                .collect::<Result<Vec<_>>>()
                .map(Self::Fp64),
            Datatype::Int32 => leaves
                .iter()
                .map(|v| {
                    leaf_i64(v, tensor, datatype).and_then(|x| {
                        i32::try_from(x).map_err(|_| {
                            Error::unsupported_value(
                                tensor,
                                datatype,
                                format!("value {x} out of range for INT32"),
                            )
                        })
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Int32),
            Datatype::Int64 => leaves
                .iter()
                .map(|v| leaf_i64(v, tensor, datatype))
                .collect::<Result<Vec<_>>>()
                .map(Self::Int64),
            Datatype::Uint8 => leaves
                .iter()
                .map(|v| {
                    leaf_i64(v, tensor, datatype).and_then(|x| {
                        u8::try_from(x).map_err(|_| {
                            Error::unsupported_value(
                                tensor,
                                datatype,
                                format!("value {x} out of range for UINT8"),
                            )
                        })
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Uint8),
            Datatype::Bool => leaves
                .iter()
                .map(|v| {
                    v.as_bool().ok_or_else(|| {
                        Error::unsupported_value(tensor, datatype, non_scalar_message(v))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Bool),
            Datatype::String => leaves
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        Error::unsupported_value(tensor, datatype, non_scalar_message(v))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::String),
        }
    }

    /// Renders the payload as a flat JSON array.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(v) => serde_json::json!(v),
            Self::Uint8(v) => serde_json::json!(v),
            Self::Int32(v) => serde_json::json!(v),
            Self::Int64(v) => serde_json::json!(v),
            Self::Fp32(v) => serde_json::json!(v),
            Self::Fp64(v) => serde_json::json!(v),
            Self::String(v) => serde_json::json!(v),
        }
    }
}

impl Serialize for TensorData {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

fn collect_leaves<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_leaves(item, out);
            }
        }
        other => out.push(other),
    }
}

fn non_scalar_message(value: &Value) -> String {
    match value {
        Value::String(_) => "string value where a number was expected".to_string(),
        Value::Bool(_) => "boolean value in a non-BOOL tensor".to_string(),
        Value::Null => "null value".to_string(),
        Value::Object(_) => "nested object in tensor data".to_string(),
        other => format!("incompatible value: {other}"),
    }
}

fn leaf_f64(value: &Value, tensor: &str, datatype: Datatype) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::unsupported_value(tensor, datatype, non_scalar_message(value)))
}

fn leaf_i64(value: &Value, tensor: &str, datatype: Datatype) -> Result<i64> {
    match value.as_i64() {
        Some(x) => Ok(x),
        None if value.is_f64() => Err(Error::unsupported_value(
            tensor,
            datatype,
            format!("fractional value {value} in an integer tensor"),
        )),
        None => Err(Error::unsupported_value(
            tensor,
            datatype,
            non_scalar_message(value),
        )),
    }
}

/// Infers the shape of a (possibly nested) JSON array.
///
/// A scalar has the empty shape. Ragged nesting is rejected.
pub fn infer_shape(value: &Value, tensor: &str, datatype: Datatype) -> Result<Vec<usize>> {
    let mut shape = Vec::new();
    let mut current = value;
    loop {
        match current {
            Value::Array(items) => {
                shape.push(items.len());
                check_uniform(items, tensor, datatype)?;
                match items.first() {
                    Some(first) => current = first,
                    None => break,
                }
            }
            _ => break,
        }
    }
    Ok(shape)
}

fn check_uniform(items: &[Value], tensor: &str, datatype: Datatype) -> Result<()> {
    let mut lens = items.iter().map(|item| match item {
        Value::Array(inner) => Some(inner.len()),
        _ => None,
    });
    let first = match lens.next() {
        Some(len) => len,
        None => return Ok(()),
    };
    if lens.any(|len| len != first) {
        return Err(Error::unsupported_value(
            tensor,
            datatype,
            "ragged nested array".to_string(),
        ));
    }
    for item in items {
        if let Value::Array(inner) = item {
            check_uniform(inner, tensor, datatype)?;
        }
    }
    Ok(())
}

/// Infers a datatype from the leaf scalars of a JSON value.
///
/// Numeric leaves widen to FP64 if any is fractional, INT64 otherwise.
pub fn infer_datatype(value: &Value, tensor: &str) -> Result<Datatype> {
    let mut leaves = Vec::new();
    collect_leaves(value, &mut leaves);

    let mut saw_float = false;
    let mut saw_int = false;
    let mut saw_bool = false;
    let mut saw_string = false;
    for leaf in &leaves {
        match leaf {
            Value::Number(n) if n.as_i64().is_some() => saw_int = true,
            Value::Number(_) => saw_float = true,
            Value::Bool(_) => saw_bool = true,
            Value::String(_) => saw_string = true,
            other => {
                return Err(Error::unsupported_value(
                    tensor,
                    Datatype::Fp64,
                    non_scalar_message(other),
                ))
            }
        }
    }

    match (saw_float || saw_int, saw_bool, saw_string) {
        (_, false, true) if !saw_float && !saw_int => Ok(Datatype::String),
        (_, true, false) if !saw_float && !saw_int => Ok(Datatype::Bool),
        (true, false, false) if saw_float => Ok(Datatype::Fp64),
        (true, false, false) => Ok(Datatype::Int64),
        // empty arrays default to FP64
        (false, false, false) => Ok(Datatype::Fp64),
        _ => Err(Error::unsupported_value(
            tensor,
            Datatype::Fp64,
            "mixed scalar kinds in tensor data".to_string(),
        )),
    }
}

/// A shaped, typed tensor payload.
///
/// Invariant: the element count implied by `shape` equals `data.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorValue {
    pub shape: Vec<usize>,
    pub datatype: Datatype,
    pub data: TensorData,
}

impl TensorValue {
    /// Constructs a value, enforcing the element-count invariant.
    pub fn new(tensor: &str, shape: Vec<usize>, datatype: Datatype, data: TensorData) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::ShapeMismatch {
                tensor: tensor.to_string(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape,
            datatype,
            data,
        })
    }

    /// Element count implied by the shape.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Builds a value from either wire form: a bare (possibly nested) JSON
    /// array, or an explicit `{data, shape?, datatype?}` object.
    pub fn from_wire(raw: &Value, tensor: &str) -> Result<Self> {
        if let Some(obj) = raw.as_object() {
            let data_value = obj.get("data").ok_or_else(|| {
                Error::unsupported_value(
                    tensor,
                    Datatype::Fp64,
                    "object payload must carry a data field".to_string(),
                )
            })?;
            let datatype = match obj.get("datatype") {
                Some(dt) => serde_json::from_value(dt.clone()).map_err(|e| {
                    Error::unsupported_value(tensor, Datatype::Fp64, format!("bad datatype: {e}"))
                })?,
                None => infer_datatype(data_value, tensor)?,
            };
            let shape = match obj.get("shape") {
                Some(s) => serde_json::from_value(s.clone()).map_err(|e| {
                    Error::unsupported_value(tensor, datatype, format!("bad shape: {e}"))
                })?,
                None => infer_shape(data_value, tensor, datatype)?,
            };
            let data = TensorData::from_json(datatype, data_value, tensor)?;
            return Self::new(tensor, shape, datatype, data);
        }

        let datatype = infer_datatype(raw, tensor)?;
        let shape = infer_shape(raw, tensor, datatype)?;
        let data = TensorData::from_json(datatype, raw, tensor)?;
        Self::new(tensor, shape, datatype, data)
    }
}

impl<'de> Deserialize<'de> for TensorValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Self::from_wire(&raw, "output").map_err(serde::de::Error::custom)
    }
}

/// A named tensor ready for dispatch to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<usize>,
    pub datatype: Datatype,
    pub data: TensorData,
}

/// Declared input or output of a served model.
///
/// Shapes are as reported by the server; `-1` marks a dynamic dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub datatype: Datatype,
    pub shape: Vec<i64>,
}

/// Metadata for one served model, loaded from the backend and replaced
/// wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<TensorSpec>,
    #[serde(default)]
    pub outputs: Vec<TensorSpec>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub max_batch_size: u32,
}

/// Read-only view of the servable models.
pub type SpecSnapshot = HashMap<String, ModelSpec>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datatype_wire_names() {
        assert_eq!(serde_json::to_string(&Datatype::Fp32).unwrap(), "\"FP32\"");
        assert_eq!(
            serde_json::from_str::<Datatype>("\"STRING\"").unwrap(),
            Datatype::String
        );
        assert_eq!(Datatype::Int64.to_string(), "INT64");
        assert!(Datatype::Fp64.is_numeric());
        assert!(!Datatype::String.is_numeric());
    }

    #[test]
    fn test_shape_inference() {
        assert_eq!(
            infer_shape(&json!([[1, 2], [3, 4], [5, 6]]), "t", Datatype::Fp32).unwrap(),
            vec![3, 2]
        );
        assert_eq!(
            infer_shape(&json!([1, 2, 3]), "t", Datatype::Fp32).unwrap(),
            vec![3]
        );
        assert_eq!(
            infer_shape(&json!(5), "t", Datatype::Fp32).unwrap(),
            Vec::<usize>::new()
        );
    }

    #[test]
    fn test_ragged_arrays_rejected() {
        let err = infer_shape(&json!([[1, 2], [3]]), "t", Datatype::Fp32).unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");
    }

    #[test]
    fn test_from_json_respects_datatype_boundaries() {
        // strings never coerce to numbers
        let err = TensorData::from_json(Datatype::Fp32, &json!(["0.5"]), "t").unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");

        // fractional values never coerce to integers
        let err = TensorData::from_json(Datatype::Int32, &json!([1.5]), "t").unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");

        // numbers never coerce to strings
        let err = TensorData::from_json(Datatype::String, &json!([1]), "t").unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");

        let data = TensorData::from_json(Datatype::Fp32, &json!([[1, 2], [3, 4]]), "t").unwrap();
        assert_eq!(data, TensorData::Fp32(vec![1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_int32_range_checked() {
        let err = TensorData::from_json(Datatype::Int32, &json!([3_000_000_000_i64]), "t")
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_value");
    }

    #[test]
    fn test_element_count_invariant() {
        let err = TensorValue::new(
            "t",
            vec![2, 2],
            Datatype::Fp32,
            TensorData::Fp32(vec![1.0, 2.0, 3.0]),
        )
        .unwrap_err();
        match err {
            Error::ShapeMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_wire_bare_array() {
        let value = TensorValue::from_wire(&json!([0.2, 0.8]), "p").unwrap();
        assert_eq!(value.shape, vec![2]);
        assert_eq!(value.datatype, Datatype::Fp64);

        let value = TensorValue::from_wire(&json!([[1, 2], [3, 4]]), "p").unwrap();
        assert_eq!(value.shape, vec![2, 2]);
        assert_eq!(value.datatype, Datatype::Int64);
    }

    #[test]
    fn test_from_wire_explicit_object() {
        let raw = json!({"data": [1.0, 2.0, 3.0, 4.0], "shape": [2, 2], "datatype": "FP32"});
        let value = TensorValue::from_wire(&raw, "p").unwrap();
        assert_eq!(value.shape, vec![2, 2]);
        assert_eq!(value.datatype, Datatype::Fp32);
        assert_eq!(value.data, TensorData::Fp32(vec![1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_tensor_value_serializes_flat_data() {
        let value = TensorValue::new(
            "t",
            vec![2],
            Datatype::Int32,
            TensorData::Int32(vec![7, 9]),
        )
        .unwrap();
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, json!({"shape": [2], "datatype": "INT32", "data": [7, 9]}));
    }

    #[test]
    fn test_f64_lane_widening() {
        assert_eq!(
            TensorData::Int32(vec![1, 2]).as_f64_lane(),
            Some(vec![1.0, 2.0])
        );
        assert_eq!(
            TensorData::String(vec!["a".to_string()]).as_f64_lane(),
            None
        );
        assert_eq!(TensorData::Bool(vec![true]).as_f64_lane(), None);
    }
}
