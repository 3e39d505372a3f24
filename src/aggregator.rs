//! Result aggregation across multiple inference results.
//!
//! Strategies are a closed enum dispatched through an explicit match of
//! pure functions: given the same batch and weights, the merged output is
//! deterministic, and nothing is retried or cached.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::result::InferenceResult;
use crate::types::tensor::{Datatype, TensorData, TensorValue};

/// Execution time assumed for results whose metadata omits one.
const DEFAULT_EXECUTION_TIME_MS: u64 = 1000;

/// How a batch of results is combined into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// Return the first result's outputs verbatim. A placeholder policy,
    /// not an average.
    #[default]
    Default,
    /// Elementwise arithmetic mean across results.
    Ensemble,
    /// Weighted elementwise sum using caller-supplied weights.
    Weighted,
    /// Weighted, with weights derived from each result's execution time.
    Confidence,
}

impl AggregationStrategy {
    /// All selectable strategies.
    pub const ALL: [Self; 4] = [Self::Default, Self::Ensemble, Self::Weighted, Self::Confidence];

    /// Short human-readable description, used in status replies.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Default => "Return first result or simple selection",
            Self::Ensemble => "Average outputs across all results",
            Self::Weighted => "Weighted combination based on provided weights",
            Self::Confidence => "Weight by inverse execution time",
        }
    }
}

/// An aggregation call: the batch, the strategy, optional weights.
///
/// Order matters: weights align positionally with results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRequest {
    pub results: Vec<InferenceResult>,
    #[serde(default)]
    pub aggregation_type: AggregationStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
}

/// Provenance attached to an aggregated result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationMetadata {
    pub agent_id: String,
    pub aggregation_type: AggregationStrategy,
    pub num_results: usize,
    pub timestamp: DateTime<Utc>,
}

/// The merged outputs plus the original batch for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub aggregated_results: HashMap<String, TensorValue>,
    pub metadata: AggregationMetadata,
    pub individual_results: Vec<InferenceResult>,
}

/// Combines batches of inference results under a selectable strategy.
pub struct Aggregator {
    identity: String,
}

impl Aggregator {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    /// Merges the batch under the given strategy.
    ///
    /// A single-element batch short-circuits to that element's outputs
    /// unchanged, for every strategy. A weight vector that is absent or of
    /// the wrong length falls back to the ensemble strategy; this is the
    /// only documented downgrade.
    pub fn aggregate(
        &self,
        results: &[InferenceResult],
        strategy: AggregationStrategy,
        weights: Option<&[f64]>,
    ) -> Result<AggregatedResult> {
        if results.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let aggregated = if results.len() == 1 {
            results[0].outputs.clone()
        } else {
            match strategy {
                AggregationStrategy::Default => results[0].outputs.clone(),
                AggregationStrategy::Ensemble => merge_ensemble(results)?,
                AggregationStrategy::Weighted => match normalized_weights(results.len(), weights)? {
                    Some(weights) => merge_weighted(results, &weights)?,
                    None => {
                        warn!(
                            num_results = results.len(),
                            "Weights absent or mismatched, falling back to ensemble"
                        );
                        merge_ensemble(results)?
                    }
                },
                AggregationStrategy::Confidence => {
                    let derived = confidence_weights(results);
                    debug!(weights = ?derived, "Derived confidence weights");
                    let normalized = normalize(&derived)?;
                    merge_weighted(results, &normalized)?
                }
            }
        };

        Ok(AggregatedResult {
            aggregated_results: aggregated,
            metadata: AggregationMetadata {
                agent_id: self.identity.clone(),
                aggregation_type: strategy,
                num_results: results.len(),
                timestamp: Utc::now(),
            },
            individual_results: results.to_vec(),
        })
    }
}

/// Validates and normalizes caller-supplied weights.
///
/// Absent or length-mismatched weights yield `None` (the documented
/// ensemble fallback); a well-shaped vector that cannot be normalized is
/// caller fault and errors out.
fn normalized_weights(batch_len: usize, weights: Option<&[f64]>) -> Result<Option<Vec<f64>>> {
    match weights {
        Some(weights) if weights.len() == batch_len => normalize(weights).map(Some),
        _ => Ok(None),
    }
}

fn normalize(weights: &[f64]) -> Result<Vec<f64>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(Error::aggregation(
            "weights must be finite and non-negative",
        ));
    }
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return Err(Error::aggregation("weights sum to zero"));
    }
    Ok(weights.iter().map(|w| w / sum).collect())
}

/// Inverse execution time, so faster results weigh more. A heuristic, not
/// a probability calibration.
fn confidence_weights(results: &[InferenceResult]) -> Vec<f64> {
    results
        .iter()
        .map(|result| {
            let execution_ms = result
                .metadata
                .execution_time_ms
                .unwrap_or(DEFAULT_EXECUTION_TIME_MS);
            1.0 / (execution_ms as f64 + 1.0)
        })
        .collect()
}

/// Elementwise mean per output key of the first result.
///
/// Results missing a key are excluded from that key's mean, not zeroed.
fn merge_ensemble(results: &[InferenceResult]) -> Result<HashMap<String, TensorValue>> {
    let mut merged = HashMap::new();

    for name in results[0].outputs.keys() {
        let mut accumulated: Option<(Vec<usize>, Vec<f64>)> = None;
        let mut contributing = 0usize;

        for result in results {
            let Some(value) = result.outputs.get(name) else {
                continue;
            };
            accumulate(name, value, 1.0, &mut accumulated)?;
            contributing += 1;
        }

        if let Some((shape, mut sums)) = accumulated {
            for sum in &mut sums {
                *sum /= contributing as f64;
            }
            merged.insert(name.clone(), fp64_value(shape, sums));
        }
    }

    Ok(merged)
}

/// Weighted elementwise sum per output key of the first result, using each
/// result's normalized weight.
fn merge_weighted(
    results: &[InferenceResult],
    weights: &[f64],
) -> Result<HashMap<String, TensorValue>> {
    let mut merged = HashMap::new();

    for name in results[0].outputs.keys() {
        let mut accumulated: Option<(Vec<usize>, Vec<f64>)> = None;

        for (result, &weight) in results.iter().zip(weights) {
            let Some(value) = result.outputs.get(name) else {
                continue;
            };
            accumulate(name, value, weight, &mut accumulated)?;
        }

        if let Some((shape, sums)) = accumulated {
            merged.insert(name.clone(), fp64_value(shape, sums));
        }
    }

    Ok(merged)
}

/// Adds `weight * value` into the running sum, enforcing shape agreement
/// and numeric datatypes.
fn accumulate(
    name: &str,
    value: &TensorValue,
    weight: f64,
    accumulated: &mut Option<(Vec<usize>, Vec<f64>)>,
) -> Result<()> {
    let lane = value.data.as_f64_lane().ok_or_else(|| {
        Error::aggregation(format!(
            "output '{name}' has non-numeric datatype {}",
            value.datatype
        ))
    })?;

    match accumulated {
        None => {
            *accumulated = Some((
                value.shape.clone(),
                lane.iter().map(|x| x * weight).collect(),
            ));
        }
        Some((shape, sums)) => {
            if value.shape != *shape {
                return Err(Error::aggregation(format!(
                    "shape mismatch for output '{name}': {:?} vs {:?}",
                    shape, value.shape
                )));
            }
            for (sum, x) in sums.iter_mut().zip(&lane) {
                *sum += x * weight;
            }
        }
    }
    Ok(())
}

fn fp64_value(shape: Vec<usize>, data: Vec<f64>) -> TensorValue {
    TensorValue {
        shape,
        datatype: Datatype::Fp64,
        data: TensorData::Fp64(data),
    }
}
