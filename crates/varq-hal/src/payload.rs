//! Results attached to completed evaluation jobs.

use serde::{Deserialize, Serialize};

/// Result payload of a completed evaluation.
///
/// A payload is either a scalar (one value) or a vector, e.g. one
/// expectation value per observable term. Stochastic backends attach the
/// per-value variance of the estimate and the shot count used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Estimated values.
    pub values: Vec<f64>,
    /// Variance of each value, when the estimate is stochastic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variances: Option<Vec<f64>>,
    /// Number of shots behind the estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shots: Option<u32>,
    /// Backend-specific metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Payload {
    /// Create a payload from a list of values.
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            variances: None,
            shots: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a single-valued payload.
    pub fn scalar(value: f64) -> Self {
        Self::new(vec![value])
    }

    /// Attach per-value variances.
    pub fn with_variances(mut self, variances: Vec<f64>) -> Self {
        self.variances = Some(variances);
        self
    }

    /// Attach the shot count.
    pub fn with_shots(mut self, shots: u32) -> Self {
        self.shots = Some(shots);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The value if this payload is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.values.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }

    /// Sum of all values.
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Variance of [`Payload::total`], assuming independent estimates.
    pub fn total_variance(&self) -> Option<f64> {
        self.variances.as_ref().map(|v| v.iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_payload() {
        let p = Payload::scalar(1.5);
        assert_eq!(p.as_scalar(), Some(1.5));
        assert_eq!(p.total(), 1.5);
        assert!(p.total_variance().is_none());
    }

    #[test]
    fn test_vector_payload() {
        let p = Payload::new(vec![1.0, -0.25, 0.5])
            .with_variances(vec![0.01, 0.02, 0.03])
            .with_shots(1000);
        assert_eq!(p.as_scalar(), None);
        assert!((p.total() - 1.25).abs() < 1e-12);
        assert!((p.total_variance().unwrap() - 0.06).abs() < 1e-12);
        assert_eq!(p.shots, Some(1000));
    }

    #[test]
    fn test_metadata_skipped_when_empty() {
        let json = serde_json::to_value(Payload::scalar(0.0)).unwrap();
        assert!(json.get("metadata").is_none());
        assert!(json.get("shots").is_none());

        let json =
            serde_json::to_value(Payload::scalar(0.0).with_metadata("seed", 7.into())).unwrap();
        assert_eq!(json["metadata"]["seed"], 7);
    }
}
