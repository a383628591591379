//! Box constraints on parameter vectors.

use serde::{Deserialize, Serialize};

use crate::error::{OptError, OptResult};

/// Per-parameter `(min, max)` bounds.
///
/// Bounds are hard constraints. Optimizers in this crate clip every trial
/// point into the box before evaluating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct Bounds(Vec<(f64, f64)>);

impl TryFrom<Vec<(f64, f64)>> for Bounds {
    type Error = OptError;

    fn try_from(intervals: Vec<(f64, f64)>) -> OptResult<Self> {
        Self::new(intervals)
    }
}

impl From<Bounds> for Vec<(f64, f64)> {
    fn from(bounds: Bounds) -> Self {
        bounds.0
    }
}

impl Bounds {
    /// Create bounds, checking that every interval is ordered and not NaN.
    pub fn new(intervals: Vec<(f64, f64)>) -> OptResult<Self> {
        for (i, &(lo, hi)) in intervals.iter().enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(OptError::InvalidBounds(format!(
                    "parameter {i}: ({lo}, {hi})"
                )));
            }
        }
        Ok(Self(intervals))
    }

    /// The same interval for every one of `n` parameters.
    pub fn uniform(n: usize, lo: f64, hi: f64) -> OptResult<Self> {
        Self::new(vec![(lo, hi); n])
    }

    /// Number of bounded parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no intervals.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The intervals.
    pub fn intervals(&self) -> &[(f64, f64)] {
        &self.0
    }

    /// Check that the bounds cover exactly `n` parameters.
    pub fn check_dimension(&self, n: usize) -> OptResult<()> {
        if self.0.len() == n {
            Ok(())
        } else {
            Err(OptError::DimensionMismatch {
                expected: n,
                found: self.0.len(),
            })
        }
    }

    /// Whether `point` lies inside the box.
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.0.len()
            && point
                .iter()
                .zip(&self.0)
                .all(|(&p, &(lo, hi))| p >= lo && p <= hi)
    }

    /// Project `point` onto the box.
    pub fn clip(&self, point: &[f64]) -> Vec<f64> {
        point
            .iter()
            .zip(&self.0)
            .map(|(&p, &(lo, hi))| p.clamp(lo, hi))
            .collect()
    }
}

/// Clip `point` when bounds are present, otherwise copy it.
pub fn project(bounds: Option<&Bounds>, point: &[f64]) -> Vec<f64> {
    match bounds {
        Some(b) => b.clip(point),
        None => point.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_inverted_interval() {
        assert!(Bounds::new(vec![(0.0, 1.0), (2.0, 1.0)]).is_err());
        assert!(Bounds::new(vec![(f64::NAN, 1.0)]).is_err());
        assert!(Bounds::new(vec![(1.0, 1.0)]).is_ok());
    }

    #[test]
    fn test_clip_and_contains() {
        let b = Bounds::uniform(2, -1.0, 1.0).unwrap();
        assert_eq!(b.clip(&[2.0, -3.0]), vec![1.0, -1.0]);
        assert!(b.contains(&[0.5, -1.0]));
        assert!(!b.contains(&[0.5, -1.5]));
        assert!(!b.contains(&[0.5]));
    }

    #[test]
    fn test_project_without_bounds() {
        assert_eq!(project(None, &[5.0, 6.0]), vec![5.0, 6.0]);
    }

    #[test]
    fn test_serializes_as_list_of_pairs() {
        let b = Bounds::uniform(1, 0.0, 2.0).unwrap();
        assert_eq!(serde_json::to_string(&b).unwrap(), "[[0.0,2.0]]");
    }

    #[test]
    fn test_deserialization_validates() {
        let ok: Bounds = serde_json::from_str("[[0.0, 1.0], [-2.0, 2.0]]").unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_str::<Bounds>("[[1.0, 0.0]]").is_err());
    }
}
