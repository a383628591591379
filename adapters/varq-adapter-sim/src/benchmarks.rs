//! Built-in benchmark problems.

use std::sync::Arc;

use crate::analytic::ObjectiveFn;

/// Name of the shifted quadratic bowl.
pub const QUADRATIC: &str = "quadratic";
/// Name of the Rosenbrock valley.
pub const ROSENBROCK: &str = "rosenbrock";
/// Name of the sum-of-cosines landscape.
pub const SINUSOID: &str = "sinusoid";

/// `sum_i (x_i - 3)^2`, minimum 0 at `x_i = 3`.
pub fn quadratic(x: &[f64]) -> Vec<f64> {
    vec![x.iter().map(|v| (v - 3.0).powi(2)).sum()]
}

/// `sum_i 100 (x_{i+1} - x_i^2)^2 + (1 - x_i)^2`, minimum 0 at all ones.
pub fn rosenbrock(x: &[f64]) -> Vec<f64> {
    vec![
        x.windows(2)
            .map(|w| 100.0 * (w[1] - w[0] * w[0]).powi(2) + (1.0 - w[0]).powi(2))
            .sum(),
    ]
}

/// One term `cos(x_i)` per parameter.
///
/// Each term behaves like the expectation of a single-qubit rotation, so
/// parameter-shift gradients are exact.
pub fn sinusoid(x: &[f64]) -> Vec<f64> {
    x.iter().map(|v| v.cos()).collect()
}

/// Every benchmark with its name.
pub fn all() -> Vec<(&'static str, ObjectiveFn)> {
    vec![
        (QUADRATIC, Arc::new(quadratic) as ObjectiveFn),
        (ROSENBROCK, Arc::new(rosenbrock) as ObjectiveFn),
        (SINUSOID, Arc::new(sinusoid) as ObjectiveFn),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minima() {
        assert_eq!(quadratic(&[3.0, 3.0]), vec![0.0]);
        assert_eq!(rosenbrock(&[1.0, 1.0, 1.0]), vec![0.0]);
        assert_eq!(sinusoid(&[0.0, 0.0]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_single_parameter_rosenbrock_is_flat() {
        assert_eq!(rosenbrock(&[5.0]), vec![0.0]);
    }

    #[test]
    fn test_all_names_unique() {
        let names: Vec<_> = all().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec![QUADRATIC, ROSENBROCK, SINUSOID]);
    }
}
