//! Serializable optimizer selection.

use serde::{Deserialize, Serialize};

use crate::error::{OptError, OptResult};
use crate::gradient_descent::GradientDescent;
use crate::nelder_mead::NelderMead;
use crate::optimizer::{Optimizer, Termination};
use crate::spsa::Spsa;

fn default_learning_rate() -> f64 {
    0.1
}

fn default_finite_diff_epsilon() -> f64 {
    1e-4
}

fn default_initial_step() -> f64 {
    0.5
}

fn default_spsa_a() -> f64 {
    0.2
}

fn default_spsa_c() -> f64 {
    0.1
}

fn default_spsa_alpha() -> f64 {
    0.602
}

fn default_spsa_gamma() -> f64 {
    0.101
}

fn default_spsa_stability() -> f64 {
    10.0
}

/// Which optimizer to run, and its algorithm-specific settings.
///
/// Stopping rules are supplied separately when building, so the same
/// selection can be reused across budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    GradientDescent {
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_finite_diff_epsilon")]
        finite_diff_epsilon: f64,
    },
    NelderMead {
        #[serde(default = "default_initial_step")]
        initial_step: f64,
    },
    Spsa {
        #[serde(default = "default_spsa_a")]
        a: f64,
        #[serde(default = "default_spsa_c")]
        c: f64,
        #[serde(default = "default_spsa_alpha")]
        alpha: f64,
        #[serde(default = "default_spsa_gamma")]
        gamma: f64,
        #[serde(default = "default_spsa_stability")]
        stability: f64,
        #[serde(default)]
        seed: u64,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::GradientDescent {
            learning_rate: default_learning_rate(),
            finite_diff_epsilon: default_finite_diff_epsilon(),
        }
    }
}

fn positive(name: &str, value: f64) -> OptResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(OptError::setting(name, format!("must be positive, got {value}")))
    }
}

impl OptimizerConfig {
    /// Short name of the selected optimizer.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerConfig::GradientDescent { .. } => "gradient_descent",
            OptimizerConfig::NelderMead { .. } => "nelder_mead",
            OptimizerConfig::Spsa { .. } => "spsa",
        }
    }

    /// Check every setting.
    pub fn validate(&self) -> OptResult<()> {
        match *self {
            OptimizerConfig::GradientDescent {
                learning_rate,
                finite_diff_epsilon,
            } => {
                positive("learning_rate", learning_rate)?;
                positive("finite_diff_epsilon", finite_diff_epsilon)
            }
            OptimizerConfig::NelderMead { initial_step } => positive("initial_step", initial_step),
            OptimizerConfig::Spsa {
                a,
                c,
                alpha,
                gamma,
                stability,
                ..
            } => {
                positive("a", a)?;
                positive("c", c)?;
                positive("alpha", alpha)?;
                positive("gamma", gamma)?;
                if !(stability.is_finite() && stability >= 0.0) {
                    return Err(OptError::setting("stability", "must be non-negative"));
                }
                Ok(())
            }
        }
    }

    /// Build the optimizer with the given stopping rules.
    pub fn build(&self, termination: Termination) -> OptResult<Box<dyn Optimizer>> {
        self.validate()?;
        if !(termination.tolerance.is_finite() && termination.tolerance >= 0.0) {
            return Err(OptError::setting("tolerance", "must be non-negative"));
        }

        let optimizer: Box<dyn Optimizer> = match *self {
            OptimizerConfig::GradientDescent {
                learning_rate,
                finite_diff_epsilon,
            } => Box::new(GradientDescent {
                learning_rate,
                finite_diff_epsilon,
                termination,
            }),
            OptimizerConfig::NelderMead { initial_step } => Box::new(NelderMead {
                initial_step,
                termination,
            }),
            OptimizerConfig::Spsa {
                a,
                c,
                alpha,
                gamma,
                stability,
                seed,
            } => Box::new(Spsa {
                a,
                c,
                alpha,
                gamma,
                stability,
                seed,
                termination,
            }),
        };
        Ok(optimizer)
    }
}
