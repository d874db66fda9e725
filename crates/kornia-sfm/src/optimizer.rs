//! Update rules for the correction matrix optimization.
//!
//! The resolver computes a gradient for the 3x3 correction matrix and hands it to an
//! [`UpdateRule`], which decides how the matrix moves. Rules own their internal state
//! (e.g. the momentum velocity) for the duration of a single run.

use glam::DMat3;
use serde::{Deserialize, Serialize};

use crate::error::SfmError;

/// A strategy to update the correction matrix from a gradient.
pub trait UpdateRule {
    /// Apply one update step in place.
    fn step(&mut self, correction: &mut DMat3, gradient: &DMat3);

    /// Clear any state carried between steps.
    fn reset(&mut self) {}
}

/// Plain gradient descent: `Q <- Q - lr * grad`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    /// Step size.
    pub learning_rate: f64,
}

impl GradientDescent {
    /// Create a plain gradient descent rule.
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl UpdateRule for GradientDescent {
    fn step(&mut self, correction: &mut DMat3, gradient: &DMat3) {
        *correction -= *gradient * self.learning_rate;
    }
}

/// Gradient descent with classical momentum.
///
/// `v <- momentum * v - lr * grad` followed by `Q <- Q + v`.
#[derive(Debug, Clone)]
pub struct MomentumGradientDescent {
    /// Step size.
    pub learning_rate: f64,
    /// Fraction of the previous velocity kept at every step.
    pub momentum: f64,
    velocity: DMat3,
}

impl MomentumGradientDescent {
    /// Create a momentum rule with zero initial velocity.
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: DMat3::ZERO,
        }
    }

    /// The current velocity.
    pub fn velocity(&self) -> &DMat3 {
        &self.velocity
    }
}

impl UpdateRule for MomentumGradientDescent {
    fn step(&mut self, correction: &mut DMat3, gradient: &DMat3) {
        self.velocity = self.velocity * self.momentum - *gradient * self.learning_rate;
        *correction += self.velocity;
    }

    fn reset(&mut self) {
        self.velocity = DMat3::ZERO;
    }
}

/// Serializable selection of an [`UpdateRule`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateRuleConfig {
    /// Plain gradient descent.
    GradientDescent {
        /// Step size.
        learning_rate: f64,
    },
    /// Gradient descent with momentum.
    Momentum {
        /// Step size.
        learning_rate: f64,
        /// Momentum coefficient in [0, 1).
        momentum: f64,
    },
}

impl UpdateRuleConfig {
    /// The configured learning rate.
    pub fn learning_rate(&self) -> f64 {
        match *self {
            Self::GradientDescent { learning_rate } => learning_rate,
            Self::Momentum { learning_rate, .. } => learning_rate,
        }
    }

    /// Check the hyperparameters.
    pub fn validate(&self) -> Result<(), SfmError> {
        let learning_rate = self.learning_rate();
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(SfmError::Configuration(format!(
                "learning rate must be positive and finite, got {learning_rate}"
            )));
        }

        if let Self::Momentum { momentum, .. } = *self {
            if !(0.0..1.0).contains(&momentum) {
                return Err(SfmError::Configuration(format!(
                    "momentum must be in [0, 1), got {momentum}"
                )));
            }
        }

        Ok(())
    }

    /// Instantiate the rule with fresh state.
    pub fn build(&self) -> Box<dyn UpdateRule> {
        match *self {
            Self::GradientDescent { learning_rate } => Box::new(GradientDescent::new(learning_rate)),
            Self::Momentum {
                learning_rate,
                momentum,
            } => Box::new(MomentumGradientDescent::new(learning_rate, momentum)),
        }
    }
}
