use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::env::MarketState;
use crate::net::{Mlp, MlpGrad};

/// Scalar state estimator trained by regression toward bootstrapped targets.
/// Two independent instances run side by side: one for the discounted
/// return, one for the tail-cost-to-go consumed by the CVaR constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critic {
    net: Mlp,
}

impl Critic {
    pub fn new(hidden: &[usize], rng: &mut ChaCha20Rng) -> Self {
        Critic { net: Mlp::new(MarketState::DIM, 1, hidden, rng) }
    }

    pub fn n_params(&self) -> usize {
        self.net.n_params()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        self.net.forward(features).output[0]
    }

    /// Squared-error loss and its gradient for one sample. The caller
    /// accumulates across a minibatch and applies through its optimizer.
    pub fn regression_grad(&self, features: &[f64], target: f64) -> (f64, MlpGrad) {
        let trace = self.net.forward(features);
        let error = trace.output[0] - target;
        let grad = self.net.backward(&trace, &[2.0 * error]);
        (error * error, grad)
    }

    pub fn zero_grad(&self) -> MlpGrad {
        self.net.zero_grad()
    }

    pub fn apply_updates(&mut self, updates: &[f64]) {
        self.net.apply_updates(updates);
    }
}
