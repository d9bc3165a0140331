use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::EnvConfig;
use crate::env::{Bid, MarketState};
use crate::net::{ForwardTrace, Mlp};

/// price, cession, attachment, limit.
pub const ACTION_DIM: usize = 4;

/// Bounds on the learnable log standard deviation. Keeps exploration from
/// collapsing to a point mass or exploding; a degenerate distribution here
/// would also break the log-prob floor invariant.
pub const LOG_STD_MIN: f64 = -3.0;
pub const LOG_STD_MAX: f64 = 0.5;

/// No zero-probability action is ever recorded: log-probs are floored here
/// and must be finite.
pub const LOG_PROB_FLOOR: f64 = -30.0;

/// Numerical guard for atanh recovery of the pre-squash sample.
const SQUASH_CLAMP: f64 = 0.999;

/// Stochastic sampling for training, distribution mode for evaluation.
/// Evaluation metrics (CVaR, acceptance rate) are defined on deterministic
/// behavior, so the distinction is explicit and caller-selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActMode {
    Stochastic,
    Deterministic,
}

/// A bid in squashed form: four components in [-1, 1], decoded into domain
/// units only at the environment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquashedAction(pub [f64; ACTION_DIM]);

impl SquashedAction {
    /// Decode into a `Bid`. The affine maps make the §3 bounds hold by
    /// construction: cession lands in [0, 1] and the limit is built upward
    /// from the attachment, so attachment <= limit always.
    pub fn decode(&self, config: &EnvConfig) -> Bid {
        let unit = |a: f64| (a + 1.0) / 2.0;
        let price =
            config.price_floor + unit(self.0[0]) * (config.price_ceiling - config.price_floor);
        let cession = unit(self.0[1]);
        let attachment = unit(self.0[2]) * config.attachment_cap;
        let limit = attachment + unit(self.0[3]) * (config.limit_cap - attachment);
        Bid { price, cession, attachment, limit }
    }
}

/// Diagonal-Gaussian bidding policy with tanh squashing: the network maps a
/// market state to per-component means; a learnable, clamped log-std vector
/// controls exploration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianPolicy {
    net: Mlp,
    log_std: Vec<f64>,
}

impl GaussianPolicy {
    pub fn new(hidden: &[usize], rng: &mut ChaCha20Rng) -> Self {
        GaussianPolicy {
            net: Mlp::new(MarketState::DIM, ACTION_DIM, hidden, rng),
            // Initial std ≈ 0.6.
            log_std: vec![-0.5; ACTION_DIM],
        }
    }

    pub fn n_params(&self) -> usize {
        self.net.n_params() + self.log_std.len()
    }

    pub fn net(&self) -> &Mlp {
        &self.net
    }

    pub fn log_std(&self) -> &[f64] {
        &self.log_std
    }

    pub fn forward(&self, features: &[f64]) -> ForwardTrace {
        self.net.forward(features)
    }

    /// Sample (or take the mode of) the bid distribution for one state.
    /// The returned log-prob is finite and floored at `LOG_PROB_FLOOR`.
    pub fn act(
        &self,
        state: &MarketState,
        rng: &mut ChaCha20Rng,
        mode: ActMode,
    ) -> (SquashedAction, f64) {
        let trace = self.forward(&state.features());
        self.act_from_means(&trace.output, rng, mode)
    }

    /// Same as `act`, starting from precomputed means. Lets the forward
    /// passes of independent agents run in parallel while sampling stays on
    /// one RNG stream in a fixed agent order.
    pub fn act_from_means(
        &self,
        means: &[f64],
        rng: &mut ChaCha20Rng,
        mode: ActMode,
    ) -> (SquashedAction, f64) {
        let mut action = [0.0; ACTION_DIM];
        for (i, slot) in action.iter_mut().enumerate() {
            let raw = match mode {
                ActMode::Stochastic => {
                    let std = self.log_std[i].clamp(LOG_STD_MIN, LOG_STD_MAX).exp();
                    means[i] + rng.sample::<f64, _>(StandardNormal) * std
                }
                ActMode::Deterministic => means[i],
            };
            *slot = raw.tanh().clamp(-SQUASH_CLAMP, SQUASH_CLAMP);
        }
        let action = SquashedAction(action);
        let log_prob = self.log_prob(means, &action);
        (action, log_prob)
    }

    /// Squashed-Gaussian log density of `action` under the distribution with
    /// the given pre-squash means:
    /// log π(a|s) = Σ_i [ log N(atanh(a_i); mean_i, std_i) − log(1 − a_i²) ].
    pub fn log_prob(&self, means: &[f64], action: &SquashedAction) -> f64 {
        let mut lp = 0.0;
        for i in 0..ACTION_DIM {
            let log_s = self.log_std[i].clamp(LOG_STD_MIN, LOG_STD_MAX);
            let std = log_s.exp();
            let a = action.0[i].clamp(-SQUASH_CLAMP, SQUASH_CLAMP);
            let raw = atanh(a);
            let gauss = -0.5 * ((raw - means[i]) / std).powi(2)
                - log_s
                - 0.5 * (2.0 * std::f64::consts::PI).ln();
            let correction = (1.0 - a * a + 1e-6).ln();
            lp += gauss - correction;
        }
        lp.max(LOG_PROB_FLOOR)
    }

    /// d log π / d mean_i = (atanh(a_i) − mean_i) / std_i².
    pub fn d_log_prob_d_means(&self, means: &[f64], action: &SquashedAction) -> [f64; ACTION_DIM] {
        let mut d = [0.0; ACTION_DIM];
        for i in 0..ACTION_DIM {
            let log_s = self.log_std[i].clamp(LOG_STD_MIN, LOG_STD_MAX);
            let std = log_s.exp();
            let raw = atanh(action.0[i].clamp(-SQUASH_CLAMP, SQUASH_CLAMP));
            d[i] = (raw - means[i]) / (std * std);
        }
        d
    }

    /// d log π / d log_std_i = ((atanh(a_i) − mean_i)/std_i)² − 1.
    pub fn d_log_prob_d_log_std(
        &self,
        means: &[f64],
        action: &SquashedAction,
    ) -> [f64; ACTION_DIM] {
        let mut d = [0.0; ACTION_DIM];
        for i in 0..ACTION_DIM {
            let log_s = self.log_std[i].clamp(LOG_STD_MIN, LOG_STD_MAX);
            let std = log_s.exp();
            let raw = atanh(action.0[i].clamp(-SQUASH_CLAMP, SQUASH_CLAMP));
            d[i] = ((raw - means[i]) / std).powi(2) - 1.0;
        }
        d
    }

    /// Mean exploration std across components, for telemetry.
    pub fn mean_std(&self) -> f64 {
        self.log_std
            .iter()
            .map(|ls| ls.clamp(LOG_STD_MIN, LOG_STD_MAX).exp())
            .sum::<f64>()
            / self.log_std.len() as f64
    }

    /// Subtract optimizer updates: network parameters first, then log_std
    /// (re-clamped after every step).
    pub fn apply_updates(&mut self, updates: &[f64]) {
        let offset = self.net.apply_updates(updates);
        for (i, ls) in self.log_std.iter_mut().enumerate() {
            *ls = (*ls - updates[offset + i]).clamp(LOG_STD_MIN, LOG_STD_MAX);
        }
    }
}

fn atanh(x: f64) -> f64 {
    0.5 * ((1.0 + x) / (1.0 - x)).ln()
}
