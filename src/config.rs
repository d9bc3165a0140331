use crate::error::ConfigError;
use crate::treaty::{PerilSpec, default_peril_specs};

/// Market simulator configuration. Validated before any episode runs.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub num_agents: usize,
    /// Bidding rounds per episode.
    pub max_steps: u32,
    /// Ln-space parameters for the subject-exposure draw per treaty.
    pub exposure_ln_mu: f64,
    pub exposure_ln_sigma: f64,
    /// Rate-on-line band the cedent will entertain (fraction of ceded limit).
    pub price_floor: f64,
    pub price_ceiling: f64,
    /// Layer caps as fractions of subject exposure. attachment_cap <= limit_cap.
    pub attachment_cap: f64,
    pub limit_cap: f64,
    /// Per-step tail threshold: net loss (as a fraction of exposure) beyond
    /// this counts as risk cost for the CVaR estimator.
    pub loss_threshold: f64,
    /// Capacity each agent can deploy per episode, in limit-fraction units.
    pub initial_capacity: f64,
    /// Stress knob: scales every damage-fraction draw (1.0 = calibrated).
    pub severity_multiplier: f64,
    pub perils: Vec<PerilSpec>,
    pub seed: u64,
}

impl EnvConfig {
    pub fn canonical() -> Self {
        EnvConfig {
            num_agents: 3,
            max_steps: 20,
            // exp(4.6) ≈ 100 currency units median exposure.
            exposure_ln_mu: 4.6,
            exposure_ln_sigma: 0.4,
            price_floor: 0.01,
            price_ceiling: 0.50,
            attachment_cap: 0.50,
            limit_cap: 1.0,
            loss_threshold: 0.05,
            initial_capacity: 10.0,
            severity_multiplier: 1.0,
            perils: default_peril_specs(),
            seed: 42,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_agents == 0 {
            return Err(ConfigError::ZeroCount { name: "num_agents", value: self.num_agents });
        }
        if self.max_steps == 0 {
            return Err(ConfigError::ZeroCount { name: "max_steps", value: 0 });
        }
        if self.perils.is_empty() {
            return Err(ConfigError::ZeroCount { name: "perils", value: 0 });
        }
        if self.exposure_ln_sigma <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "exposure_ln_sigma",
                value: self.exposure_ln_sigma,
            });
        }
        if self.price_floor <= 0.0 {
            return Err(ConfigError::NonPositive { name: "price_floor", value: self.price_floor });
        }
        if self.price_floor >= self.price_ceiling {
            return Err(ConfigError::PriceBandInverted {
                floor: self.price_floor,
                ceiling: self.price_ceiling,
            });
        }
        if self.attachment_cap > self.limit_cap {
            return Err(ConfigError::LayerBoundsInverted {
                attachment_cap: self.attachment_cap,
                limit_cap: self.limit_cap,
            });
        }
        if self.limit_cap <= 0.0 {
            return Err(ConfigError::NonPositive { name: "limit_cap", value: self.limit_cap });
        }
        if self.loss_threshold < 0.0 {
            return Err(ConfigError::NegativeBudget(self.loss_threshold));
        }
        if self.initial_capacity <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "initial_capacity",
                value: self.initial_capacity,
            });
        }
        if self.severity_multiplier <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "severity_multiplier",
                value: self.severity_multiplier,
            });
        }
        Ok(())
    }
}

/// Trainer configuration. All knobs required; validated at load time, before
/// the first iteration (configuration errors are fatal, never deferred).
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// CVaR confidence level α ∈ (0, 1).
    pub cvar_alpha: f64,
    /// Max tolerable tail loss (same units as risk cost). >= 0.
    pub cvar_budget: f64,
    /// Discount factor γ ∈ (0, 1].
    pub gamma: f64,
    /// GAE trace decay ∈ [0, 1].
    pub trace_decay: f64,
    /// PPO ratio clip ε ∈ (0, 1).
    pub clip_eps: f64,
    /// Dual ascent step size η > 0.
    pub dual_lr: f64,
    /// Initial Lagrange multiplier (>= 0).
    pub lambda_init: f64,
    /// Environment steps collected per agent per iteration.
    pub rollout_horizon: usize,
    pub iterations: u64,
    pub learning_rate: f64,
    /// Minibatch sweeps over the rollout per iteration.
    pub epochs: usize,
    pub minibatch_size: usize,
    /// Global-norm gradient clip.
    pub max_grad_norm: f64,
    pub hidden: Vec<usize>,
    pub value_coeff: f64,
    pub entropy_coeff: f64,
    /// Divergence retries before escalating to fatal.
    pub retry_limit: u32,
    /// Early stop: reward improvement below this, with CVaR under budget,
    /// for `early_stop_patience` consecutive iterations.
    pub early_stop_tol: f64,
    pub early_stop_patience: u32,
    pub seed: u64,
}

impl TrainConfig {
    pub fn canonical() -> Self {
        TrainConfig {
            cvar_alpha: 0.95,
            cvar_budget: 0.05,
            gamma: 0.99,
            trace_decay: 0.95,
            clip_eps: 0.2,
            dual_lr: 0.05,
            lambda_init: 0.0,
            rollout_horizon: 256,
            iterations: 50,
            learning_rate: 3e-4,
            epochs: 4,
            minibatch_size: 64,
            max_grad_norm: 0.5,
            hidden: vec![64, 64],
            value_coeff: 0.5,
            entropy_coeff: 0.01,
            retry_limit: 3,
            early_stop_tol: 1e-3,
            early_stop_patience: 5,
            seed: 42,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cvar_alpha > 0.0 && self.cvar_alpha < 1.0) {
            return Err(ConfigError::AlphaOutOfRange(self.cvar_alpha));
        }
        if self.cvar_budget < 0.0 {
            return Err(ConfigError::NegativeBudget(self.cvar_budget));
        }
        if !(self.clip_eps > 0.0 && self.clip_eps < 1.0) {
            return Err(ConfigError::ClipRatioOutOfRange(self.clip_eps));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(ConfigError::DiscountOutOfRange(self.gamma));
        }
        if !(0.0..=1.0).contains(&self.trace_decay) {
            return Err(ConfigError::TraceDecayOutOfRange(self.trace_decay));
        }
        if self.dual_lr <= 0.0 {
            return Err(ConfigError::NonPositive { name: "dual_lr", value: self.dual_lr });
        }
        if self.lambda_init < 0.0 {
            return Err(ConfigError::NonPositive { name: "lambda_init", value: self.lambda_init });
        }
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "learning_rate",
                value: self.learning_rate,
            });
        }
        if self.max_grad_norm <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "max_grad_norm",
                value: self.max_grad_norm,
            });
        }
        if self.early_stop_tol <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "early_stop_tol",
                value: self.early_stop_tol,
            });
        }
        if self.rollout_horizon == 0 {
            return Err(ConfigError::ZeroCount { name: "rollout_horizon", value: 0 });
        }
        if self.iterations == 0 {
            return Err(ConfigError::ZeroCount { name: "iterations", value: 0 });
        }
        if self.epochs == 0 {
            return Err(ConfigError::ZeroCount { name: "epochs", value: 0 });
        }
        if self.minibatch_size == 0 {
            return Err(ConfigError::ZeroCount { name: "minibatch_size", value: 0 });
        }
        if self.hidden.is_empty() || self.hidden.contains(&0) {
            return Err(ConfigError::ZeroCount { name: "hidden", value: 0 });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_configs_validate() {
        EnvConfig::canonical().validate().unwrap();
        TrainConfig::canonical().validate().unwrap();
    }

    #[test]
    fn alpha_bounds_rejected() {
        let mut c = TrainConfig::canonical();
        c.cvar_alpha = 1.0;
        assert_eq!(c.validate(), Err(ConfigError::AlphaOutOfRange(1.0)));
        c.cvar_alpha = 0.0;
        assert_eq!(c.validate(), Err(ConfigError::AlphaOutOfRange(0.0)));
    }

    #[test]
    fn negative_budget_rejected() {
        let mut c = TrainConfig::canonical();
        c.cvar_budget = -0.01;
        assert_eq!(c.validate(), Err(ConfigError::NegativeBudget(-0.01)));
    }

    #[test]
    fn clip_ratio_bounds_rejected() {
        let mut c = TrainConfig::canonical();
        c.clip_eps = 1.0;
        assert_eq!(c.validate(), Err(ConfigError::ClipRatioOutOfRange(1.0)));
    }

    #[test]
    fn zero_horizon_rejected() {
        let mut c = TrainConfig::canonical();
        c.rollout_horizon = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn inverted_layer_caps_rejected() {
        let mut c = EnvConfig::canonical();
        c.attachment_cap = 1.5;
        c.limit_cap = 1.0;
        assert!(matches!(c.validate(), Err(ConfigError::LayerBoundsInverted { .. })));
    }

    #[test]
    fn inverted_price_band_rejected() {
        let mut c = EnvConfig::canonical();
        c.price_floor = 0.6;
        c.price_ceiling = 0.5;
        assert!(matches!(c.validate(), Err(ConfigError::PriceBandInverted { .. })));
    }

    #[test]
    fn zero_agents_rejected() {
        let mut c = EnvConfig::canonical();
        c.num_agents = 0;
        assert!(c.validate().is_err());
    }
}
