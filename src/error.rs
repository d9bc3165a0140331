use thiserror::Error;

/// Invalid or missing configuration. Always fatal, surfaced before the
/// first training iteration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("cvar alpha must lie in (0, 1), got {0}")]
    AlphaOutOfRange(f64),
    #[error("cvar budget must be >= 0, got {0}")]
    NegativeBudget(f64),
    #[error("clip ratio epsilon must lie in (0, 1), got {0}")]
    ClipRatioOutOfRange(f64),
    #[error("discount factor gamma must lie in (0, 1], got {0}")]
    DiscountOutOfRange(f64),
    #[error("trace decay lambda must lie in [0, 1], got {0}")]
    TraceDecayOutOfRange(f64),
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("{name} must be at least 1, got {value}")]
    ZeroCount { name: &'static str, value: usize },
    #[error("layer bounds invalid: attachment cap {attachment_cap} exceeds limit cap {limit_cap}")]
    LayerBoundsInverted { attachment_cap: f64, limit_cap: f64 },
    #[error("price floor {floor} must be below price ceiling {ceiling}")]
    PriceBandInverted { floor: f64, ceiling: f64 },
}

/// A contract violation at the environment boundary. Indicates an upstream
/// invariant breach (the policy must emit in-bounds bids), never clamped here.
#[derive(Debug, Error, PartialEq)]
pub enum EnvError {
    #[error("bid for agent {agent} out of bounds: {field} = {value}")]
    BidOutOfBounds { agent: u64, field: &'static str, value: f64 },
    #[error("expected {expected} bids (one per agent), got {got}")]
    BidCountMismatch { expected: usize, got: usize },
    #[error("step called on terminated episode")]
    EpisodeOver,
}

/// Training-loop failures. Divergence is retryable up to a limit; everything
/// else is fatal.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("non-finite {quantity} at iteration {iteration} after {retries} retries")]
    Diverged { quantity: &'static str, iteration: u64, retries: u32 },
    #[error("checkpoint i/o: {0}")]
    Checkpoint(#[from] std::io::Error),
    #[error("checkpoint decode: {0}")]
    CheckpointDecode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_bound() {
        let e = ConfigError::AlphaOutOfRange(1.5);
        assert!(e.to_string().contains("(0, 1)"));
        let e = ConfigError::NonPositive { name: "dual_lr", value: -0.1 };
        assert!(e.to_string().contains("dual_lr"));
    }

    #[test]
    fn env_error_names_offending_field() {
        let e = EnvError::BidOutOfBounds { agent: 2, field: "cession", value: 1.7 };
        let msg = e.to_string();
        assert!(msg.contains("cession") && msg.contains("agent 2"));
    }
}
