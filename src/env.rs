use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, LogNormal};
use serde::Serialize;

use crate::config::EnvConfig;
use crate::error::{ConfigError, EnvError};
use crate::treaty::{Peril, Treaty};
use crate::types::{AgentId, TreatyId};

/// Per-agent snapshot of the market at one bidding round. Immutable once
/// produced; the policy consumes it, never mutates it.
#[derive(Debug, Clone, Serialize)]
pub struct MarketState {
    pub treaty_id: TreatyId,
    pub peril: Peril,
    /// Standardized ln-exposure of the treaty on offer.
    pub exposure_z: f64,
    /// Expected ground-up loss as a fraction of exposure.
    pub expected_loss_fraction: f64,
    /// Damage-fraction quantiles at p50/p90/p99.
    pub loss_quantiles: [f64; 3],
    pub event_frequency: f64,
    /// Public competitor signal: last round's winning rate on line
    /// (price floor before any round has cleared).
    pub last_winning_price: f64,
    /// This agent's remaining capacity, in limit-fraction units.
    pub remaining_capacity: f64,
    /// Fraction of the episode elapsed.
    pub step_fraction: f64,
}

impl MarketState {
    pub const DIM: usize = 9;

    pub fn features(&self) -> [f64; Self::DIM] {
        [
            self.exposure_z,
            self.expected_loss_fraction,
            self.loss_quantiles[0],
            self.loss_quantiles[1],
            self.loss_quantiles[2],
            self.event_frequency,
            self.last_winning_price,
            self.remaining_capacity,
            self.step_fraction,
        ]
    }
}

/// A structured treaty bid. All fractions are of the treaty's subject
/// exposure; `price` is rate on line applied to the ceded layer width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bid {
    pub price: f64,
    pub cession: f64,
    pub attachment: f64,
    pub limit: f64,
}

impl Bid {
    /// Hard-bounds check at the environment boundary. A failure here is an
    /// upstream invariant breach (the policy decodes in-bounds bids), so the
    /// env raises rather than clamps.
    pub fn check(&self, agent: AgentId, config: &EnvConfig) -> Result<(), EnvError> {
        let fields = [
            ("price", self.price),
            ("cession", self.cession),
            ("attachment", self.attachment),
            ("limit", self.limit),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(EnvError::BidOutOfBounds { agent: agent.0, field, value });
            }
        }
        if self.price < config.price_floor || self.price > config.price_ceiling {
            return Err(EnvError::BidOutOfBounds {
                agent: agent.0,
                field: "price",
                value: self.price,
            });
        }
        if !(0.0..=1.0).contains(&self.cession) {
            return Err(EnvError::BidOutOfBounds {
                agent: agent.0,
                field: "cession",
                value: self.cession,
            });
        }
        if self.attachment < 0.0 || self.attachment > config.attachment_cap {
            return Err(EnvError::BidOutOfBounds {
                agent: agent.0,
                field: "attachment",
                value: self.attachment,
            });
        }
        if self.limit < self.attachment || self.limit > config.limit_cap {
            return Err(EnvError::BidOutOfBounds {
                agent: agent.0,
                field: "limit",
                value: self.limit,
            });
        }
        Ok(())
    }

    /// Layer width actually ceded, in limit-fraction units.
    pub fn ceded_width(&self) -> f64 {
        self.cession * (self.limit - self.attachment)
    }
}

/// Joint outcome of one bidding round.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub states: Vec<MarketState>,
    pub rewards: Vec<f64>,
    pub risk_costs: Vec<f64>,
    pub winner: Option<AgentId>,
    pub done: bool,
}

/// Multi-agent treaty bidding simulator. Deterministic given a seed: the RNG
/// is consumed in a fixed order (treaty draw, then loss draw) per round.
///
/// Simultaneity is resolved in two phases: the caller hands over the full
/// immutable batch of bids, then the joint transition is resolved atomically.
/// No per-agent ordering inside a step can affect the recorded transition.
pub struct TreatyEnv {
    config: EnvConfig,
    rng: ChaCha20Rng,
    step: u32,
    next_treaty_id: u64,
    current: Treaty,
    last_winning_price: f64,
    capacity: Vec<f64>,
    done: bool,
}

impl TreatyEnv {
    pub fn new(config: EnvConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
        let mut next_treaty_id = 0;
        let current = draw_treaty(&config, &mut rng, &mut next_treaty_id);
        let capacity = vec![config.initial_capacity; config.num_agents];
        let last_winning_price = config.price_floor;
        Ok(TreatyEnv {
            config,
            rng,
            step: 0,
            next_treaty_id,
            current,
            last_winning_price,
            capacity,
            done: false,
        })
    }

    pub fn num_agents(&self) -> usize {
        self.config.num_agents
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Begin a new episode from the given seed. Internal counters reset;
    /// identical seeds replay identical treaty and loss sequences.
    pub fn reset(&mut self, seed: u64) -> Vec<MarketState> {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
        self.step = 0;
        self.next_treaty_id = 0;
        self.done = false;
        self.last_winning_price = self.config.price_floor;
        self.capacity = vec![self.config.initial_capacity; self.config.num_agents];
        self.current = draw_treaty(&self.config, &mut self.rng, &mut self.next_treaty_id);
        self.states()
    }

    /// Resolve one bidding round from the immutable joint-bid batch.
    pub fn step(&mut self, bids: &[Bid]) -> Result<StepOutcome, EnvError> {
        if self.done {
            return Err(EnvError::EpisodeOver);
        }
        if bids.len() != self.config.num_agents {
            return Err(EnvError::BidCountMismatch {
                expected: self.config.num_agents,
                got: bids.len(),
            });
        }
        for (i, bid) in bids.iter().enumerate() {
            bid.check(AgentId(i as u64), &self.config)?;
        }

        // Phase 2: atomic joint resolution. Winner = cheapest rate on line
        // among bidders with capacity for their own layer; ties break on the
        // lower agent index so replays are exact.
        let winner = bids
            .iter()
            .enumerate()
            .filter(|(i, b)| b.ceded_width() > 0.0 && self.capacity[*i] >= b.ceded_width())
            .min_by(|(_, a), (_, b)| a.price.partial_cmp(&b.price).expect("finite prices"))
            .map(|(i, _)| i);

        let mut rewards = vec![0.0; bids.len()];
        let mut risk_costs = vec![0.0; bids.len()];

        // One realized coverage-period outcome per round, drawn whether or
        // not anyone won, so the RNG stream does not depend on bids.
        let gross = self
            .current
            .sample_gross_loss(&mut self.rng, self.config.severity_multiplier);

        if let Some(w) = winner {
            let bid = &bids[w];
            let exposure = self.current.exposure;
            let layer_low = bid.attachment * exposure;
            let layer_width = (bid.limit - bid.attachment) * exposure;
            let ceded_loss = bid.cession * (gross - layer_low).clamp(0.0, layer_width);
            let premium = bid.price * bid.cession * layer_width;

            let net = (premium - ceded_loss) / exposure;
            rewards[w] = net;
            risk_costs[w] = (-net - self.config.loss_threshold).max(0.0);

            self.capacity[w] -= bid.ceded_width();
            self.last_winning_price = bid.price;
        }

        self.step += 1;
        self.done = self.step >= self.config.max_steps;
        self.current = draw_treaty(&self.config, &mut self.rng, &mut self.next_treaty_id);

        Ok(StepOutcome {
            states: self.states(),
            rewards,
            risk_costs,
            winner: winner.map(|i| AgentId(i as u64)),
            done: self.done,
        })
    }

    fn states(&self) -> Vec<MarketState> {
        let t = &self.current;
        let q = t.loss_quantiles(&[0.5, 0.9, 0.99]);
        let exposure_z =
            (t.exposure.ln() - self.config.exposure_ln_mu) / self.config.exposure_ln_sigma;
        let expected_loss_fraction = t.expected_loss() / t.exposure;
        (0..self.config.num_agents)
            .map(|i| MarketState {
                treaty_id: t.id,
                peril: t.peril,
                exposure_z,
                expected_loss_fraction,
                loss_quantiles: [q[0], q[1], q[2]],
                event_frequency: t.spec.event_frequency,
                last_winning_price: self.last_winning_price,
                remaining_capacity: self.capacity[i] / self.config.initial_capacity,
                step_fraction: self.step as f64 / self.config.max_steps as f64,
            })
            .collect()
    }
}

fn draw_treaty(config: &EnvConfig, rng: &mut ChaCha20Rng, next_id: &mut u64) -> Treaty {
    let idx = rng.random_range(0..config.perils.len());
    let spec = config.perils[idx];
    let exposure_dist = LogNormal::new(config.exposure_ln_mu, config.exposure_ln_sigma)
        .expect("invalid exposure params");
    let exposure = exposure_dist.sample(rng);
    let id = TreatyId(*next_id);
    *next_id += 1;
    Treaty { id, peril: spec.peril, exposure, spec }
}
