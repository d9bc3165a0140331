//! Dual-projected PPO over the treaty bidding market.
//!
//! Each iteration runs one collect → estimate → primal → dual cycle. The
//! primal step maximizes the clipped surrogate of reward minus λ times the
//! risk surrogate; the dual step is projected ascent on λ against the
//! empirical CVaR of the iteration's realized risk costs. λ never goes
//! negative, and a constraint that stays satisfied decays λ back to zero.

use std::path::PathBuf;

use log::{info, warn};
use rand::Rng;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::buffer::{RolloutBuffer, Trajectory, Transition};
use crate::checkpoint::Checkpoint;
use crate::config::TrainConfig;
use crate::critic::Critic;
use crate::cvar::cvar_at_alpha;
use crate::env::{Bid, MarketState, TreatyEnv};
use crate::error::{ConfigError, EnvError, TrainError};
use crate::metrics::{IterationMetrics, MetricsSink};
use crate::net::MlpGrad;
use crate::optim::{Adam, clip_global_norm};
use crate::policy::{ACTION_DIM, ActMode, GaussianPolicy, SquashedAction};
use crate::types::{AgentId, Iteration};

/// One projected dual-ascent step: λ ← max(0, λ + η(ĉ − budget)).
/// The projection is the only thing keeping λ in the feasible half-line,
/// so it lives in one place.
pub fn project_dual(lambda: f64, dual_lr: f64, cvar: f64, budget: f64) -> f64 {
    (lambda + dual_lr * (cvar - budget)).max(0.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    pub iterations_run: u64,
    pub early_stopped: bool,
    pub final_lambda: f64,
    pub final_cvar: f64,
    pub final_mean_reward: f64,
}

/// Deterministic-policy evaluation over fresh episodes.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub episodes: u64,
    pub mean_reward: f64,
    pub cvar: f64,
    pub acceptance_rate: f64,
}

/// Iteration-internal failure: `Unstable` rolls back and retries with a
/// halved learning rate, everything else escalates unchanged.
enum IterationError {
    Unstable(&'static str),
    Fatal(TrainError),
}

impl From<EnvError> for IterationError {
    fn from(e: EnvError) -> Self {
        IterationError::Fatal(TrainError::Env(e))
    }
}

struct CollectStats {
    mean_reward: f64,
    acceptance_rate: f64,
    /// Every recorded per-step risk cost, the CVaR estimator's sample.
    risk_costs: Vec<f64>,
}

/// Flat view of one iteration's drained trajectories, indexed per sample.
#[derive(Default)]
struct Batch {
    features: Vec<[f64; MarketState::DIM]>,
    actions: Vec<SquashedAction>,
    old_log_probs: Vec<f64>,
    adv_reward: Vec<f64>,
    adv_risk: Vec<f64>,
    ret_reward: Vec<f64>,
    ret_risk: Vec<f64>,
}

impl Batch {
    fn len(&self) -> usize {
        self.features.len()
    }
}

/// Per-sample policy gradient contribution, accumulated in sample order so
/// identical seeds reproduce bit-identical updates.
struct SampleGrad {
    net: MlpGrad,
    log_std: [f64; ACTION_DIM],
    loss: f64,
    clipped: bool,
}

pub struct DualPpoTrainer {
    env: TreatyEnv,
    config: TrainConfig,
    policy: GaussianPolicy,
    value_critic: Critic,
    risk_critic: Critic,
    policy_opt: Adam,
    value_opt: Adam,
    risk_opt: Adam,
    lambda: f64,
    learning_rate: f64,
    iteration: Iteration,
    buffer: RolloutBuffer,
    /// Rollback target: the state as of the last completed iteration.
    last_good: Checkpoint,
    checkpoint_path: Option<PathBuf>,
}

impl DualPpoTrainer {
    pub fn new(env: TreatyEnv, config: TrainConfig) -> Result<Self, TrainError> {
        config.validate()?;
        let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
        let policy = GaussianPolicy::new(&config.hidden, &mut rng);
        let value_critic = Critic::new(&config.hidden, &mut rng);
        let risk_critic = Critic::new(&config.hidden, &mut rng);
        let policy_opt = Adam::new(policy.n_params(), config.learning_rate);
        let value_opt = Adam::new(value_critic.n_params(), config.learning_rate);
        let risk_opt = Adam::new(risk_critic.n_params(), config.learning_rate);
        let buffer = RolloutBuffer::new(env.num_agents() * config.rollout_horizon);
        let last_good = Checkpoint {
            iteration: Iteration(0),
            lambda: config.lambda_init,
            learning_rate: config.learning_rate,
            policy: policy.clone(),
            value_critic: value_critic.clone(),
            risk_critic: risk_critic.clone(),
            policy_opt: policy_opt.clone(),
            value_opt: value_opt.clone(),
            risk_opt: risk_opt.clone(),
        };
        Ok(DualPpoTrainer {
            env,
            lambda: config.lambda_init,
            learning_rate: config.learning_rate,
            config,
            policy,
            value_critic,
            risk_critic,
            policy_opt,
            value_opt,
            risk_opt,
            iteration: Iteration(0),
            buffer,
            last_good,
            checkpoint_path: None,
        })
    }

    /// Continue training from a saved checkpoint. The optimizer moments, λ,
    /// the (possibly divergence-reduced) learning rate and the iteration
    /// counter all resume, so the λ trajectory matches an uninterrupted run.
    pub fn resume(
        env: TreatyEnv,
        config: TrainConfig,
        checkpoint: Checkpoint,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let buffer = RolloutBuffer::new(env.num_agents() * config.rollout_horizon);
        Ok(DualPpoTrainer {
            env,
            lambda: checkpoint.lambda,
            learning_rate: checkpoint.learning_rate,
            iteration: checkpoint.iteration,
            policy: checkpoint.policy.clone(),
            value_critic: checkpoint.value_critic.clone(),
            risk_critic: checkpoint.risk_critic.clone(),
            policy_opt: checkpoint.policy_opt.clone(),
            value_opt: checkpoint.value_opt.clone(),
            risk_opt: checkpoint.risk_opt.clone(),
            config,
            buffer,
            last_good: checkpoint,
            checkpoint_path: None,
        })
    }

    pub fn with_checkpoint_path(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn iteration(&self) -> Iteration {
        self.iteration
    }

    pub fn policy(&self) -> &GaussianPolicy {
        &self.policy
    }

    /// Run up to `config.iterations` cycles, stopping early once the
    /// constraint holds and the reward has plateaued for
    /// `early_stop_patience` consecutive iterations.
    pub fn run(&mut self, sink: &mut dyn MetricsSink) -> Result<TrainSummary, TrainError> {
        let mut stall = 0u32;
        let mut prev_reward: Option<f64> = None;
        let mut last: Option<IterationMetrics> = None;
        let mut early_stopped = false;
        for _ in 0..self.config.iterations {
            let m = self.run_iteration(sink)?;
            let improved = match prev_reward {
                Some(p) => m.mean_reward - p >= self.config.early_stop_tol,
                None => true,
            };
            if m.cvar <= self.config.cvar_budget && !improved {
                stall += 1;
            } else {
                stall = 0;
            }
            prev_reward = Some(m.mean_reward);
            last = Some(m);
            if stall >= self.config.early_stop_patience {
                info!(
                    "early stop at iteration {}: constraint held and reward plateaued",
                    self.iteration.0
                );
                early_stopped = true;
                break;
            }
        }
        let last = last.expect("iterations >= 1 is validated");
        Ok(TrainSummary {
            iterations_run: self.iteration.0,
            early_stopped,
            final_lambda: self.lambda,
            final_cvar: last.cvar,
            final_mean_reward: last.mean_reward,
        })
    }

    /// One cycle, with divergence rollback: a non-finite quantity restores
    /// the last completed iteration, halves the learning rate and retries,
    /// up to `retry_limit` times before escalating to fatal.
    pub fn run_iteration(
        &mut self,
        sink: &mut dyn MetricsSink,
    ) -> Result<IterationMetrics, TrainError> {
        let mut retries = 0u32;
        loop {
            match self.try_iteration() {
                Ok(metrics) => {
                    self.iteration = self.iteration.next();
                    self.last_good = self.snapshot();
                    if let Some(path) = &self.checkpoint_path {
                        self.last_good.save(path)?;
                    }
                    if let Err(e) = sink.emit(&metrics) {
                        warn!("metrics emission failed, training continues: {e}");
                    }
                    return Ok(metrics);
                }
                Err(IterationError::Fatal(e)) => return Err(e),
                Err(IterationError::Unstable(quantity)) => {
                    if retries >= self.config.retry_limit {
                        return Err(TrainError::Diverged {
                            quantity,
                            iteration: self.iteration.0,
                            retries,
                        });
                    }
                    retries += 1;
                    let halved = self.learning_rate / 2.0;
                    warn!(
                        "non-finite {quantity} at iteration {}: rolling back, lr {} -> {halved} (retry {retries}/{})",
                        self.iteration.0, self.learning_rate, self.config.retry_limit
                    );
                    let checkpoint = self.last_good.clone();
                    self.restore(&checkpoint);
                    self.learning_rate = halved;
                }
            }
        }
    }

    /// Evaluate the current policy deterministically (distribution mode,
    /// no exploration noise) over fresh episodes.
    pub fn evaluate(&mut self, episodes: u64, seed: u64) -> Result<EvalReport, TrainError> {
        if episodes == 0 {
            return Err(ConfigError::ZeroCount { name: "episodes", value: 0 }.into());
        }
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut reward_sum = 0.0;
        let mut risk_costs = Vec::new();
        let mut rounds = 0u64;
        let mut wins = 0u64;
        let n = self.env.num_agents();
        for e in 0..episodes {
            let mut states = self.env.reset(seed.wrapping_add(e));
            loop {
                let bids: Vec<Bid> = states
                    .iter()
                    .map(|s| {
                        let (action, _) =
                            self.policy.act(s, &mut rng, ActMode::Deterministic);
                        action.decode(self.env.config())
                    })
                    .collect();
                let out = self.env.step(&bids)?;
                reward_sum += out.rewards.iter().sum::<f64>();
                risk_costs.extend(out.risk_costs.iter().copied());
                rounds += 1;
                if out.winner.is_some() {
                    wins += 1;
                }
                if out.done {
                    break;
                }
                states = out.states;
            }
        }
        Ok(EvalReport {
            episodes,
            mean_reward: reward_sum / (rounds * n as u64) as f64,
            cvar: cvar_at_alpha(&risk_costs, self.config.cvar_alpha),
            acceptance_rate: wins as f64 / rounds as f64,
        })
    }

    // ── Iteration internals ─────────────────────────────────────────────────

    fn snapshot(&self) -> Checkpoint {
        Checkpoint {
            iteration: self.iteration,
            lambda: self.lambda,
            learning_rate: self.learning_rate,
            policy: self.policy.clone(),
            value_critic: self.value_critic.clone(),
            risk_critic: self.risk_critic.clone(),
            policy_opt: self.policy_opt.clone(),
            value_opt: self.value_opt.clone(),
            risk_opt: self.risk_opt.clone(),
        }
    }

    fn restore(&mut self, checkpoint: &Checkpoint) {
        self.iteration = checkpoint.iteration;
        self.lambda = checkpoint.lambda;
        self.learning_rate = checkpoint.learning_rate;
        self.policy = checkpoint.policy.clone();
        self.value_critic = checkpoint.value_critic.clone();
        self.risk_critic = checkpoint.risk_critic.clone();
        self.policy_opt = checkpoint.policy_opt.clone();
        self.value_opt = checkpoint.value_opt.clone();
        self.risk_opt = checkpoint.risk_opt.clone();
    }

    /// Collection, sampling and minibatch shuffling all draw from one stream
    /// seeded by (run seed, iteration), so a retry after rollback replays the
    /// same rollout and a resumed run continues the same trajectory.
    fn iteration_seed(&self) -> u64 {
        self.config.seed ^ self.iteration.0.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    fn try_iteration(&mut self) -> Result<IterationMetrics, IterationError> {
        let mut rng = ChaCha20Rng::seed_from_u64(self.iteration_seed());
        self.policy_opt.lr = self.learning_rate;
        self.value_opt.lr = self.learning_rate;
        self.risk_opt.lr = self.learning_rate;

        let stats = self.collect(&mut rng)?;
        let trajectories = self.buffer.drain();
        let batch = self.assemble_batch(trajectories);

        let cvar = cvar_at_alpha(&stats.risk_costs, self.config.cvar_alpha);
        if !cvar.is_finite() {
            return Err(IterationError::Unstable("cvar estimate"));
        }

        // Combined advantage for the primal objective, normalized per stream
        // first so λ weighs risk against reward on a comparable scale.
        let lambda = self.lambda;
        let combined: Vec<f64> = batch
            .adv_reward
            .iter()
            .zip(&batch.adv_risk)
            .map(|(r, c)| (r - lambda * c) / (1.0 + lambda))
            .collect();
        ensure_finite(&combined, "advantage")?;

        let update = self.update_networks(&batch, &combined, &mut rng)?;

        self.lambda = project_dual(self.lambda, self.config.dual_lr, cvar, self.config.cvar_budget);

        let metrics = IterationMetrics {
            iteration: self.iteration.0,
            mean_reward: stats.mean_reward,
            cvar,
            lambda: self.lambda,
            clip_fraction: update.clip_fraction,
            policy_loss: update.policy_loss,
            value_loss: update.value_loss,
            risk_loss: update.risk_loss,
            acceptance_rate: stats.acceptance_rate,
            mean_std: self.policy.mean_std(),
            learning_rate: self.learning_rate,
        };
        info!(
            "iter {} reward {:.4} cvar {:.4} lambda {:.3} clip {:.2}",
            metrics.iteration, metrics.mean_reward, metrics.cvar, metrics.lambda,
            metrics.clip_fraction
        );
        Ok(metrics)
    }

    /// Roll the shared policy for `rollout_horizon` rounds per agent. The
    /// forward passes of the agents fan out in parallel; sampling then runs
    /// on the single stream in agent order so replays are exact.
    fn collect(&mut self, rng: &mut ChaCha20Rng) -> Result<CollectStats, EnvError> {
        let horizon = self.config.rollout_horizon;
        let n = self.env.num_agents();
        let mut trajectories: Vec<Trajectory> = (0..n)
            .map(|i| Trajectory {
                agent: AgentId(i as u64),
                transitions: Vec::with_capacity(horizon),
                bootstrap_value: 0.0,
                bootstrap_risk: 0.0,
            })
            .collect();

        let mut states = self.env.reset(rng.random());
        let mut reward_sum = 0.0;
        let mut rounds = 0u64;
        let mut wins = 0u64;
        let mut risk_costs = Vec::with_capacity(n * horizon);

        for _ in 0..horizon {
            let policy = &self.policy;
            let value_critic = &self.value_critic;
            let risk_critic = &self.risk_critic;
            let evals: Vec<(Vec<f64>, f64, f64)> = states
                .par_iter()
                .map(|s| {
                    let f = s.features();
                    (
                        policy.forward(&f).output,
                        value_critic.predict(&f),
                        risk_critic.predict(&f),
                    )
                })
                .collect();

            let mut bids = Vec::with_capacity(n);
            let mut sampled = Vec::with_capacity(n);
            for (means, _, _) in &evals {
                let (action, log_prob) =
                    self.policy.act_from_means(means, rng, ActMode::Stochastic);
                bids.push(action.decode(self.env.config()));
                sampled.push((action, log_prob));
            }

            let outcome = self.env.step(&bids)?;

            for i in 0..n {
                let (action, log_prob) = sampled[i];
                trajectories[i].transitions.push(Transition {
                    state: states[i].clone(),
                    action,
                    reward: outcome.rewards[i],
                    risk_cost: outcome.risk_costs[i],
                    done: outcome.done,
                    log_prob,
                    value: evals[i].1,
                    risk_value: evals[i].2,
                });
            }
            reward_sum += outcome.rewards.iter().sum::<f64>();
            risk_costs.extend(outcome.risk_costs.iter().copied());
            rounds += 1;
            if outcome.winner.is_some() {
                wins += 1;
            }
            states = if outcome.done { self.env.reset(rng.random()) } else { outcome.states };
        }

        // Critic bootstraps for the truncated tail of the final episode.
        for (i, trajectory) in trajectories.iter_mut().enumerate() {
            let f = states[i].features();
            trajectory.bootstrap_value = self.value_critic.predict(&f);
            trajectory.bootstrap_risk = self.risk_critic.predict(&f);
        }
        for trajectory in trajectories {
            self.buffer.push(trajectory);
        }

        Ok(CollectStats {
            mean_reward: reward_sum / (rounds * n as u64) as f64,
            acceptance_rate: wins as f64 / rounds as f64,
            risk_costs,
        })
    }

    /// GAE over both streams, flattened into one indexed batch with each
    /// advantage stream normalized independently.
    fn assemble_batch(&self, trajectories: Vec<Trajectory>) -> Batch {
        let mut batch = Batch::default();
        for trajectory in &trajectories {
            let ts = &trajectory.transitions;
            let rewards: Vec<f64> = ts.iter().map(|t| t.reward).collect();
            let costs: Vec<f64> = ts.iter().map(|t| t.risk_cost).collect();
            let values: Vec<f64> = ts.iter().map(|t| t.value).collect();
            let risk_values: Vec<f64> = ts.iter().map(|t| t.risk_value).collect();
            let dones: Vec<bool> = ts.iter().map(|t| t.done).collect();

            let (adv_r, ret_r) = gae(
                &rewards,
                &values,
                &dones,
                trajectory.bootstrap_value,
                self.config.gamma,
                self.config.trace_decay,
            );
            let (adv_c, ret_c) = gae(
                &costs,
                &risk_values,
                &dones,
                trajectory.bootstrap_risk,
                self.config.gamma,
                self.config.trace_decay,
            );

            for (t, transition) in ts.iter().enumerate() {
                batch.features.push(transition.state.features());
                batch.actions.push(transition.action);
                batch.old_log_probs.push(transition.log_prob);
                batch.adv_reward.push(adv_r[t]);
                batch.adv_risk.push(adv_c[t]);
                batch.ret_reward.push(ret_r[t]);
                batch.ret_risk.push(ret_c[t]);
            }
        }
        normalize(&mut batch.adv_reward);
        normalize(&mut batch.adv_risk);
        batch
    }

    fn update_networks(
        &mut self,
        batch: &Batch,
        combined_adv: &[f64],
        rng: &mut ChaCha20Rng,
    ) -> Result<UpdateStats, IterationError> {
        let n = batch.len();
        let mut indices: Vec<usize> = (0..n).collect();
        let mut policy_loss_sum = 0.0;
        let mut value_loss_sum = 0.0;
        let mut risk_loss_sum = 0.0;
        let mut clipped = 0usize;
        let mut samples = 0usize;

        for _ in 0..self.config.epochs {
            indices.shuffle(rng);
            for mb in indices.chunks(self.config.minibatch_size) {
                let scale = 1.0 / mb.len() as f64;

                // Per-sample gradients fan out in parallel; accumulation
                // stays in sample order so the sum is reproducible.
                let policy = &self.policy;
                let clip_eps = self.config.clip_eps;
                let entropy_coeff = self.config.entropy_coeff;
                let grads: Vec<SampleGrad> = mb
                    .par_iter()
                    .map(|&i| {
                        let trace = policy.forward(&batch.features[i]);
                        let new_lp = policy.log_prob(&trace.output, &batch.actions[i]);
                        let ratio = (new_lp - batch.old_log_probs[i]).exp();
                        let adv = combined_adv[i];
                        let unclipped = ratio * adv;
                        let clamped = ratio.clamp(1.0 - clip_eps, 1.0 + clip_eps) * adv;
                        let active = unclipped <= clamped;

                        let mut d_means = [0.0; ACTION_DIM];
                        let mut d_log_std = [0.0; ACTION_DIM];
                        if active {
                            let dm = policy.d_log_prob_d_means(&trace.output, &batch.actions[i]);
                            let dls =
                                policy.d_log_prob_d_log_std(&trace.output, &batch.actions[i]);
                            for k in 0..ACTION_DIM {
                                d_means[k] = -adv * ratio * dm[k];
                                d_log_std[k] = -adv * ratio * dls[k];
                            }
                        }
                        // Entropy bonus acts on the exploration scale only.
                        for d in d_log_std.iter_mut() {
                            *d -= entropy_coeff;
                        }
                        SampleGrad {
                            net: policy.net().backward(&trace, &d_means),
                            log_std: d_log_std,
                            loss: -unclipped.min(clamped),
                            clipped: (ratio - 1.0).abs() > clip_eps,
                        }
                    })
                    .collect();

                let mut net_grad = self.policy.net().zero_grad();
                let mut log_std_grad = [0.0; ACTION_DIM];
                for g in &grads {
                    net_grad.add(&g.net);
                    for k in 0..ACTION_DIM {
                        log_std_grad[k] += g.log_std[k];
                    }
                    policy_loss_sum += g.loss;
                    if g.clipped {
                        clipped += 1;
                    }
                    samples += 1;
                }

                let mut flat = net_grad.flatten();
                flat.extend_from_slice(&log_std_grad);
                for g in flat.iter_mut() {
                    *g *= scale;
                }
                ensure_finite(&flat, "policy gradient")?;
                clip_global_norm(&mut flat, self.config.max_grad_norm);
                let updates = self.policy_opt.step(&flat);
                self.policy.apply_updates(&updates);

                value_loss_sum += self.regress_critic(CriticKind::Value, mb, batch)?;
                risk_loss_sum += self.regress_critic(CriticKind::Risk, mb, batch)?;
            }
        }

        if !(policy_loss_sum.is_finite() && value_loss_sum.is_finite() && risk_loss_sum.is_finite())
        {
            return Err(IterationError::Unstable("loss"));
        }
        let batches = (self.config.epochs * n.div_ceil(self.config.minibatch_size)) as f64;
        Ok(UpdateStats {
            policy_loss: policy_loss_sum / samples as f64,
            value_loss: value_loss_sum / batches,
            risk_loss: risk_loss_sum / batches,
            clip_fraction: clipped as f64 / samples as f64,
        })
    }

    /// One minibatch regression step for the chosen critic; returns its mean
    /// squared error over the minibatch.
    fn regress_critic(
        &mut self,
        kind: CriticKind,
        mb: &[usize],
        batch: &Batch,
    ) -> Result<f64, IterationError> {
        let (critic, targets, quantity) = match kind {
            CriticKind::Value => (&self.value_critic, &batch.ret_reward, "value gradient"),
            CriticKind::Risk => (&self.risk_critic, &batch.ret_risk, "risk gradient"),
        };
        let mut grad = critic.zero_grad();
        let mut loss_sum = 0.0;
        for &i in mb {
            let (loss, g) = critic.regression_grad(&batch.features[i], targets[i]);
            loss_sum += loss;
            grad.add(&g);
        }
        let scale = self.config.value_coeff / mb.len() as f64;
        let mut flat = grad.flatten();
        for g in flat.iter_mut() {
            *g *= scale;
        }
        ensure_finite(&flat, quantity)?;
        clip_global_norm(&mut flat, self.config.max_grad_norm);
        match kind {
            CriticKind::Value => {
                let updates = self.value_opt.step(&flat);
                self.value_critic.apply_updates(&updates);
            }
            CriticKind::Risk => {
                let updates = self.risk_opt.step(&flat);
                self.risk_critic.apply_updates(&updates);
            }
        }
        Ok(loss_sum / mb.len() as f64)
    }
}

#[derive(Clone, Copy)]
enum CriticKind {
    Value,
    Risk,
}

struct UpdateStats {
    policy_loss: f64,
    value_loss: f64,
    risk_loss: f64,
    clip_fraction: f64,
}

/// Generalized advantage estimation over one trajectory. `dones[t]` means
/// the episode ended at step t, cutting both the bootstrap and the trace;
/// the final step bootstraps from `bootstrap` when truncated mid-episode.
fn gae(
    rewards: &[f64],
    values: &[f64],
    dones: &[bool],
    bootstrap: f64,
    gamma: f64,
    trace_decay: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = rewards.len();
    let mut advantages = vec![0.0; n];
    let mut acc = 0.0;
    for t in (0..n).rev() {
        let (next_value, nonterminal) = if dones[t] {
            (0.0, 0.0)
        } else if t + 1 == n {
            (bootstrap, 1.0)
        } else {
            (values[t + 1], 1.0)
        };
        let delta = rewards[t] + gamma * next_value - values[t];
        acc = delta + gamma * trace_decay * nonterminal * acc;
        advantages[t] = acc;
    }
    let returns = advantages.iter().zip(values).map(|(a, v)| a + v).collect();
    (advantages, returns)
}

fn normalize(xs: &mut [f64]) {
    if xs.is_empty() {
        return;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt().max(1e-8);
    for x in xs.iter_mut() {
        *x = (*x - mean) / std;
    }
}

fn ensure_finite(xs: &[f64], quantity: &'static str) -> Result<(), IterationError> {
    if xs.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(IterationError::Unstable(quantity))
    }
}
