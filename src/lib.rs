//! Risk-constrained treaty bidding.
//!
//! A multi-agent reinsurance treaty market ([`env`]) trained with
//! dual-projected PPO ([`trainer`]): the primal step improves a shared
//! Gaussian bidding policy ([`policy`]) under a clipped surrogate, and the
//! dual step moves a Lagrange multiplier against the empirical CVaR of
//! realized tail losses ([`cvar`]) to hold a configured risk budget.
//!
//! Everything is deterministic given a seed: one ChaCha20 stream per
//! episode in the simulator, one per iteration in the trainer, and
//! checkpoints ([`checkpoint`]) that resume the exact trajectory.

pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod critic;
pub mod cvar;
pub mod env;
pub mod error;
pub mod grounding;
pub mod metrics;
pub mod net;
pub mod optim;
pub mod policy;
pub mod trainer;
pub mod treaty;
pub mod types;
