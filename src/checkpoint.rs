use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::critic::Critic;
use crate::error::TrainError;
use crate::optim::Adam;
use crate::policy::GaussianPolicy;
use crate::types::Iteration;

/// Everything needed to resume (or roll back) training exactly: parameters,
/// the dual variable, the iteration counter, optimizer moments, and the
/// current (possibly divergence-reduced) learning rate. Resuming from a
/// checkpoint under the same seed reproduces the same λ trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub iteration: Iteration,
    pub lambda: f64,
    pub learning_rate: f64,
    pub policy: GaussianPolicy,
    pub value_critic: Critic,
    pub risk_critic: Critic,
    pub policy_opt: Adam,
    pub value_opt: Adam,
    pub risk_opt: Adam,
}

impl Checkpoint {
    /// Write as JSON through a scoped handle; the writer is flushed before
    /// the handle drops so a checkpoint on disk is never truncated by a
    /// later abort.
    pub fn save(&self, path: &Path) -> Result<(), TrainError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
