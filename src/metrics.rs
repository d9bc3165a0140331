use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Per-iteration training metrics, emitted append-only to the observability
/// collaborator. No acknowledgement is expected and emission failures never
/// affect training correctness.
#[derive(Debug, Clone, Serialize)]
pub struct IterationMetrics {
    pub iteration: u64,
    pub mean_reward: f64,
    /// Realized CVaR of the iteration's risk costs at the configured α.
    pub cvar: f64,
    pub lambda: f64,
    /// Fraction of minibatch samples whose probability ratio hit the clip.
    pub clip_fraction: f64,
    pub policy_loss: f64,
    pub value_loss: f64,
    pub risk_loss: f64,
    /// Fraction of rounds the trained agent's bid was accepted.
    pub acceptance_rate: f64,
    pub mean_std: f64,
    pub learning_rate: f64,
}

pub trait MetricsSink {
    fn emit(&mut self, metrics: &IterationMetrics) -> std::io::Result<()>;
}

/// Discards everything; for tests and library embedding.
pub struct NullSink;

impl MetricsSink for NullSink {
    fn emit(&mut self, _metrics: &IterationMetrics) -> std::io::Result<()> {
        Ok(())
    }
}

/// One JSON object per line, flushed per iteration so a killed run leaves a
/// readable prefix.
pub struct NdjsonSink {
    writer: BufWriter<File>,
}

impl NdjsonSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(NdjsonSink { writer: BufWriter::new(File::create(path)?) })
    }
}

impl MetricsSink for NdjsonSink {
    fn emit(&mut self, metrics: &IterationMetrics) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, metrics)?;
        writeln!(self.writer)?;
        self.writer.flush()
    }
}

/// Retains everything in memory; used by the multi-run sweep and tests.
#[derive(Default)]
pub struct VecSink {
    pub history: Vec<IterationMetrics>,
}

impl MetricsSink for VecSink {
    fn emit(&mut self, metrics: &IterationMetrics) -> std::io::Result<()> {
        self.history.push(metrics.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(iteration: u64) -> IterationMetrics {
        IterationMetrics {
            iteration,
            mean_reward: 0.02,
            cvar: 0.07,
            lambda: 0.3,
            clip_fraction: 0.11,
            policy_loss: -0.01,
            value_loss: 0.5,
            risk_loss: 0.2,
            acceptance_rate: 0.4,
            mean_std: 0.55,
            learning_rate: 3e-4,
        }
    }

    #[test]
    fn ndjson_sink_writes_one_line_per_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.ndjson");
        {
            let mut sink = NdjsonSink::create(&path).unwrap();
            sink.emit(&sample(0)).unwrap();
            sink.emit(&sample(1)).unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for (i, line) in lines.iter().enumerate() {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["iteration"], i as u64);
            assert!(v.get("cvar").is_some());
            assert!(v.get("lambda").is_some());
        }
    }

    #[test]
    fn vec_sink_retains_order() {
        let mut sink = VecSink::default();
        for i in 0..5 {
            sink.emit(&sample(i)).unwrap();
        }
        let iters: Vec<u64> = sink.history.iter().map(|m| m.iteration).collect();
        assert_eq!(iters, vec![0, 1, 2, 3, 4]);
    }
}
