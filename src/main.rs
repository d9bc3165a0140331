use std::path::PathBuf;

use rebid::config::{EnvConfig, TrainConfig};
use rebid::env::TreatyEnv;
use rebid::metrics::{IterationMetrics, MetricsSink, NdjsonSink, VecSink};
use rebid::trainer::{DualPpoTrainer, TrainSummary};

/// Streams every iteration to disk and keeps a copy for the end-of-run table.
struct TeeSink {
    file: NdjsonSink,
    history: VecSink,
}

impl MetricsSink for TeeSink {
    fn emit(&mut self, metrics: &IterationMetrics) -> std::io::Result<()> {
        self.history.emit(metrics)?;
        self.file.emit(metrics)
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let mut seed_override: Option<u64> = None;
    let mut iters_override: Option<u64> = None;
    let mut output_path = "metrics.ndjson".to_string();
    let mut checkpoint_path: Option<String> = None;
    let mut severity: Option<f64> = None;
    let mut eval_episodes: u64 = 0;
    let mut runs: Option<u64> = None;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                seed_override = Some(args[i].parse().expect("--seed requires a u64"));
            }
            "--iters" => {
                i += 1;
                iters_override = Some(args[i].parse().expect("--iters requires a u64"));
            }
            "--output" => {
                i += 1;
                output_path = args[i].clone();
            }
            "--checkpoint" => {
                i += 1;
                checkpoint_path = Some(args[i].clone());
            }
            "--severity" => {
                i += 1;
                severity = Some(args[i].parse().expect("--severity requires a float"));
            }
            "--eval" => {
                i += 1;
                eval_episodes = args[i].parse().expect("--eval requires an episode count");
            }
            "--runs" => {
                i += 1;
                runs = Some(args[i].parse().expect("--runs requires a positive integer"));
            }
            "--quiet" => quiet = true,
            _ => {}
        }
        i += 1;
    }

    let mut env_config = EnvConfig::canonical();
    let mut train_config = TrainConfig::canonical();
    if let Some(s) = severity {
        env_config.severity_multiplier = s;
    }
    if let Some(n) = iters_override {
        train_config.iterations = n;
    }
    let start_seed = seed_override.unwrap_or(train_config.seed);

    if let Some(n) = runs {
        use rayon::prelude::*;

        let summaries: Vec<(u64, TrainSummary)> = (0u64..n)
            .into_par_iter()
            .map(|k| {
                let seed = start_seed + k;
                let mut env_config = env_config.clone();
                let mut train_config = train_config.clone();
                env_config.seed = seed;
                train_config.seed = seed;
                let env = TreatyEnv::new(env_config).expect("env config");
                let mut trainer =
                    DualPpoTrainer::new(env, train_config).expect("train config");
                let summary = trainer.run(&mut VecSink::default()).expect("training run");
                (seed, summary)
            })
            .collect();

        if !quiet {
            print_sweep(&summaries);
        }
    } else {
        env_config.seed = start_seed;
        train_config.seed = start_seed;
        let env = TreatyEnv::new(env_config).expect("env config");
        let mut trainer = DualPpoTrainer::new(env, train_config).expect("train config");
        if let Some(path) = checkpoint_path {
            trainer = trainer.with_checkpoint_path(PathBuf::from(path));
        }

        let file =
            NdjsonSink::create(output_path.as_ref()).expect("failed to create output file");
        let mut sink = TeeSink { file, history: VecSink::default() };

        let summary = trainer.run(&mut sink).expect("training run");

        if !quiet {
            print_run(&sink.history.history, &summary);
            println!("\nMetrics written to {output_path}");
        }

        if eval_episodes > 0 {
            let report = trainer
                .evaluate(eval_episodes, start_seed.wrapping_add(0x5EED))
                .expect("evaluation");
            if !quiet {
                println!("\n=== Deterministic evaluation ({eval_episodes} episodes) ===");
                println!("  Mean reward:     {:>9.5}", report.mean_reward);
                println!("  Realized CVaR:   {:>9.5}", report.cvar);
                println!("  Acceptance rate: {:>8.1}%", report.acceptance_rate * 100.0);
            }
        }
    }
}

fn print_run(history: &[IterationMetrics], summary: &TrainSummary) {
    println!("\n=== Training trajectory ===");
    println!(
        "{:>4} | {:>9} | {:>8} | {:>7} | {:>6} | {:>7} | {:>6} | {:>9}",
        "Iter", "Reward", "CVaR", "Lambda", "Clip%", "Accept%", "Std", "LR"
    );
    println!("{}", "-".repeat(72));
    for m in history {
        println!(
            "{:>4} | {:>9.5} | {:>8.5} | {:>7.3} | {:>5.1}% | {:>6.1}% | {:>6.3} | {:>9.2e}",
            m.iteration,
            m.mean_reward,
            m.cvar,
            m.lambda,
            m.clip_fraction * 100.0,
            m.acceptance_rate * 100.0,
            m.mean_std,
            m.learning_rate,
        );
    }
    println!(
        "\n{} after {} iterations: reward {:.5}, CVaR {:.5}, lambda {:.3}",
        if summary.early_stopped { "Converged" } else { "Finished" },
        summary.iterations_run,
        summary.final_mean_reward,
        summary.final_cvar,
        summary.final_lambda,
    );
}

fn print_sweep(summaries: &[(u64, TrainSummary)]) {
    println!("\n=== Multi-seed sweep (N={}) ===", summaries.len());
    println!(
        "{:>6} | {:>5} | {:>9} | {:>8} | {:>7} | {:>5}",
        "Seed", "Iters", "Reward", "CVaR", "Lambda", "Early"
    );
    println!("{}", "-".repeat(54));
    for (seed, s) in summaries {
        println!(
            "{:>6} | {:>5} | {:>9.5} | {:>8.5} | {:>7.3} | {:>5}",
            seed,
            s.iterations_run,
            s.final_mean_reward,
            s.final_cvar,
            s.final_lambda,
            if s.early_stopped { "yes" } else { "no" },
        );
    }
    let n = summaries.len() as f64;
    let mean_reward: f64 = summaries.iter().map(|(_, s)| s.final_mean_reward).sum::<f64>() / n;
    let mean_cvar: f64 = summaries.iter().map(|(_, s)| s.final_cvar).sum::<f64>() / n;
    let satisfied = summaries.iter().filter(|(_, s)| s.final_lambda == 0.0).count();
    println!(
        "\nMean final reward {mean_reward:.5}, mean final CVaR {mean_cvar:.5}, {satisfied}/{} runs ended with a slack constraint",
        summaries.len()
    );
}
