use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use rebid::config::{EnvConfig, TrainConfig};
use rebid::critic::Critic;
use rebid::cvar::cvar_at_alpha;
use rebid::env::{Bid, TreatyEnv};
use rebid::metrics::NullSink;
use rebid::policy::{ActMode, GaussianPolicy};
use rebid::trainer::DualPpoTrainer;

fn bench_env() -> TreatyEnv {
    TreatyEnv::new(EnvConfig::canonical()).expect("canonical env config")
}

fn bench_train_config(horizon: usize) -> TrainConfig {
    TrainConfig {
        rollout_horizon: horizon,
        iterations: 1,
        hidden: vec![32, 32],
        minibatch_size: 64,
        epochs: 2,
        ..TrainConfig::canonical()
    }
}

// ── Group 1: env_step — joint-bid round throughput ──────────────────────────

fn bench_env_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("env_step");
    for &rounds in &[100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(rounds as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rounds), &rounds, |b, &n| {
            b.iter_batched(
                || {
                    let mut env = bench_env();
                    env.reset(42);
                    let bid = Bid { price: 0.05, cession: 0.5, attachment: 0.1, limit: 0.6 };
                    (env, vec![bid; 3])
                },
                |(mut env, bids)| {
                    for _ in 0..n {
                        let out = env.step(&bids).expect("in-bounds bids");
                        if out.done {
                            env.reset(43);
                        }
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 2: policy_act — sample-and-decode per state ───────────────────────

fn bench_policy_act(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy_act");
    for &hidden in &[16usize, 64, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(hidden), &hidden, |b, &h| {
            let mut rng = ChaCha20Rng::seed_from_u64(42);
            let policy = GaussianPolicy::new(&[h, h], &mut rng);
            let mut env = bench_env();
            let state = env.reset(42).remove(0);
            b.iter(|| {
                let (action, _) = policy.act(&state, &mut rng, ActMode::Stochastic);
                std::hint::black_box(action)
            })
        });
    }
    group.finish();
}

// ── Group 3: critic_regression — one sample grad ────────────────────────────

fn bench_critic_regression(c: &mut Criterion) {
    let mut group = c.benchmark_group("critic_regression");
    for &hidden in &[16usize, 64, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(hidden), &hidden, |b, &h| {
            let mut rng = ChaCha20Rng::seed_from_u64(42);
            let critic = Critic::new(&[h, h], &mut rng);
            let mut env = bench_env();
            let features = env.reset(42).remove(0).features();
            b.iter(|| {
                let (loss, grad) = critic.regression_grad(&features, 0.25);
                std::hint::black_box((loss, grad))
            })
        });
    }
    group.finish();
}

// ── Group 4: iteration — full collect/estimate/update cycle ─────────────────

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration");
    group.sample_size(10);
    for &horizon in &[64usize, 256, 1_024] {
        group.throughput(Throughput::Elements(horizon as u64));
        group.bench_with_input(BenchmarkId::from_parameter(horizon), &horizon, |b, &h| {
            b.iter_batched(
                || {
                    DualPpoTrainer::new(bench_env(), bench_train_config(h))
                        .expect("canonical train config")
                },
                |mut trainer| trainer.run_iteration(&mut NullSink).expect("one iteration"),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 5: cvar — estimator scaling in sample count ───────────────────────

fn bench_cvar(c: &mut Criterion) {
    let mut group = c.benchmark_group("cvar");
    for &count in &[1_000usize, 10_000, 100_000, 1_000_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            let costs: Vec<f64> =
                (0..n).map(|i| ((i * 2_654_435_761) % 10_000) as f64 / 10_000.0).collect();
            b.iter(|| std::hint::black_box(cvar_at_alpha(&costs, 0.95)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_env_step,
    bench_policy_act,
    bench_critic_regression,
    bench_iteration,
    bench_cvar,
);
criterion_main!(benches);
