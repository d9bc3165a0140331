use rand::Rng;
use rand_distr::{Distribution, LogNormal, Pareto, Poisson};
use serde::Serialize;

use crate::cvar::normal_quantile;
use crate::types::TreatyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Peril {
    WindstormAtlantic,
    EarthquakeUS,
    Flood,
    Attritional,
}

/// Ground-up damage as a fraction of the treaty's subject exposure.
/// Pareto fractions are capped at 1.0 (total loss of the subject portfolio).
#[derive(Debug, Clone, Copy)]
pub enum DamageModel {
    /// `scale` = minimum fraction, `shape` = tail index α.
    Pareto { scale: f64, shape: f64 },
    /// Log-normal fraction; ln-space params. E[X] = exp(mu + sigma²/2).
    LogNormal { mu: f64, sigma: f64 },
}

impl DamageModel {
    pub fn sample_fraction(&self, rng: &mut impl Rng) -> f64 {
        let raw = match self {
            DamageModel::Pareto { scale, shape } => {
                let dist = Pareto::new(*scale, *shape).expect("invalid Pareto params");
                dist.sample(rng)
            }
            DamageModel::LogNormal { mu, sigma } => {
                let dist = LogNormal::new(*mu, *sigma).expect("invalid LogNormal params");
                dist.sample(rng)
            }
        };
        raw.min(1.0)
    }

    /// Analytic p-quantile of the (uncapped) damage fraction, capped at 1.0.
    /// Feeds the historical-loss-quantile slots of the observation vector.
    pub fn quantile(&self, p: f64) -> f64 {
        let p = p.clamp(1e-9, 1.0 - 1e-9);
        let q = match self {
            DamageModel::Pareto { scale, shape } => scale * (1.0 - p).powf(-1.0 / shape),
            DamageModel::LogNormal { mu, sigma } => (mu + sigma * normal_quantile(p)).exp(),
        };
        q.min(1.0)
    }

    /// Analytic mean fraction (uncapped; adequate for pricing signals since
    /// calibrated means sit far below 1.0).
    pub fn mean_fraction(&self) -> f64 {
        match self {
            DamageModel::Pareto { scale, shape } => {
                if *shape > 1.0 {
                    scale * shape / (shape - 1.0)
                } else {
                    // Infinite-mean regime; report the median instead.
                    self.quantile(0.5)
                }
            }
            DamageModel::LogNormal { mu, sigma } => (mu + sigma * sigma / 2.0).exp(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerilSpec {
    pub peril: Peril,
    /// Poisson λ: expected loss events per coverage period.
    pub event_frequency: f64,
    pub damage: DamageModel,
}

/// Default per-peril calibration. Values are order-of-magnitude placeholders
/// pending empirical calibration.
pub fn default_peril_specs() -> Vec<PerilSpec> {
    vec![
        PerilSpec {
            peril: Peril::WindstormAtlantic,
            event_frequency: 0.5,
            damage: DamageModel::Pareto { scale: 0.05, shape: 1.5 },
        },
        PerilSpec {
            peril: Peril::EarthquakeUS,
            event_frequency: 0.2,
            damage: DamageModel::Pareto { scale: 0.08, shape: 1.3 },
        },
        PerilSpec {
            peril: Peril::Flood,
            event_frequency: 1.2,
            damage: DamageModel::Pareto { scale: 0.02, shape: 2.0 },
        },
        PerilSpec {
            peril: Peril::Attritional,
            event_frequency: 6.0,
            damage: DamageModel::LogNormal { mu: -3.5, sigma: 1.0 },
        },
    ]
}

/// One treaty brought to market for a bidding round: a cedent's subject
/// exposure against a single peril, to be priced and layered by the bidders.
#[derive(Debug, Clone)]
pub struct Treaty {
    pub id: TreatyId,
    pub peril: Peril,
    /// Subject exposure in currency units (the base for all fractions).
    pub exposure: f64,
    pub spec: PerilSpec,
}

impl Treaty {
    /// Expected ground-up loss over the coverage period.
    pub fn expected_loss(&self) -> f64 {
        self.exposure * self.spec.event_frequency * self.spec.damage.mean_fraction()
    }

    /// Damage-fraction quantiles at the given levels, for observations.
    pub fn loss_quantiles(&self, ps: &[f64]) -> Vec<f64> {
        ps.iter().map(|&p| self.spec.damage.quantile(p)).collect()
    }

    /// Total ground-up loss realized over one coverage period: a Poisson
    /// count of events, each with an independent damage-fraction draw.
    pub fn sample_gross_loss(&self, rng: &mut impl Rng, severity_multiplier: f64) -> f64 {
        if self.spec.event_frequency <= 0.0 {
            return 0.0;
        }
        let poisson =
            Poisson::new(self.spec.event_frequency).expect("invalid Poisson lambda");
        let n = poisson.sample(rng) as u64;
        let mut total = 0.0;
        for _ in 0..n {
            let frac = (self.spec.damage.sample_fraction(rng) * severity_multiplier).min(1.0);
            total += self.exposure * frac;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    fn wind_treaty() -> Treaty {
        Treaty {
            id: TreatyId(1),
            peril: Peril::WindstormAtlantic,
            exposure: 1_000.0,
            spec: default_peril_specs()[0],
        }
    }

    /// LogNormal(mu=-3.5, sigma=1.0): E[X] = exp(-3.0) ≈ 0.0498.
    /// 10k samples must land within ±20% (capping barely binds here).
    #[test]
    fn lognormal_fraction_mean_in_expected_range() {
        let model = DamageModel::LogNormal { mu: -3.5, sigma: 1.0 };
        let mut rng = rng();
        let n = 10_000;
        let mean: f64 =
            (0..n).map(|_| model.sample_fraction(&mut rng)).sum::<f64>() / n as f64;
        let expected = (-3.0_f64).exp();
        assert!(
            mean >= expected * 0.80 && mean <= expected * 1.20,
            "mean {mean:.4} outside ±20% of {expected:.4}"
        );
    }

    #[test]
    fn damage_fraction_never_exceeds_one() {
        let model = DamageModel::Pareto { scale: 0.5, shape: 1.1 };
        let mut rng = rng();
        for _ in 0..10_000 {
            let f = model.sample_fraction(&mut rng);
            assert!((0.0..=1.0).contains(&f), "fraction {f} out of [0, 1]");
        }
    }

    #[test]
    fn pareto_tail_heavier_than_lognormal_at_p99() {
        let pareto = DamageModel::Pareto { scale: 0.01, shape: 1.5 };
        let lognorm = DamageModel::LogNormal { mu: (0.01_f64).ln(), sigma: 0.5 };
        assert!(pareto.quantile(0.999) > lognorm.quantile(0.999));
    }

    #[test]
    fn quantiles_are_monotone_in_p() {
        for spec in default_peril_specs() {
            let q = [spec.damage.quantile(0.5), spec.damage.quantile(0.9), spec.damage.quantile(0.99)];
            assert!(q[0] <= q[1] && q[1] <= q[2], "{:?}: {q:?}", spec.peril);
        }
    }

    #[test]
    fn pareto_quantile_matches_closed_form() {
        let model = DamageModel::Pareto { scale: 0.05, shape: 2.0 };
        // q(p) = scale * (1-p)^(-1/shape); q(0.75) = 0.05 * 4^(1/2) = 0.1.
        assert!((model.quantile(0.75) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn expected_loss_scales_with_exposure() {
        let mut small = wind_treaty();
        let mut large = wind_treaty();
        small.exposure = 100.0;
        large.exposure = 1_000.0;
        assert!((large.expected_loss() / small.expected_loss() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn gross_loss_is_deterministic_given_seed() {
        let treaty = wind_treaty();
        let draw = |seed: u64| {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            (0..20).map(|_| treaty.sample_gross_loss(&mut rng, 1.0)).collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
    }

    #[test]
    fn severity_multiplier_amplifies_mean_loss() {
        let treaty = Treaty {
            id: TreatyId(2),
            peril: Peril::Attritional,
            exposure: 1_000.0,
            spec: default_peril_specs()[3],
        };
        let mean_loss = |mult: f64| {
            let mut rng = rng();
            (0..5_000).map(|_| treaty.sample_gross_loss(&mut rng, mult)).sum::<f64>() / 5_000.0
        };
        assert!(mean_loss(2.0) > mean_loss(1.0) * 1.5);
    }
}
