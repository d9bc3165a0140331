//! Empirical tail-risk estimators over realized per-step risk costs.
//!
//! Costs are oriented so that higher = worse. VaR_alpha is the empirical
//! alpha-quantile of the cost sample (linear interpolation); CVaR_alpha is
//! the mean of all costs at or above it. The interpolated-quantile choice is
//! deliberate and is validated by the dual-pressure tests in `trainer.rs`,
//! not by parity with any external run.

/// Quantile of a sorted slice via linear interpolation. `p` in [0, 1].
/// Returns NaN for an empty slice.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let p = p.clamp(0.0, 1.0);
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let idx = p * (n - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = idx - lo as f64;
    sorted[lo] * (1.0 - w) + sorted[hi] * w
}

/// Value at Risk of a cost sample: the empirical alpha-quantile.
/// Non-finite inputs are dropped before sorting.
pub fn var_at_alpha(costs: &[f64], alpha: f64) -> f64 {
    let mut finite: Vec<f64> = costs.iter().copied().filter(|x| x.is_finite()).collect();
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    quantile_sorted(&finite, alpha)
}

/// Conditional Value at Risk: mean of all costs at or above VaR_alpha.
/// For alpha = 0.95 this is the average of the worst 5% of outcomes.
pub fn cvar_at_alpha(costs: &[f64], alpha: f64) -> f64 {
    let var = var_at_alpha(costs, alpha);
    if !var.is_finite() {
        return f64::NAN;
    }
    let tail: Vec<f64> =
        costs.iter().copied().filter(|&x| x.is_finite() && x >= var).collect();
    if tail.is_empty() {
        return var;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Approximate inverse normal CDF (Abramowitz-Stegun 26.2.23).
/// Used for analytic log-normal loss quantiles in the observation vector.
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if (p - 0.5).abs() < 1e-15 {
        return 0.0;
    }
    let (sign, p_adj) = if p > 0.5 { (1.0, 1.0 - p) } else { (-1.0, p) };
    let t = (-2.0 * p_adj.ln()).sqrt();
    let c0 = 2.515517;
    let c1 = 0.802853;
    let c2 = 0.010328;
    let d1 = 1.432788;
    let d2 = 0.189269;
    let d3 = 0.001308;
    let num = c0 + c1 * t + c2 * t * t;
    let den = 1.0 + d1 * t + d2 * t * t + d3 * t * t * t;
    sign * (t - num / den)
}
