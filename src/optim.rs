use serde::{Deserialize, Serialize};

/// Adam with bias correction. Moment state is part of the checkpoint so a
/// resumed run continues the exact update trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

impl Adam {
    pub fn new(n_params: usize, lr: f64) -> Self {
        Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
            t: 0,
        }
    }

    /// Parameter deltas for one step; callers subtract them.
    pub fn step(&mut self, grads: &[f64]) -> Vec<f64> {
        debug_assert_eq!(grads.len(), self.m.len());
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let mut updates = vec![0.0; grads.len()];
        for i in 0..grads.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grads[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grads[i] * grads[i];
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            updates[i] = self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        updates
    }
}

/// Scale the gradient in place so its global L2 norm is at most `max_norm`.
/// Returns the pre-clip norm. Keeps the λ-scaled risk term from dominating
/// an update.
pub fn clip_global_norm(grads: &mut [f64], max_norm: f64) -> f64 {
    let norm = grads.iter().map(|g| g * g).sum::<f64>().sqrt();
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for g in grads.iter_mut() {
            *g *= scale;
        }
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adam_moves_against_gradient() {
        let mut adam = Adam::new(2, 0.1);
        let updates = adam.step(&[1.0, -1.0]);
        assert!(updates[0] > 0.0, "positive gradient must yield positive delta");
        assert!(updates[1] < 0.0);
    }

    #[test]
    fn adam_state_round_trips_through_json() {
        let mut adam = Adam::new(3, 0.01);
        adam.step(&[0.5, -0.2, 0.1]);
        adam.step(&[0.1, 0.3, -0.4]);
        let json = serde_json::to_string(&adam).unwrap();
        let restored: Adam = serde_json::from_str(&json).unwrap();
        assert_eq!(adam, restored);
    }

    #[test]
    fn resumed_adam_continues_identically() {
        let mut a = Adam::new(2, 0.05);
        a.step(&[1.0, 2.0]);
        let mut b: Adam = serde_json::from_str(&serde_json::to_string(&a).unwrap()).unwrap();
        assert_eq!(a.step(&[0.3, -0.7]), b.step(&[0.3, -0.7]));
    }

    #[test]
    fn clip_leaves_small_gradients_alone() {
        let mut g = [0.3, 0.4]; // norm 0.5
        let norm = clip_global_norm(&mut g, 1.0);
        assert!((norm - 0.5).abs() < 1e-12);
        assert_eq!(g, [0.3, 0.4]);
    }

    #[test]
    fn clip_rescales_to_max_norm() {
        let mut g = [3.0, 4.0]; // norm 5
        let norm = clip_global_norm(&mut g, 0.5);
        assert!((norm - 5.0).abs() < 1e-12);
        let clipped_norm = g.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((clipped_norm - 0.5).abs() < 1e-12);
    }

    #[test]
    fn clip_handles_zero_gradient() {
        let mut g = [0.0, 0.0];
        assert_eq!(clip_global_norm(&mut g, 1.0), 0.0);
        assert_eq!(g, [0.0, 0.0]);
    }
}
