use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Small feed-forward network with a manual forward and backward pass.
/// tanh hidden activations, linear output. No autograd framework: the
/// parameter count here is tiny and the checkpoint must round-trip exactly,
/// so plain `Vec<f64>` weights are the whole story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    layer_dims: Vec<(usize, usize)>,
    /// Row-major `[fan_in * fan_out]` per layer.
    weights: Vec<Vec<f64>>,
    biases: Vec<Vec<f64>>,
}

/// Activations recorded during a forward pass, kept for backprop.
pub struct ForwardTrace {
    pub output: Vec<f64>,
    pre_activations: Vec<Vec<f64>>,
    post_activations: Vec<Vec<f64>>,
}

/// Per-layer gradient accumulator, same shapes as the network.
#[derive(Debug, Clone)]
pub struct MlpGrad {
    pub d_weights: Vec<Vec<f64>>,
    pub d_biases: Vec<Vec<f64>>,
}

impl MlpGrad {
    pub fn add(&mut self, other: &MlpGrad) {
        for l in 0..self.d_weights.len() {
            for (a, b) in self.d_weights[l].iter_mut().zip(&other.d_weights[l]) {
                *a += b;
            }
            for (a, b) in self.d_biases[l].iter_mut().zip(&other.d_biases[l]) {
                *a += b;
            }
        }
    }

    /// Flatten layer-by-layer (weights then biases), matching
    /// `Mlp::apply_updates` ordering.
    pub fn flatten(&self) -> Vec<f64> {
        let mut flat = Vec::new();
        for l in 0..self.d_weights.len() {
            flat.extend_from_slice(&self.d_weights[l]);
            flat.extend_from_slice(&self.d_biases[l]);
        }
        flat
    }
}

impl Mlp {
    /// Xavier-initialized network: `input -> hidden... -> output`.
    pub fn new(input: usize, output: usize, hidden: &[usize], rng: &mut impl Rng) -> Self {
        let mut dims = Vec::new();
        let mut prev = input;
        for &h in hidden {
            dims.push((prev, h));
            prev = h;
        }
        dims.push((prev, output));

        let mut weights = Vec::new();
        let mut biases = Vec::new();
        for &(fan_in, fan_out) in &dims {
            let std = (2.0 / (fan_in + fan_out) as f64).sqrt();
            let w: Vec<f64> = (0..fan_in * fan_out)
                .map(|_| rng.sample::<f64, _>(StandardNormal) * std)
                .collect();
            weights.push(w);
            biases.push(vec![0.0; fan_out]);
        }
        Mlp { layer_dims: dims, weights, biases }
    }

    pub fn n_params(&self) -> usize {
        self.layer_dims.iter().map(|(i, o)| i * o + o).sum()
    }

    pub fn output_dim(&self) -> usize {
        self.layer_dims.last().map(|(_, o)| *o).unwrap_or(0)
    }

    pub fn forward(&self, obs: &[f64]) -> ForwardTrace {
        let mut x = obs.to_vec();
        let mut pre_activations = Vec::new();
        let mut post_activations = vec![x.clone()];

        for (layer_idx, &(fan_in, fan_out)) in self.layer_dims.iter().enumerate() {
            let w = &self.weights[layer_idx];
            let b = &self.biases[layer_idx];
            let mut z = vec![0.0; fan_out];
            for (j, zj) in z.iter_mut().enumerate() {
                let mut sum = b[j];
                for i in 0..fan_in {
                    sum += x[i] * w[i * fan_out + j];
                }
                *zj = sum;
            }
            pre_activations.push(z.clone());

            let is_last = layer_idx == self.layer_dims.len() - 1;
            let a: Vec<f64> =
                if is_last { z } else { z.iter().map(|&v| v.tanh()).collect() };
            post_activations.push(a.clone());
            x = a;
        }

        ForwardTrace { output: x, pre_activations, post_activations }
    }

    /// Gradients of a scalar loss w.r.t. all weights and biases, given
    /// `d_output` = dL/d(output).
    pub fn backward(&self, trace: &ForwardTrace, d_output: &[f64]) -> MlpGrad {
        let n_layers = self.layer_dims.len();
        let mut d_weights = vec![Vec::new(); n_layers];
        let mut d_biases = vec![Vec::new(); n_layers];
        let mut delta = d_output.to_vec();

        for layer_idx in (0..n_layers).rev() {
            let (fan_in, fan_out) = self.layer_dims[layer_idx];
            let is_last = layer_idx == n_layers - 1;

            if !is_last {
                let z = &trace.pre_activations[layer_idx];
                for (j, d) in delta.iter_mut().enumerate() {
                    let t = z[j].tanh();
                    *d *= 1.0 - t * t;
                }
            }

            d_biases[layer_idx] = delta.clone();

            let a_prev = &trace.post_activations[layer_idx];
            let mut dw = vec![0.0; fan_in * fan_out];
            for i in 0..fan_in {
                for j in 0..fan_out {
                    dw[i * fan_out + j] = a_prev[i] * delta[j];
                }
            }
            d_weights[layer_idx] = dw;

            if layer_idx > 0 {
                let w = &self.weights[layer_idx];
                let mut delta_prev = vec![0.0; fan_in];
                for (i, dp) in delta_prev.iter_mut().enumerate() {
                    for j in 0..fan_out {
                        *dp += w[i * fan_out + j] * delta[j];
                    }
                }
                delta = delta_prev;
            }
        }

        MlpGrad { d_weights, d_biases }
    }

    pub fn zero_grad(&self) -> MlpGrad {
        MlpGrad {
            d_weights: self.weights.iter().map(|w| vec![0.0; w.len()]).collect(),
            d_biases: self.biases.iter().map(|b| vec![0.0; b.len()]).collect(),
        }
    }

    /// Subtract optimizer updates, consuming `updates` in the same flat
    /// ordering `MlpGrad::flatten` produces. Returns the slice offset after
    /// this network's parameters (callers append extra learnables).
    pub fn apply_updates(&mut self, updates: &[f64]) -> usize {
        let mut offset = 0;
        for layer_idx in 0..self.layer_dims.len() {
            let (fan_in, fan_out) = self.layer_dims[layer_idx];
            let w_size = fan_in * fan_out;
            for i in 0..w_size {
                self.weights[layer_idx][i] -= updates[offset + i];
            }
            offset += w_size;
            for j in 0..fan_out {
                self.biases[layer_idx][j] -= updates[offset + j];
            }
            offset += fan_out;
        }
        offset
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

    #[test]
    fn n_params_counts_weights_and_biases() {
        let net = Mlp::new(3, 2, &[4], &mut rng());
        // 3*4 + 4 + 4*2 + 2 = 26
        assert_eq!(net.n_params(), 26);
    }

    #[test]
    fn forward_output_has_declared_dim() {
        let net = Mlp::new(5, 3, &[8, 8], &mut rng());
        let trace = net.forward(&[0.1, -0.2, 0.3, 0.0, 1.0]);
        assert_eq!(trace.output.len(), 3);
        assert_eq!(net.output_dim(), 3);
    }

    #[test]
    fn forward_is_deterministic() {
        let net = Mlp::new(4, 2, &[6], &mut rng());
        let x = [0.5, -0.5, 0.25, 0.0];
        assert_eq!(net.forward(&x).output, net.forward(&x).output);
    }

    /// Finite-difference check of the backward pass on a scalar output.
    #[test]
    fn backward_matches_finite_differences() {
        let mut net = Mlp::new(3, 1, &[5], &mut rng());
        let x = [0.3, -0.7, 0.2];

        let trace = net.forward(&x);
        let grad = net.backward(&trace, &[1.0]);
        let flat = grad.flatten();

        let eps = 1e-6;
        let base = net.forward(&x).output[0];
        // Perturb the first weight of layer 0 and compare.
        let analytic = flat[0];
        net.weights[0][0] += eps;
        let bumped = net.forward(&x).output[0];
        let numeric = (bumped - base) / eps;
        assert!(
            (analytic - numeric).abs() < 1e-4,
            "analytic {analytic} vs numeric {numeric}"
        );
    }

    #[test]
    fn apply_updates_consumes_all_params() {
        let mut net = Mlp::new(3, 2, &[4], &mut rng());
        let n = net.n_params();
        let consumed = net.apply_updates(&vec![0.0; n]);
        assert_eq!(consumed, n);
    }

    #[test]
    fn apply_updates_shifts_output() {
        let mut net = Mlp::new(2, 1, &[3], &mut rng());
        let x = [1.0, -1.0];
        let before = net.forward(&x).output[0];
        let trace = net.forward(&x);
        let grad = net.backward(&trace, &[1.0]);
        let mut updates = grad.flatten();
        for u in &mut updates {
            *u *= 0.01;
        }
        net.apply_updates(&updates);
        let after = net.forward(&x).output[0];
        assert!(after < before, "descending the gradient must lower the output");
    }

    #[test]
    fn network_round_trips_through_json() {
        let net = Mlp::new(4, 2, &[6, 6], &mut rng());
        let json = serde_json::to_string(&net).unwrap();
        let restored: Mlp = serde_json::from_str(&json).unwrap();
        assert_eq!(net, restored);
    }
}
