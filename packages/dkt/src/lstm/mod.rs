use rand::Rng;

use crate::matrix::{add_assign, Matrix};
use crate::types::sigmoid;

/// Single LSTM layer over one-hot inputs.
///
/// Gate rows are stacked as `[input, forget, cell, output]`, each block
/// `hidden_size` rows tall, matching the torch layout:
///
/// ```text
/// z   = W_ih x_t + W_hh h_{t-1} + b
/// c_t = f * c_{t-1} + i * g
/// h_t = o * tanh(c_t)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LstmLayer {
    pub input_size: usize,
    pub hidden_size: usize,
    pub w_ih: Matrix,
    pub w_hh: Matrix,
    pub bias: Vec<f64>,
}

/// Activations of one time step, kept for backpropagation.
#[derive(Debug, Clone)]
pub struct LstmStep {
    pub i: Vec<f64>,
    pub f: Vec<f64>,
    pub g: Vec<f64>,
    pub o: Vec<f64>,
    pub c: Vec<f64>,
    pub h: Vec<f64>,
}

impl LstmStep {
    fn with_size(hidden: usize) -> Self {
        Self {
            i: vec![0.0; hidden],
            f: vec![0.0; hidden],
            g: vec![0.0; hidden],
            o: vec![0.0; hidden],
            c: vec![0.0; hidden],
            h: vec![0.0; hidden],
        }
    }
}

#[derive(Debug, Clone)]
pub struct LstmTrace {
    pub inputs: Vec<usize>,
    pub steps: Vec<LstmStep>,
}

impl LstmTrace {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn hidden(&self, t: usize) -> &[f64] {
        &self.steps[t].h
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LstmGradients {
    pub w_ih: Matrix,
    pub w_hh: Matrix,
    pub bias: Vec<f64>,
}

impl LstmGradients {
    pub fn zeros_like(layer: &LstmLayer) -> Self {
        Self {
            w_ih: Matrix::zeros(layer.w_ih.rows, layer.w_ih.cols),
            w_hh: Matrix::zeros(layer.w_hh.rows, layer.w_hh.cols),
            bias: vec![0.0; layer.bias.len()],
        }
    }

    pub fn accumulate(&mut self, other: &LstmGradients) {
        add_assign(&mut self.w_ih.data, &other.w_ih.data);
        add_assign(&mut self.w_hh.data, &other.w_hh.data);
        add_assign(&mut self.bias, &other.bias);
    }
}

impl LstmLayer {
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden_size.max(1) as f64).sqrt();
        let gates = 4 * hidden_size;
        let w_ih = Matrix::uniform(gates, input_size, bound, rng);
        let w_hh = Matrix::uniform(gates, hidden_size, bound, rng);
        let bias = (0..gates).map(|_| rng.gen_range(-bound..=bound)).collect();
        Self {
            input_size,
            hidden_size,
            w_ih,
            w_hh,
            bias,
        }
    }

    /// Run the layer over a sequence of one-hot input positions, starting
    /// from zero hidden and cell state.
    pub fn forward(&self, inputs: &[usize]) -> LstmTrace {
        let hs = self.hidden_size;
        let mut steps: Vec<LstmStep> = Vec::with_capacity(inputs.len());
        let mut h_prev = vec![0.0; hs];
        let mut c_prev = vec![0.0; hs];

        for &x in inputs {
            let mut z = self.bias.clone();
            self.w_ih.add_column(x, &mut z);
            self.w_hh.matvec_add(&h_prev, &mut z);

            let mut step = LstmStep::with_size(hs);
            for k in 0..hs {
                let i = sigmoid(z[k]);
                let f = sigmoid(z[hs + k]);
                let g = z[2 * hs + k].tanh();
                let o = sigmoid(z[3 * hs + k]);
                let c = f * c_prev[k] + i * g;
                step.i[k] = i;
                step.f[k] = f;
                step.g[k] = g;
                step.o[k] = o;
                step.c[k] = c;
                step.h[k] = o * c.tanh();
            }

            h_prev.copy_from_slice(&step.h);
            c_prev.copy_from_slice(&step.c);
            steps.push(step);
        }

        LstmTrace {
            inputs: inputs.to_vec(),
            steps,
        }
    }

    /// Backpropagation through time. `d_hidden[t]` is dLoss/dh_t coming from
    /// the layers above; parameter gradients are accumulated into `grads`.
    pub fn backward(&self, trace: &LstmTrace, d_hidden: &[Vec<f64>], grads: &mut LstmGradients) {
        let hs = self.hidden_size;
        let zero = vec![0.0; hs];
        let mut dh_next = vec![0.0; hs];
        let mut dc_next = vec![0.0; hs];
        let mut dz = vec![0.0; 4 * hs];

        for t in (0..trace.len()).rev() {
            let step = &trace.steps[t];
            let (h_prev, c_prev) = if t == 0 {
                (&zero, &zero)
            } else {
                (&trace.steps[t - 1].h, &trace.steps[t - 1].c)
            };
            let upstream = d_hidden.get(t).map(|v| v.as_slice()).unwrap_or(zero.as_slice());

            for k in 0..hs {
                let (i, f, g, o) = (step.i[k], step.f[k], step.g[k], step.o[k]);
                let dh = upstream[k] + dh_next[k];
                let tc = step.c[k].tanh();
                let d_o = dh * tc;
                let dc = dc_next[k] + dh * o * (1.0 - tc * tc);
                dc_next[k] = dc * f;

                dz[k] = dc * g * i * (1.0 - i);
                dz[hs + k] = dc * c_prev[k] * f * (1.0 - f);
                dz[2 * hs + k] = dc * i * (1.0 - g * g);
                dz[3 * hs + k] = d_o * o * (1.0 - o);
            }

            grads.w_ih.add_to_column(trace.inputs[t], &dz);
            grads.w_hh.add_outer(&dz, h_prev);
            add_assign(&mut grads.bias, &dz);

            dh_next.iter_mut().for_each(|v| *v = 0.0);
            self.w_hh.matvec_transposed_add(&dz, &mut dh_next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn layer() -> LstmLayer {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        LstmLayer::new(6, 4, &mut rng)
    }

    // Loss = sum_t sum_k h_t[k] * w_k, a linear probe on every hidden state.
    fn probe_loss(layer: &LstmLayer, inputs: &[usize], probe: &[f64]) -> f64 {
        let trace = layer.forward(inputs);
        (0..trace.len())
            .map(|t| trace.hidden(t).iter().zip(probe).map(|(h, w)| h * w).sum::<f64>())
            .sum()
    }

    #[test]
    fn forward_is_causal() {
        let layer = layer();
        let full = layer.forward(&[0, 3, 5, 1]);
        let prefix = layer.forward(&[0, 3]);
        for t in 0..2 {
            assert_eq!(full.hidden(t), prefix.hidden(t));
        }
    }

    #[test]
    fn hidden_state_is_bounded() {
        let layer = layer();
        let trace = layer.forward(&[1, 1, 1, 1, 1, 1, 1, 1]);
        for t in 0..trace.len() {
            assert!(trace.hidden(t).iter().all(|h| h.abs() < 1.0));
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let layer = layer();
        let inputs = [0, 4, 2, 5];
        let probe = [0.3, -0.7, 0.5, 0.9];

        let trace = layer.forward(&inputs);
        let d_hidden: Vec<Vec<f64>> = (0..inputs.len()).map(|_| probe.to_vec()).collect();
        let mut grads = LstmGradients::zeros_like(&layer);
        layer.backward(&trace, &d_hidden, &mut grads);

        let h = 1e-6;
        let check = |analytic: f64, plus: f64, minus: f64| {
            let numeric = (plus - minus) / (2.0 * h);
            let denom = analytic.abs().max(numeric.abs()).max(1e-4);
            assert!(
                (analytic - numeric).abs() / denom < 1e-4,
                "analytic {analytic} vs numeric {numeric}"
            );
        };

        for idx in [0, 5, 13, 30, 47, 70, 95] {
            let mut plus = layer.clone();
            plus.w_ih.data[idx] += h;
            let mut minus = layer.clone();
            minus.w_ih.data[idx] -= h;
            check(
                grads.w_ih.data[idx],
                probe_loss(&plus, &inputs, &probe),
                probe_loss(&minus, &inputs, &probe),
            );
        }

        for idx in [0, 7, 22, 41, 63] {
            let mut plus = layer.clone();
            plus.w_hh.data[idx] += h;
            let mut minus = layer.clone();
            minus.w_hh.data[idx] -= h;
            check(
                grads.w_hh.data[idx],
                probe_loss(&plus, &inputs, &probe),
                probe_loss(&minus, &inputs, &probe),
            );
        }

        for idx in 0..layer.bias.len() {
            let mut plus = layer.clone();
            plus.bias[idx] += h;
            let mut minus = layer.clone();
            minus.bias[idx] -= h;
            check(
                grads.bias[idx],
                probe_loss(&plus, &inputs, &probe),
                probe_loss(&minus, &inputs, &probe),
            );
        }
    }
}
