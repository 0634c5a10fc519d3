use serde::{Deserialize, Serialize};

/// Adam with torch defaults (beta1 = 0.9, beta2 = 0.999, eps = 1e-8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    step: u64,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64, shapes: &[usize]) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: shapes.iter().map(|&n| vec![0.0; n]).collect(),
            v: shapes.iter().map(|&n| vec![0.0; n]).collect(),
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    /// One update. `params` and `grads` must be given in the order used at
    /// construction.
    pub fn step(&mut self, params: &mut [&mut [f64]], grads: &[&[f64]]) {
        self.step += 1;
        let t = self.step as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        for (slot, (param, grad)) in params.iter_mut().zip(grads).enumerate() {
            let m = &mut self.m[slot];
            let v = &mut self.v[slot];
            for j in 0..param.len() {
                let g = grad[j];
                m[j] = self.beta1 * m[j] + (1.0 - self.beta1) * g;
                v[j] = self.beta2 * v[j] + (1.0 - self.beta2) * g * g;
                let m_hat = m[j] / bias1;
                let v_hat = v[j] / bias2;
                param[j] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut opt = Adam::new(0.1, &[2]);
        let mut p = vec![1.0, -1.0];
        let g: [&[f64]; 1] = [&[0.5, -2.0]];
        opt.step(&mut [p.as_mut_slice()], &g);
        // bias-corrected first step is lr * sign(g)
        assert!((p[0] - 0.9).abs() < 1e-6);
        assert!((p[1] + 0.9).abs() < 1e-6);
        assert_eq!(opt.steps_taken(), 1);
    }

    #[test]
    fn minimises_a_quadratic() {
        let mut opt = Adam::new(0.05, &[1]);
        let mut x = vec![3.0];
        for _ in 0..500 {
            let g = [2.0 * (x[0] - 1.0)];
            let grads: [&[f64]; 1] = [&g];
            opt.step(&mut [x.as_mut_slice()], &grads);
        }
        assert!((x[0] - 1.0).abs() < 0.05);
    }
}
