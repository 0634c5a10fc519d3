use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::dataset::Example;
use crate::lstm::{LstmGradients, LstmLayer};
use crate::matrix::{add_assign, Matrix};
use crate::sanitize::{binary_cross_entropy, sanitize_in_place};
use crate::types::{sigmoid, DktConfig, Interaction};

const MAX_DROPOUT: f64 = 0.95;

/// Deep knowledge tracing network: LSTM -> dropout -> linear -> sigmoid.
///
/// Input at step t is the one-hot encoding of interaction t over 2K slots;
/// output at step t is p(correct) for every one of the K skills at step t + 1.
#[derive(Debug, Clone, PartialEq)]
pub struct DktModel {
    pub(crate) config: DktConfig,
    pub(crate) lstm: LstmLayer,
    pub(crate) out_w: Matrix,
    pub(crate) out_b: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DktGradients {
    pub lstm: LstmGradients,
    pub out_w: Matrix,
    pub out_b: Vec<f64>,
}

impl DktGradients {
    pub fn zeros_like(model: &DktModel) -> Self {
        Self {
            lstm: LstmGradients::zeros_like(&model.lstm),
            out_w: Matrix::zeros(model.out_w.rows, model.out_w.cols),
            out_b: vec![0.0; model.out_b.len()],
        }
    }

    pub fn accumulate(&mut self, other: &DktGradients) {
        self.lstm.accumulate(&other.lstm);
        add_assign(&mut self.out_w.data, &other.out_w.data);
        add_assign(&mut self.out_b, &other.out_b);
    }

    pub fn sanitize(&mut self) {
        for t in self.tensors_mut() {
            sanitize_in_place(t);
        }
    }

    /// Same order as [`DktModel::parameters_mut`].
    pub fn tensors(&self) -> [&[f64]; 5] {
        [
            &self.lstm.w_ih.data,
            &self.lstm.w_hh.data,
            &self.lstm.bias,
            &self.out_w.data,
            &self.out_b,
        ]
    }

    fn tensors_mut(&mut self) -> [&mut [f64]; 5] {
        [
            &mut self.lstm.w_ih.data,
            &mut self.lstm.w_hh.data,
            &mut self.lstm.bias,
            &mut self.out_w.data,
            &mut self.out_b,
        ]
    }
}

impl DktModel {
    /// Fresh model with weights drawn from a seeded generator.
    pub fn new(config: DktConfig, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let config = DktConfig {
            dropout: config.dropout.clamp(0.0, MAX_DROPOUT),
            ..config
        };
        let lstm = LstmLayer::new(config.input_size(), config.hidden_size, &mut rng);
        let bound = 1.0 / (config.hidden_size.max(1) as f64).sqrt();
        let out_w = Matrix::uniform(config.num_skills, config.hidden_size, bound, &mut rng);
        let out_b = (0..config.num_skills)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        Self {
            config,
            lstm,
            out_w,
            out_b,
        }
    }

    pub(crate) fn from_parts(
        config: DktConfig,
        lstm: LstmLayer,
        out_w: Matrix,
        out_b: Vec<f64>,
    ) -> Self {
        Self {
            config,
            lstm,
            out_w,
            out_b,
        }
    }

    pub fn config(&self) -> &DktConfig {
        &self.config
    }

    pub fn num_skills(&self) -> usize {
        self.config.num_skills
    }

    pub fn parameters_mut(&mut self) -> [&mut [f64]; 5] {
        [
            &mut self.lstm.w_ih.data,
            &mut self.lstm.w_hh.data,
            &mut self.lstm.bias,
            &mut self.out_w.data,
            &mut self.out_b,
        ]
    }

    /// Inference over a whole sequence, dropout disabled. Returns a T x K
    /// matrix of probabilities; row t is the prediction for step t + 1.
    ///
    /// Interactions whose skill is outside the model are ignored.
    pub fn predict(&self, sequence: &[Interaction]) -> Vec<Vec<f64>> {
        let k = self.config.num_skills;
        let inputs: Vec<usize> = sequence
            .iter()
            .filter(|it| it.skill < k)
            .map(|it| it.encode(k))
            .collect();
        let trace = self.lstm.forward(&inputs);
        (0..trace.len())
            .map(|t| self.project(trace.hidden(t)))
            .collect()
    }

    /// Probability vector for the step after the last interaction, or `None`
    /// for an empty sequence.
    pub fn predict_next(&self, sequence: &[Interaction]) -> Option<Vec<f64>> {
        self.predict(sequence).pop()
    }

    fn project(&self, hidden: &[f64]) -> Vec<f64> {
        let mut z = self.out_b.clone();
        self.out_w.matvec_add(hidden, &mut z);
        z.into_iter().map(sigmoid).collect()
    }

    /// Summed dense binary cross-entropy of one example, dropout disabled.
    pub fn loss(&self, example: &Example) -> f64 {
        let mut grads = DktGradients::zeros_like(self);
        self.forward_backward::<ChaCha8Rng>(example, None, 1.0, &mut grads)
    }

    /// Forward and backward pass for one example.
    ///
    /// The loss covers every (step, skill) element: the target is the next
    /// answer's correctness at the next answer's skill and 0 elsewhere.
    /// Gradients are divided by `normaliser` (the element count of the whole
    /// mini-batch) and accumulated into `grads`. Returns the unnormalised
    /// loss sum.
    pub fn forward_backward<R: Rng>(
        &self,
        example: &Example,
        mut dropout_rng: Option<&mut R>,
        normaliser: f64,
        grads: &mut DktGradients,
    ) -> f64 {
        let k = self.config.num_skills;
        let hs = self.config.hidden_size;
        let keep = 1.0 - self.config.dropout;
        let normaliser = normaliser.max(1.0);

        let trace = self.lstm.forward(&example.inputs);
        let mut d_hidden: Vec<Vec<f64>> = Vec::with_capacity(trace.len());
        let mut loss = 0.0;

        for (t, target) in example.targets.iter().enumerate() {
            let mask: Option<Vec<f64>> = match dropout_rng.as_deref_mut() {
                Some(rng) if self.config.dropout > 0.0 => Some(
                    (0..hs)
                        .map(|_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
                        .collect(),
                ),
                _ => None,
            };

            let hidden: Vec<f64> = match &mask {
                Some(m) => trace.hidden(t).iter().zip(m).map(|(h, m)| h * m).collect(),
                None => trace.hidden(t).to_vec(),
            };

            let probs = self.project(&hidden);
            let mut dz = vec![0.0; k];
            for (s, &p) in probs.iter().enumerate() {
                let y = if s == target.skill { target.label() } else { 0.0 };
                loss += binary_cross_entropy(p, y);
                dz[s] = (p - y) / normaliser;
            }

            grads.out_w.add_outer(&dz, &hidden);
            add_assign(&mut grads.out_b, &dz);

            let mut dh = vec![0.0; hs];
            self.out_w.matvec_transposed_add(&dz, &mut dh);
            if let Some(m) = &mask {
                for (d, m) in dh.iter_mut().zip(m) {
                    *d *= m;
                }
            }
            d_hidden.push(dh);
        }

        self.lstm.backward(&trace, &d_hidden, &mut grads.lstm);
        loss
    }
}
