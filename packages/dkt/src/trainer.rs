use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use thiserror::Error;

use crate::dataset::{build_examples, Example};
use crate::model::{DktGradients, DktModel};
use crate::optim::Adam;
use crate::types::{DktConfig, EpochStats, Interaction, TrainingConfig, TrainingReport};

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("no skills: the model needs at least one skill")]
    NoSkills,
    #[error("no sequences with at least 2 interactions")]
    NoSequences,
    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: DktModel,
    pub report: TrainingReport,
}

pub fn train(
    sequences: &[Vec<Interaction>],
    model_config: DktConfig,
    config: &TrainingConfig,
) -> Result<TrainedModel, TrainError> {
    train_with_progress(sequences, model_config, config, |_| {})
}

/// Fit a fresh model with shuffled mini-batches for a fixed number of epochs.
///
/// Each window's gradient is computed independently (in parallel) and the
/// results are summed in batch order, so a given seed always produces the
/// same weights. `on_epoch` is called after every epoch.
pub fn train_with_progress<F>(
    sequences: &[Vec<Interaction>],
    model_config: DktConfig,
    config: &TrainingConfig,
    mut on_epoch: F,
) -> Result<TrainedModel, TrainError>
where
    F: FnMut(&EpochStats),
{
    let k = model_config.num_skills;
    if k == 0 {
        return Err(TrainError::NoSkills);
    }
    validate(&model_config, config)?;

    if let Some(bad) = sequences.iter().flatten().find(|it| it.skill >= k) {
        return Err(TrainError::InvalidConfig(format!(
            "interaction skill {} outside 0..{}",
            bad.skill, k
        )));
    }

    let examples = build_examples(sequences, k, config.max_sequence_length);
    if examples.is_empty() {
        return Err(TrainError::NoSequences);
    }

    let mut model = DktModel::new(model_config, config.seed);
    let shapes: Vec<usize> = DktGradients::zeros_like(&model)
        .tensors()
        .iter()
        .map(|t| t.len())
        .collect();
    let mut optimizer = Adam::new(config.learning_rate, &shapes);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));

    let mut report = TrainingReport {
        windows: examples.len(),
        training_pairs: examples.iter().map(Example::len).sum(),
        epochs: Vec::with_capacity(config.epochs),
    };

    let mut order: Vec<usize> = (0..examples.len()).collect();
    for epoch in 1..=config.epochs {
        order.shuffle(&mut rng);
        let mut total_loss = 0.0;
        let mut batches = 0usize;

        for chunk in order.chunks(config.batch_size) {
            let batch_seed: u64 = rng.gen();
            let (loss, grads) = batch_gradients(&model, &examples, chunk, batch_seed);
            let mut params = model.parameters_mut();
            optimizer.step(&mut params, &grads.tensors());
            total_loss += loss;
            batches += 1;
        }

        let stats = EpochStats {
            epoch,
            loss: total_loss / batches.max(1) as f64,
            batches,
        };
        on_epoch(&stats);
        report.epochs.push(stats);
    }

    Ok(TrainedModel { model, report })
}

/// Mean loss and gradient of one mini-batch.
fn batch_gradients(
    model: &DktModel,
    examples: &[Example],
    chunk: &[usize],
    batch_seed: u64,
) -> (f64, DktGradients) {
    let k = model.num_skills();
    let elements: usize = chunk.iter().map(|&i| examples[i].len() * k).sum();
    let normaliser = elements.max(1) as f64;

    let per_window: Vec<(f64, DktGradients)> = chunk
        .par_iter()
        .enumerate()
        .map(|(j, &idx)| {
            let mut dropout_rng =
                ChaCha8Rng::seed_from_u64(batch_seed ^ (j as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let mut grads = DktGradients::zeros_like(model);
            let loss =
                model.forward_backward(&examples[idx], Some(&mut dropout_rng), normaliser, &mut grads);
            (loss, grads)
        })
        .collect();

    let mut grads = DktGradients::zeros_like(model);
    let mut loss_sum = 0.0;
    for (loss, g) in &per_window {
        loss_sum += loss;
        grads.accumulate(g);
    }
    grads.sanitize();

    (loss_sum / normaliser, grads)
}

fn validate(model_config: &DktConfig, config: &TrainingConfig) -> Result<(), TrainError> {
    if model_config.hidden_size == 0 {
        return Err(TrainError::InvalidConfig("hidden_size must be > 0".into()));
    }
    if !(0.0..1.0).contains(&model_config.dropout) {
        return Err(TrainError::InvalidConfig("dropout must be in [0, 1)".into()));
    }
    if config.batch_size == 0 {
        return Err(TrainError::InvalidConfig("batch_size must be > 0".into()));
    }
    if config.max_sequence_length < 2 {
        return Err(TrainError::InvalidConfig(
            "max_sequence_length must be >= 2".into(),
        ));
    }
    if !(config.learning_rate > 0.0 && config.learning_rate.is_finite()) {
        return Err(TrainError::InvalidConfig("learning_rate must be > 0".into()));
    }
    Ok(())
}
