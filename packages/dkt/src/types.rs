use serde::{Deserialize, Serialize};

pub const PROB_EPSILON: f64 = 1e-12;

/// One answered question as seen by the sequence model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interaction {
    pub skill: usize,
    pub correct: bool,
}

impl Interaction {
    pub fn new(skill: usize, correct: bool) -> Self {
        Self { skill, correct }
    }

    /// Position of this interaction in the 2K one-hot input vector:
    /// `skill` when answered correctly, `K + skill` otherwise.
    pub fn encode(&self, num_skills: usize) -> usize {
        if self.correct {
            self.skill
        } else {
            num_skills + self.skill
        }
    }

    pub fn label(&self) -> f64 {
        if self.correct {
            1.0
        } else {
            0.0
        }
    }
}

/// Shape of the network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DktConfig {
    pub num_skills: usize,
    pub hidden_size: usize,
    pub dropout: f64,
}

impl DktConfig {
    pub fn new(num_skills: usize) -> Self {
        Self {
            num_skills,
            ..Default::default()
        }
    }

    pub fn input_size(&self) -> usize {
        2 * self.num_skills
    }
}

impl Default for DktConfig {
    fn default() -> Self {
        Self {
            num_skills: 0,
            hidden_size: 128,
            dropout: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub max_sequence_length: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 8,
            batch_size: 64,
            learning_rate: 1e-3,
            max_sequence_length: 200,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub batches: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub windows: usize,
    pub training_pairs: usize,
    pub epochs: Vec<EpochStats>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.loss)
    }
}

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_places_incorrect_answers_in_upper_half() {
        assert_eq!(Interaction::new(2, true).encode(5), 2);
        assert_eq!(Interaction::new(2, false).encode(5), 7);
    }

    #[test]
    fn sigmoid_is_stable_for_large_inputs() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(!sigmoid(-800.0).is_nan());
    }
}
