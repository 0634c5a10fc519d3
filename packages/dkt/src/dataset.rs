use serde::{Deserialize, Serialize};

use crate::types::Interaction;

/// Next-step training example built from one window of length T.
///
/// `inputs[t]` is the encoded interaction t and `targets[t]` is interaction
/// t + 1, so a window yields exactly T - 1 pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub inputs: Vec<usize>,
    pub targets: Vec<Interaction>,
}

impl Example {
    pub fn from_window(window: &[Interaction], num_skills: usize) -> Option<Self> {
        if window.len() < 2 {
            return None;
        }
        let inputs = window[..window.len() - 1]
            .iter()
            .map(|it| it.encode(num_skills))
            .collect();
        let targets = window[1..].to_vec();
        Some(Self { inputs, targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Non-overlapping chunks of at most `max_len`; chunks shorter than 2 are dropped.
pub fn windows(sequence: &[Interaction], max_len: usize) -> Vec<&[Interaction]> {
    let max_len = max_len.max(2);
    sequence
        .chunks(max_len)
        .filter(|w| w.len() >= 2)
        .collect()
}

/// Window every sequence and turn each window into an example. Sequences with
/// fewer than two interactions contribute nothing.
pub fn build_examples(
    sequences: &[Vec<Interaction>],
    num_skills: usize,
    max_len: usize,
) -> Vec<Example> {
    sequences
        .iter()
        .filter(|seq| seq.len() >= 2)
        .flat_map(|seq| windows(seq, max_len))
        .filter_map(|w| Example::from_window(w, num_skills))
        .collect()
}
