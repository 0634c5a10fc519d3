#![deny(clippy::all)]

pub mod codec;
pub mod dataset;
pub mod lstm;
pub mod matrix;
pub mod model;
pub mod optim;
pub mod sanitize;
pub mod trainer;
pub mod types;

// Re-exports
pub use codec::CodecError;
pub use dataset::{build_examples, windows, Example};
pub use model::{DktGradients, DktModel};
pub use optim::Adam;
pub use trainer::{train, train_with_progress, TrainError, TrainedModel};
pub use types::*;
