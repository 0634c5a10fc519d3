pub mod config;
pub mod db;
pub mod error;
pub mod kt;
pub mod logging;
pub mod services;
pub mod state;

pub use config::{Config, RecommenderConfig, TrainingSettings};
pub use db::{Difficulty, MemoryStore, Question, QuizStore, SqliteStore};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use state::EngineState;
