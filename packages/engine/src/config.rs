use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use supaquiz_dkt::{DktConfig, TrainingConfig};

use crate::logging::LogSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub model_dir: PathBuf,
    pub analysis_window_days: i64,
    pub logging: LogSettings,
    pub training: TrainingSettings,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(default_database_url);

        let model_dir = std::env::var("MODEL_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("model"));

        let analysis_window_days = env_parse("ANALYSIS_WINDOW_DAYS")
            .filter(|d: &i64| *d > 0)
            .unwrap_or(7);

        Self {
            database_url,
            model_dir,
            analysis_window_days,
            logging: LogSettings::from_env(),
            training: TrainingSettings::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            model_dir: PathBuf::from("model"),
            analysis_window_days: 7,
            logging: LogSettings {
                level: "info".to_string(),
                file_dir: None,
            },
            training: TrainingSettings::default(),
        }
    }
}

pub fn default_database_url() -> String {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("supaquiz")
        .join("engine.db");
    format!("sqlite:{}", path.display())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Hyper-parameters of one training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub hidden_size: usize,
    pub dropout: f64,
    pub max_sequence_length: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl TrainingSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            epochs: env_parse("DKT_EPOCHS").unwrap_or(d.epochs),
            batch_size: env_parse("DKT_BATCH_SIZE").unwrap_or(d.batch_size),
            hidden_size: env_parse("DKT_HIDDEN_SIZE").unwrap_or(d.hidden_size),
            dropout: env_parse("DKT_DROPOUT").unwrap_or(d.dropout),
            max_sequence_length: env_parse("DKT_MAX_SEQ_LEN").unwrap_or(d.max_sequence_length),
            learning_rate: env_parse("DKT_LEARNING_RATE").unwrap_or(d.learning_rate),
            seed: env_parse("DKT_SEED").unwrap_or(d.seed),
        }
    }

    pub fn model_config(&self, num_skills: usize) -> DktConfig {
        DktConfig {
            num_skills,
            hidden_size: self.hidden_size,
            dropout: self.dropout,
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            max_sequence_length: self.max_sequence_length,
            seed: self.seed,
        }
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let model = DktConfig::default();
        let training = TrainingConfig::default();
        Self {
            epochs: training.epochs,
            batch_size: training.batch_size,
            hidden_size: model.hidden_size,
            dropout: model.dropout,
            max_sequence_length: training.max_sequence_length,
            learning_rate: training.learning_rate,
            seed: training.seed,
        }
    }
}

/// Fixed constants of the recommendation and evaluation heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommenderConfig {
    /// Questions among this many most recent events are never re-shown.
    pub recent_events: usize,
    pub mastered_window: usize,
    pub mastered_min_correct: usize,
    pub max_per_theme: usize,
    pub revision_target: f64,
    pub challenge_target: f64,
    pub cold_start_probability: f64,
    pub sweet_spot: (f64, f64),
    pub log_loss_eps: f64,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            recent_events: 20,
            mastered_window: 6,
            mastered_min_correct: 2,
            max_per_theme: 2,
            revision_target: 0.70,
            challenge_target: 0.55,
            cold_start_probability: 0.6,
            sweet_spot: (0.55, 0.75),
            log_loss_eps: 1e-9,
        }
    }
}

impl RecommenderConfig {
    pub fn in_sweet_spot(&self, p: f64) -> bool {
        p >= self.sweet_spot.0 && p <= self.sweet_spot.1
    }
}
