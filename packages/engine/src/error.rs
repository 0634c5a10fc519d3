use serde::Serialize;
use supaquiz_dkt::{CodecError, TrainError};
use thiserror::Error;

use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("question catalog is empty")]
    EmptyCatalog,
    #[error("catalog yields no skills")]
    NoSkills,
    #[error("no user has at least 2 interactions")]
    NoSequences,
    #[error("DKT model not trained yet; run training first")]
    ModelNotTrained,
    #[error("corrupt model artifact: {0}")]
    CorruptArtifact(String),
    #[error("skill mapping does not match the trained model")]
    SkillMappingMismatch,
    #[error("a training run is already in progress")]
    TrainingInProgress,
    #[error("training failed: {0}")]
    Training(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InsufficientData,
    ModelNotTrained,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyCatalog | Self::NoSkills | Self::SkillMappingMismatch => {
                ErrorKind::Configuration
            }
            Self::NoSequences => ErrorKind::InsufficientData,
            Self::ModelNotTrained | Self::CorruptArtifact(_) => ErrorKind::ModelNotTrained,
            Self::TrainingInProgress | Self::Training(_) | Self::Store(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<CodecError> for EngineError {
    fn from(err: CodecError) -> Self {
        Self::CorruptArtifact(err.to_string())
    }
}

impl From<TrainError> for EngineError {
    fn from(err: TrainError) -> Self {
        match err {
            TrainError::NoSkills => Self::NoSkills,
            TrainError::NoSequences => Self::NoSequences,
            TrainError::InvalidConfig(msg) => Self::Training(msg),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
