use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use supaquiz_dkt::train_with_progress;

use crate::config::TrainingSettings;
use crate::db::QuizStore;
use crate::error::{EngineError, EngineResult};
use crate::kt::artifact::{ActiveModel, ModelArtifact, ModelMetadata};
use crate::kt::sequence::build_user_sequences;
use crate::kt::skills::build_skill_mapping;
use crate::state::EngineState;

#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub num_skills: usize,
    pub users: usize,
    pub usable_sequences: usize,
    pub interactions: usize,
    pub unmapped_responses: usize,
    pub windows: usize,
    pub training_pairs: usize,
    pub epochs: usize,
    pub epoch_losses: Vec<f64>,
    pub final_loss: Option<f64>,
    pub trained_at: DateTime<Utc>,
    pub model_dir: PathBuf,
}

/// Train a new model from every stored response, persist it and make it the
/// active model. Only one training run may be in flight per state.
pub async fn train<S: QuizStore>(
    state: &EngineState<S>,
    settings: TrainingSettings,
) -> EngineResult<TrainingSummary> {
    let Ok(_guard) = state.training_lock().try_lock() else {
        tracing::warn!("training requested while another run is in progress");
        return Err(EngineError::TrainingInProgress);
    };

    let registry = match build_skill_mapping(state.store()).await {
        Err(EngineError::EmptyCatalog) => return Err(EngineError::NoSkills),
        other => other?,
    };
    let rows = state.store().all_responses().await?;
    let sequences = build_user_sequences(&rows, &registry);
    let users = sequences.by_user.len();
    let interactions = sequences.total_interactions();
    let unmapped = sequences.unmapped;
    let usable = sequences.by_user.values().filter(|s| s.len() >= 2).count();

    tracing::info!(
        num_skills = registry.len(),
        users,
        usable,
        interactions,
        unmapped,
        "training started"
    );
    if usable == 0 {
        return Err(EngineError::NoSequences);
    }

    let model_config = settings.model_config(registry.len());
    let training_config = settings.training_config();
    let seqs = sequences.into_sequences();
    let trained = tokio::task::spawn_blocking(move || {
        train_with_progress(&seqs, model_config, &training_config, |stats| {
            tracing::info!(
                epoch = stats.epoch,
                loss = stats.loss,
                batches = stats.batches,
                "epoch finished"
            );
        })
    })
    .await
    .map_err(|e| EngineError::Training(e.to_string()))??;

    let report = trained.report;
    let metadata = ModelMetadata {
        num_skills: registry.len(),
        skill_to_index: registry.skill_to_index(),
        index_to_skill: registry.index_to_skill(),
        hidden_size: settings.hidden_size,
        dropout: settings.dropout,
        trained_at: Utc::now(),
        epochs: report.epochs.len(),
        training_pairs: report.training_pairs,
        final_loss: report.final_loss(),
    };
    let artifact = ModelArtifact {
        metadata,
        model: trained.model,
    };
    state.artifacts().save(&artifact).await?;

    let active = ActiveModel::new(artifact, state.recommender().cold_start_probability)?;
    let metadata = active.metadata.clone();
    state.models().install(Arc::new(active)).await;

    tracing::info!(
        num_skills = metadata.num_skills,
        final_loss = ?metadata.final_loss,
        "training finished"
    );
    Ok(TrainingSummary {
        num_skills: metadata.num_skills,
        users,
        usable_sequences: usable,
        interactions,
        unmapped_responses: unmapped,
        windows: report.windows,
        training_pairs: report.training_pairs,
        epochs: metadata.epochs,
        epoch_losses: report.epochs.iter().map(|e| e.loss).collect(),
        final_loss: metadata.final_loss,
        trained_at: metadata.trained_at,
        model_dir: state.artifacts().dir().to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{Difficulty, MemoryStore, Question};

    #[tokio::test]
    async fn concurrent_training_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::with_questions(vec![Question::new("Q1", "Art", Difficulty::Easy)]);
        let config = Config {
            model_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let state = EngineState::new(store, config);

        let _running = state.training_lock().lock().await;
        let err = train(&state, TrainingSettings::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::TrainingInProgress));
    }
}
