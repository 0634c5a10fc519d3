use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;

use crate::config::{Config, RecommenderConfig};
use crate::db::QuizStore;
use crate::error::EngineResult;
use crate::kt::artifact::{ActiveModel, ArtifactStore, ModelCache};

/// Shared handles used by every service call.
pub struct EngineState<S> {
    store: Arc<S>,
    config: Arc<Config>,
    recommender: Arc<RecommenderConfig>,
    artifacts: ArtifactStore,
    models: Arc<ModelCache>,
    training_lock: Arc<Mutex<()>>,
    shuffle_seed: Option<u64>,
}

impl<S> Clone for EngineState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            recommender: Arc::clone(&self.recommender),
            artifacts: self.artifacts.clone(),
            models: Arc::clone(&self.models),
            training_lock: Arc::clone(&self.training_lock),
            shuffle_seed: self.shuffle_seed,
        }
    }
}

impl<S: QuizStore> EngineState<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    pub fn from_shared(store: Arc<S>, config: Config) -> Self {
        Self {
            store,
            artifacts: ArtifactStore::new(config.model_dir.clone()),
            config: Arc::new(config),
            recommender: Arc::new(RecommenderConfig::default()),
            models: Arc::new(ModelCache::new()),
            training_lock: Arc::new(Mutex::new(())),
            shuffle_seed: None,
        }
    }

    pub fn with_recommender(mut self, recommender: RecommenderConfig) -> Self {
        self.recommender = Arc::new(recommender);
        self
    }

    /// Make pool shuffles reproducible.
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recommender(&self) -> &RecommenderConfig {
        &self.recommender
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn models(&self) -> &ModelCache {
        &self.models
    }

    pub(crate) fn training_lock(&self) -> &Mutex<()> {
        &self.training_lock
    }

    /// The active model, loading it from the model directory on first use.
    pub async fn active_model(&self) -> EngineResult<Arc<ActiveModel>> {
        self.models
            .get_or_load(&self.artifacts, self.recommender.cold_start_probability)
            .await
    }

    /// Like `active_model`, but a missing or unreadable artifact is `None`.
    pub async fn try_active_model(&self) -> Option<Arc<ActiveModel>> {
        match self.active_model().await {
            Ok(model) => Some(model),
            Err(err) => {
                tracing::debug!(error = %err, "no active model");
                None
            }
        }
    }

    pub fn rng(&self) -> StdRng {
        match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}
