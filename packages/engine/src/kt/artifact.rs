//! Model artifact persistence and the process-wide active model.
//!
//! An artifact is two files in the model directory: `dkt_meta.json` (skill
//! mapping and training metadata) and `dkt.bin` (weights). Both are required;
//! if either is missing the model is considered not trained.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use supaquiz_dkt::{DktModel, Interaction};
use tokio::sync::Mutex;

use crate::db::Difficulty;
use crate::error::{EngineError, EngineResult};
use crate::kt::skills::SkillRegistry;

pub const META_FILE: &str = "dkt_meta.json";
pub const WEIGHTS_FILE: &str = "dkt.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub num_skills: usize,
    pub skill_to_index: BTreeMap<String, usize>,
    pub index_to_skill: BTreeMap<usize, String>,
    pub hidden_size: usize,
    pub dropout: f64,
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub epochs: usize,
    #[serde(default)]
    pub training_pairs: usize,
    #[serde(default)]
    pub final_loss: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub metadata: ModelMetadata,
    pub model: DktModel,
}

impl ModelArtifact {
    /// Check that the weights and both mapping tables describe the same skills.
    pub fn registry(&self) -> EngineResult<SkillRegistry> {
        let meta = &self.metadata;
        if self.model.num_skills() != meta.num_skills {
            return Err(EngineError::SkillMappingMismatch);
        }
        let registry = SkillRegistry::from_index_map(&meta.index_to_skill)
            .ok_or_else(|| EngineError::CorruptArtifact("invalid index_to_skill table".into()))?;
        if registry.len() != meta.num_skills || registry.skill_to_index() != meta.skill_to_index {
            return Err(EngineError::CorruptArtifact(
                "skill_to_index and index_to_skill disagree".into(),
            ));
        }
        Ok(registry)
    }
}

/// Reads and writes the artifact files of one model directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE)
    }

    pub async fn exists(&self) -> bool {
        let meta = tokio::fs::try_exists(self.meta_path()).await.unwrap_or(false);
        let weights = tokio::fs::try_exists(self.weights_path()).await.unwrap_or(false);
        meta && weights
    }

    pub async fn save(&self, artifact: &ModelArtifact) -> EngineResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let meta = serde_json::to_vec_pretty(&artifact.metadata)
            .map_err(|e| EngineError::CorruptArtifact(e.to_string()))?;
        write_atomic(&self.weights_path(), &artifact.model.to_bytes()).await?;
        write_atomic(&self.meta_path(), &meta).await?;
        tracing::info!(
            dir = %self.dir.display(),
            num_skills = artifact.metadata.num_skills,
            "model artifact saved"
        );
        Ok(())
    }

    pub async fn load(&self) -> EngineResult<ModelArtifact> {
        if !self.exists().await {
            return Err(EngineError::ModelNotTrained);
        }
        let meta_raw = tokio::fs::read(self.meta_path()).await?;
        let metadata: ModelMetadata = serde_json::from_slice(&meta_raw)
            .map_err(|e| EngineError::CorruptArtifact(format!("{META_FILE}: {e}")))?;
        let weights = tokio::fs::read(self.weights_path()).await?;
        let model = DktModel::from_bytes(&weights)?;

        let artifact = ModelArtifact { metadata, model };
        artifact.registry()?;
        tracing::info!(
            dir = %self.dir.display(),
            num_skills = artifact.metadata.num_skills,
            trained_at = %artifact.metadata.trained_at,
            "model artifact loaded"
        );
        Ok(artifact)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// A loaded artifact ready for inference.
#[derive(Debug)]
pub struct ActiveModel {
    pub metadata: ModelMetadata,
    pub registry: SkillRegistry,
    model: DktModel,
    cold_start: f64,
}

impl ActiveModel {
    pub fn new(artifact: ModelArtifact, cold_start: f64) -> EngineResult<Self> {
        let registry = artifact.registry()?;
        Ok(Self {
            metadata: artifact.metadata,
            registry,
            model: artifact.model,
            cold_start,
        })
    }

    pub fn num_skills(&self) -> usize {
        self.registry.len()
    }

    pub fn model(&self) -> &DktModel {
        &self.model
    }

    /// p(correct) of every skill at the next step. An empty history gets the
    /// uniform cold-start vector without running the network.
    pub fn next_step_probabilities(&self, sequence: &[Interaction]) -> Vec<f64> {
        self.model
            .predict_next(sequence)
            .unwrap_or_else(|| vec![self.cold_start; self.num_skills()])
    }

    /// Full T x K prediction matrix; row t predicts step t + 1.
    pub fn predict(&self, sequence: &[Interaction]) -> Vec<Vec<f64>> {
        self.model.predict(sequence)
    }

    pub fn probability(&self, probs: &[f64], theme: &str, difficulty: Difficulty) -> Option<f64> {
        self.registry
            .index_of(theme, difficulty)
            .and_then(|i| probs.get(i).copied())
    }
}

/// The single active model, loaded from disk at most once.
#[derive(Debug, Default)]
pub struct ModelCache {
    slot: Mutex<Option<Arc<ActiveModel>>>,
    loads: AtomicUsize,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &self,
        store: &ArtifactStore,
        cold_start: f64,
    ) -> EngineResult<Arc<ActiveModel>> {
        let mut slot = self.slot.lock().await;
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        let model = Arc::new(ActiveModel::new(store.load().await?, cold_start)?);
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    pub async fn current(&self) -> Option<Arc<ActiveModel>> {
        self.slot.lock().await.clone()
    }

    pub async fn install(&self, model: Arc<ActiveModel>) {
        *self.slot.lock().await = Some(model);
    }

    /// Number of disk loads attempted so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supaquiz_dkt::DktConfig;

    fn artifact() -> ModelArtifact {
        let registry = SkillRegistry::from_pairs(vec![
            ("Art".to_string(), Difficulty::Easy),
            ("Art".to_string(), Difficulty::Hard),
            ("Science".to_string(), Difficulty::Easy),
        ])
        .unwrap();
        let model = DktModel::new(
            DktConfig {
                num_skills: 3,
                hidden_size: 4,
                dropout: 0.1,
            },
            1,
        );
        ModelArtifact {
            metadata: ModelMetadata {
                num_skills: 3,
                skill_to_index: registry.skill_to_index(),
                index_to_skill: registry.index_to_skill(),
                hidden_size: 4,
                dropout: 0.1,
                trained_at: Utc::now(),
                epochs: 1,
                training_pairs: 0,
                final_loss: None,
            },
            model,
        }
    }

    #[tokio::test]
    async fn missing_files_mean_not_trained() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(store.load().await, Err(EngineError::ModelNotTrained)));

        store.save(&artifact()).await.unwrap();
        tokio::fs::remove_file(store.weights_path()).await.unwrap();
        assert!(matches!(store.load().await, Err(EngineError::ModelNotTrained)));
    }

    #[tokio::test]
    async fn save_then_load_preserves_mapping_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nested"));
        let original = artifact();
        store.save(&original).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.metadata, original.metadata);
        assert_eq!(loaded.model, original.model);
        assert!(!store.dir().join("dkt.bin.tmp").exists());
    }

    #[tokio::test]
    async fn inconsistent_mapping_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut bad = artifact();
        bad.metadata.skill_to_index.insert("Art|||easy".into(), 2);
        store.save(&bad).await.unwrap();
        assert!(matches!(store.load().await, Err(EngineError::CorruptArtifact(_))));

        let mut wrong_k = artifact();
        wrong_k.metadata.num_skills = 4;
        assert!(matches!(wrong_k.registry(), Err(EngineError::SkillMappingMismatch)));
    }

    #[tokio::test]
    async fn cold_start_vector_skips_the_network() {
        let active = ActiveModel::new(artifact(), 0.6).unwrap();
        assert_eq!(active.next_step_probabilities(&[]), vec![0.6; 3]);
        let p = active.next_step_probabilities(&[Interaction::new(2, true)]);
        assert_eq!(p.len(), 3);
        assert!(active.probability(&p, "Science", Difficulty::Easy).is_some());
        assert!(active.probability(&p, "Science", Difficulty::Hard).is_none());
    }

    #[tokio::test]
    async fn concurrent_first_access_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save(&artifact()).await.unwrap();

        let cache = Arc::new(ModelCache::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                cache.get_or_load(&store, 0.6).await.map(|m| m.num_skills())
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 3);
        }
        assert_eq!(cache.load_count(), 1);
    }
}
