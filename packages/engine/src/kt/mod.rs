//! Knowledge tracing: skill space, history normalisation, per-user sequences
//! and the persisted model.

pub mod artifact;
pub mod history;
pub mod sequence;
pub mod skills;

pub use artifact::{ActiveModel, ArtifactStore, ModelArtifact, ModelCache, ModelMetadata};
pub use history::{read_history, Event, History};
pub use sequence::{build_user_sequences, user_sequence, Sequences};
pub use skills::{build_skill_mapping, Skill, SkillRegistry};
