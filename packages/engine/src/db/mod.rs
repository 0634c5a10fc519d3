pub mod memory;
pub mod sqlite;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[serde(alias = "facile", alias = "Easy", alias = "EASY")]
    Easy,
    #[serde(alias = "moyen", alias = "mid", alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "difficile", alias = "Hard", alias = "HARD")]
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// Accepts the canonical labels plus the legacy French catalog labels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" | "facile" => Some(Self::Easy),
            "medium" | "mid" | "moyen" => Some(Self::Medium),
            "hard" | "difficile" => Some(Self::Hard),
            _ => None,
        }
    }

    /// One step up; saturates at `Hard`.
    pub fn harder(&self) -> Self {
        match self {
            Self::Easy => Self::Medium,
            _ => Self::Hard,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub theme: String,
    pub difficulty: Difficulty,
    /// Free-form content (text, choices, answer...). Opaque to the engine.
    #[serde(default, flatten)]
    pub content: Map<String, Value>,
}

impl Question {
    pub fn new(question_id: impl Into<String>, theme: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            question_id: question_id.into(),
            theme: theme.into(),
            difficulty,
            content: Map::new(),
        }
    }
}

/// Catalog query: `difficulty = ?`, `theme IN (...)`, `question_id NOT IN (...)`.
#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    pub difficulty: Option<Difficulty>,
    pub themes: Option<BTreeSet<String>>,
    pub exclude: HashSet<String>,
    pub limit: Option<usize>,
}

impl QuestionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.themes.get_or_insert_with(BTreeSet::new).insert(theme.into());
        self
    }

    pub fn themes<I, T>(mut self, themes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let set = self.themes.get_or_insert_with(BTreeSet::new);
        set.extend(themes.into_iter().map(Into::into));
        self
    }

    pub fn excluding(mut self, ids: &HashSet<String>) -> Self {
        self.exclude.extend(ids.iter().cloned());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, q: &Question) -> bool {
        if let Some(d) = self.difficulty {
            if q.difficulty != d {
                return false;
            }
        }
        if let Some(themes) = &self.themes {
            if !themes.contains(&q.theme) {
                return false;
            }
        }
        !self.exclude.contains(&q.question_id)
    }
}

/// One answer as stored in the Responses collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub response_id: String,
    pub session_id: String,
    pub question_id: String,
    pub is_correct: bool,
    pub response_time_ms: Option<f64>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// Response joined with its session (for the user) and question (for the skill).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRow {
    pub user_id: String,
    pub session_id: String,
    pub question_id: String,
    pub theme: String,
    pub difficulty: Difficulty,
    pub is_correct: bool,
    pub response_time_ms: Option<f64>,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("store init failed: {0}")]
    Init(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Document store holding the Questions, UserSessions and Responses collections.
///
/// Inserts are idempotent by identifier and report whether anything was written.
pub trait QuizStore: Send + Sync {
    fn questions(
        &self,
        filter: &QuestionFilter,
    ) -> impl Future<Output = StoreResult<Vec<Question>>> + Send;

    /// Distinct `(theme, difficulty)` pairs present in the catalog, unordered.
    fn skill_pairs(&self) -> impl Future<Output = StoreResult<Vec<(String, Difficulty)>>> + Send;

    /// Raw UserSessions documents of one user, in insertion order.
    fn session_documents(
        &self,
        user_id: &str,
    ) -> impl Future<Output = StoreResult<Vec<Value>>> + Send;

    fn user_responses(
        &self,
        user_id: &str,
    ) -> impl Future<Output = StoreResult<Vec<ResponseRow>>> + Send;

    fn all_responses(&self) -> impl Future<Output = StoreResult<Vec<ResponseRow>>> + Send;

    fn insert_questions(
        &self,
        questions: &[Question],
    ) -> impl Future<Output = StoreResult<usize>> + Send;

    /// The document must carry string `user_session_id` and `user_id` fields.
    fn insert_session(&self, document: Value) -> impl Future<Output = StoreResult<bool>> + Send;

    fn insert_responses(
        &self,
        responses: &[ResponseRecord],
    ) -> impl Future<Output = StoreResult<usize>> + Send;
}

/// Extract the `(user_session_id, user_id)` keys of a session document.
pub(crate) fn session_keys(document: &Value) -> StoreResult<(String, String)> {
    let field = |name: &str| {
        document
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidDocument(format!("session document missing {name}")))
    };
    Ok((field("user_session_id")?, field("user_id")?))
}
