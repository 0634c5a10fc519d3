use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Question, QuizStore, ResponseRecord, StoreError};
use crate::error::EngineResult;

/// Documents to load into the store, in dependency order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportBatch {
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub sessions: Vec<Value>,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub questions: usize,
    pub sessions: usize,
    pub responses: usize,
    /// Sessions missing `user_session_id` or `user_id`.
    pub rejected_sessions: usize,
}

/// Insert a batch. Documents already present are left untouched, so the
/// same batch can be imported twice.
pub async fn import_batch<S: QuizStore>(store: &S, batch: ImportBatch) -> EngineResult<ImportSummary> {
    let mut summary = ImportSummary {
        questions: store.insert_questions(&batch.questions).await?,
        ..Default::default()
    };

    for doc in batch.sessions {
        match store.insert_session(doc).await {
            Ok(true) => summary.sessions += 1,
            Ok(false) => {}
            Err(StoreError::InvalidDocument(reason)) => {
                tracing::debug!(reason = %reason, "session document rejected");
                summary.rejected_sessions += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    summary.responses = store.insert_responses(&batch.responses).await?;

    tracing::info!(
        questions = summary.questions,
        sessions = summary.sessions,
        responses = summary.responses,
        rejected_sessions = summary.rejected_sessions,
        "import finished"
    );
    Ok(summary)
}

/// Read an `ImportBatch` from a JSON file.
pub async fn read_batch(path: &Path) -> EngineResult<ImportBatch> {
    let raw = tokio::fs::read(path).await?;
    let batch = serde_json::from_slice(&raw).map_err(StoreError::from)?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Difficulty, MemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn batch_import_is_idempotent_and_counts_rejects() {
        let batch: ImportBatch = serde_json::from_value(json!({
            "questions": [
                {"question_id": "Q1", "theme": "Science", "difficulty": "easy"},
                {"question_id": "Q2", "theme": "Science", "difficulty": "hard"}
            ],
            "sessions": [
                {"user_session_id": "S1", "user_id": "u1"},
                {"user_id": "u1"}
            ],
            "responses": [
                {"response_id": "R1", "session_id": "S1", "question_id": "Q1",
                 "is_correct": true, "response_time_ms": 3000.0, "answered_at": null}
            ]
        }))
        .unwrap();

        let store = MemoryStore::new();
        let first = import_batch(&store, batch.clone()).await.unwrap();
        assert_eq!(
            first,
            ImportSummary {
                questions: 2,
                sessions: 1,
                responses: 1,
                rejected_sessions: 1,
            }
        );

        let second = import_batch(&store, batch).await.unwrap();
        assert_eq!(second.questions, 0);
        assert_eq!(second.sessions, 0);
        assert_eq!(second.responses, 0);

        let rows = store.user_responses("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].difficulty, Difficulty::Easy);
    }

    #[tokio::test]
    async fn legacy_difficulty_labels_are_accepted() {
        let batch: ImportBatch = serde_json::from_value(json!({
            "questions": [
                {"question_id": "Q1", "theme": "Art", "difficulty": "facile"},
                {"question_id": "Q2", "theme": "Art", "difficulty": "moyen"},
                {"question_id": "Q3", "theme": "Art", "difficulty": "mid"},
                {"question_id": "Q4", "theme": "Art", "difficulty": "difficile", "question_text": "?"}
            ]
        }))
        .unwrap();
        let levels: Vec<_> = batch.questions.iter().map(|q| q.difficulty).collect();
        assert_eq!(
            levels,
            [Difficulty::Easy, Difficulty::Medium, Difficulty::Medium, Difficulty::Hard]
        );
        assert!(batch.questions[3].content.contains_key("question_text"));

        let store = MemoryStore::new();
        let summary = import_batch(&store, batch).await.unwrap();
        assert_eq!(summary.questions, 4);
    }
}
