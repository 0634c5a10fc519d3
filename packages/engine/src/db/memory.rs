use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;

use super::{
    session_keys, Difficulty, Question, QuestionFilter, QuizStore, ResponseRecord, ResponseRow,
    StoreResult,
};

/// In-process store. Collections keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

#[derive(Debug, Default)]
struct Collections {
    questions: Vec<Question>,
    question_index: HashMap<String, usize>,
    sessions: Vec<Value>,
    session_users: HashMap<String, String>,
    responses: Vec<ResponseRecord>,
    response_ids: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_questions(questions: Vec<Question>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for q in questions {
                inner.push_question(q);
            }
        }
        store
    }

    pub fn question_count(&self) -> usize {
        self.inner.read().questions.len()
    }

    pub fn response_count(&self) -> usize {
        self.inner.read().responses.len()
    }
}

impl Collections {
    fn push_question(&mut self, q: Question) -> bool {
        if self.question_index.contains_key(&q.question_id) {
            return false;
        }
        self.question_index
            .insert(q.question_id.clone(), self.questions.len());
        self.questions.push(q);
        true
    }

    fn join<'a>(
        &'a self,
        responses: impl Iterator<Item = &'a ResponseRecord> + 'a,
    ) -> impl Iterator<Item = ResponseRow> + 'a {
        responses.filter_map(move |r| {
            let user_id = self.session_users.get(&r.session_id)?;
            let q = &self.questions[*self.question_index.get(&r.question_id)?];
            Some(ResponseRow {
                user_id: user_id.clone(),
                session_id: r.session_id.clone(),
                question_id: r.question_id.clone(),
                theme: q.theme.clone(),
                difficulty: q.difficulty,
                is_correct: r.is_correct,
                response_time_ms: r.response_time_ms,
                answered_at: r.answered_at,
            })
        })
    }
}

impl QuizStore for MemoryStore {
    async fn questions(&self, filter: &QuestionFilter) -> StoreResult<Vec<Question>> {
        let inner = self.inner.read();
        let it = inner.questions.iter().filter(|q| filter.matches(q)).cloned();
        Ok(match filter.limit {
            Some(n) => it.take(n).collect(),
            None => it.collect(),
        })
    }

    async fn skill_pairs(&self) -> StoreResult<Vec<(String, Difficulty)>> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        Ok(inner
            .questions
            .iter()
            .map(|q| (q.theme.clone(), q.difficulty))
            .filter(|pair| seen.insert(pair.clone()))
            .collect())
    }

    async fn session_documents(&self, user_id: &str) -> StoreResult<Vec<Value>> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .iter()
            .filter(|doc| doc.get("user_id").and_then(Value::as_str) == Some(user_id))
            .cloned()
            .collect())
    }

    async fn user_responses(&self, user_id: &str) -> StoreResult<Vec<ResponseRow>> {
        let inner = self.inner.read();
        let rows = inner
            .join(inner.responses.iter())
            .filter(|row| row.user_id == user_id)
            .collect();
        Ok(rows)
    }

    async fn all_responses(&self) -> StoreResult<Vec<ResponseRow>> {
        let inner = self.inner.read();
        let rows = inner.join(inner.responses.iter()).collect();
        Ok(rows)
    }

    async fn insert_questions(&self, questions: &[Question]) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        Ok(questions
            .iter()
            .filter(|q| inner.push_question((*q).clone()))
            .count())
    }

    async fn insert_session(&self, document: Value) -> StoreResult<bool> {
        let (session_id, user_id) = session_keys(&document)?;
        let mut inner = self.inner.write();
        if inner.session_users.contains_key(&session_id) {
            return Ok(false);
        }
        inner.session_users.insert(session_id, user_id);
        inner.sessions.push(document);
        Ok(true)
    }

    async fn insert_responses(&self, responses: &[ResponseRecord]) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        let mut written = 0;
        for r in responses {
            if inner.response_ids.insert(r.response_id.clone()) {
                inner.responses.push(r.clone());
                written += 1;
            }
        }
        Ok(written)
    }
}
