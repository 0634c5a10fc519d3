#![allow(dead_code)]

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use supaquiz_engine::config::{Config, TrainingSettings};
use supaquiz_engine::db::{Difficulty, MemoryStore, Question, QuizStore, ResponseRecord};
use supaquiz_engine::state::EngineState;

pub const THEMES: [&str; 6] = ["Art", "Geography", "History", "Music", "Science", "Sport"];
pub const PER_SKILL: usize = 17;

pub fn question_id(theme: &str, difficulty: Difficulty, n: usize) -> String {
    format!("Q_{}_{}_{:02}", theme, difficulty.as_str(), n)
}

/// 6 themes x 3 difficulties x 17 questions.
pub fn catalog() -> Vec<Question> {
    let mut out = Vec::new();
    for theme in THEMES {
        for difficulty in Difficulty::ALL {
            for n in 0..PER_SKILL {
                let mut q = Question::new(question_id(theme, difficulty, n), theme, difficulty);
                q.content
                    .insert("question_text".into(), Value::from(format!("{theme} #{n}?")));
                out.push(q);
            }
        }
    }
    out
}

pub fn catalog_store() -> MemoryStore {
    MemoryStore::with_questions(catalog())
}

pub fn small_training() -> TrainingSettings {
    TrainingSettings {
        epochs: 2,
        batch_size: 4,
        hidden_size: 8,
        dropout: 0.1,
        max_sequence_length: 50,
        learning_rate: 0.01,
        seed: 7,
    }
}

pub fn test_config(model_dir: &std::path::Path) -> Config {
    Config {
        model_dir: model_dir.to_path_buf(),
        training: small_training(),
        ..Config::default()
    }
}

pub fn test_state(store: MemoryStore, model_dir: &std::path::Path) -> EngineState<MemoryStore> {
    EngineState::new(store, test_config(model_dir)).with_shuffle_seed(11)
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub question: Question,
    pub correct: bool,
    pub response_time_ms: f64,
}

impl Answer {
    pub fn new(question: &Question, correct: bool, response_time_ms: f64) -> Self {
        Self {
            question: question.clone(),
            correct,
            response_time_ms,
        }
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Store one session holding `answers` (embedded in `questions_played`) and
/// the matching Response records, answered a minute apart from `start`.
pub async fn play_session<S: QuizStore>(
    store: &S,
    user_id: &str,
    session_id: &str,
    start: DateTime<Utc>,
    answers: &[Answer],
) {
    let mut played = Vec::new();
    let mut responses = Vec::new();
    for (i, a) in answers.iter().enumerate() {
        let at = start + Duration::minutes(i as i64);
        played.push(json!({
            "question_id": a.question.question_id,
            "theme": a.question.theme,
            "difficulty": a.question.difficulty,
            "is_correct": a.correct,
            "response_time_ms": a.response_time_ms,
            "answered_at": ts(at),
        }));
        responses.push(ResponseRecord {
            response_id: format!("{session_id}_R{i}"),
            session_id: session_id.to_string(),
            question_id: a.question.question_id.clone(),
            is_correct: a.correct,
            response_time_ms: Some(a.response_time_ms),
            answered_at: Some(at),
        });
    }
    store
        .insert_session(json!({
            "user_session_id": session_id,
            "user_id": user_id,
            "started_at": ts(start),
            "questions_played": played,
        }))
        .await
        .unwrap();
    store.insert_responses(&responses).await.unwrap();
}

/// `users` users answering random catalog questions; easier questions are
/// answered correctly more often.
pub async fn populate_random_users<S: QuizStore>(store: &S, users: usize, answers_each: usize, seed: u64) {
    let catalog = catalog();
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc::now() - Duration::days(3);
    for u in 0..users {
        let answers: Vec<Answer> = (0..answers_each)
            .map(|_| {
                let q = &catalog[rng.random_range(0..catalog.len())];
                let p = match q.difficulty {
                    Difficulty::Easy => 0.85,
                    Difficulty::Medium => 0.6,
                    Difficulty::Hard => 0.3,
                };
                Answer::new(q, rng.random::<f64>() < p, rng.random_range(2_000.0..15_000.0))
            })
            .collect();
        play_session(store, &format!("user{u}"), &format!("S_user{u}"), start, &answers).await;
    }
}

/// An active model with random weights over the catalog's skills.
pub async fn untrained_model<S: QuizStore>(store: &S, seed: u64) -> supaquiz_engine::kt::ActiveModel {
    use supaquiz_dkt::{DktConfig, DktModel};
    use supaquiz_engine::kt::{build_skill_mapping, ActiveModel, ModelArtifact, ModelMetadata};

    let registry = build_skill_mapping(store).await.unwrap();
    let config = DktConfig {
        num_skills: registry.len(),
        hidden_size: 8,
        dropout: 0.1,
    };
    let artifact = ModelArtifact {
        metadata: ModelMetadata {
            num_skills: registry.len(),
            skill_to_index: registry.skill_to_index(),
            index_to_skill: registry.index_to_skill(),
            hidden_size: 8,
            dropout: 0.1,
            trained_at: Utc::now(),
            epochs: 0,
            training_pairs: 0,
            final_loss: None,
        },
        model: DktModel::new(config, seed),
    };
    ActiveModel::new(artifact, 0.6).unwrap()
}
