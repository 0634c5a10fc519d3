use chrono::{Duration, SecondsFormat, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::{Difficulty, QuizStore, ResponseRecord, StoreError};
use crate::error::EngineResult;
use crate::kt::sequence::user_sequence;
use crate::services::mastery::{theme_stats, ThemeStat};
use crate::services::recommendation::{recommend, Policy};
use crate::state::EngineState;

const SIMULATION_MIX_RATIO: f64 = 0.5;
const ANSWER_SPACING_SECS: i64 = 30;
const RESPONSE_TIME_MS: std::ops::Range<u32> = 1_500..12_000;

#[derive(Debug, Clone, Serialize)]
pub struct SimulatedAnswer {
    pub question_id: String,
    pub theme: String,
    pub difficulty: Difficulty,
    pub p_est: f64,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub user_id: String,
    pub session_id: String,
    pub policy: Policy,
    pub results: Vec<SimulatedAnswer>,
    pub before: Vec<ThemeStat>,
    pub after: Vec<ThemeStat>,
}

/// Play one synthetic session: recommend, answer each item with probability
/// p(correct), store the session and its responses, and report the theme
/// statistics before and after.
pub async fn simulate_session<S: QuizStore>(
    state: &EngineState<S>,
    user_id: &str,
    policy: &str,
    limit: usize,
) -> EngineResult<SimulationReport> {
    let window = state.config().analysis_window_days;
    let before = theme_stats(state.store(), user_id, window).await?;

    let recos = recommend(state, user_id, limit, SIMULATION_MIX_RATIO, policy).await?;

    let model = state.try_active_model().await;
    let probs = match &model {
        Some(m) => {
            let rows = state.store().user_responses(user_id).await?;
            let (seq, _) = user_sequence(&rows, &m.registry);
            Some(m.next_step_probabilities(&seq))
        }
        None => None,
    };
    let fallback_p = state.recommender().cold_start_probability;

    let now = Utc::now();
    let session_id = format!("US_SIM_{}_{}", user_id, uuid::Uuid::new_v4().simple());
    let mut rng = state.rng();
    let mut results = Vec::with_capacity(recos.items.len());
    let mut played = Vec::with_capacity(recos.items.len());
    let mut responses = Vec::with_capacity(recos.items.len());

    for (i, item) in recos.items.iter().enumerate() {
        let p = match (&model, &probs) {
            (Some(m), Some(probs)) => m
                .probability(probs, &item.theme, item.difficulty)
                .unwrap_or(fallback_p),
            _ => fallback_p,
        };
        let is_correct = rng.random::<f64>() < p;
        let response_time_ms = f64::from(rng.random_range(RESPONSE_TIME_MS));
        let answered_at = now + Duration::seconds(ANSWER_SPACING_SECS * (i as i64 + 1));

        played.push(json!({
            "question_id": item.question_id,
            "theme": item.theme,
            "difficulty": item.difficulty,
            "is_correct": is_correct,
            "response_time_ms": response_time_ms,
            "answered_at": answered_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }));
        responses.push(ResponseRecord {
            response_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.clone(),
            question_id: item.question_id.clone(),
            is_correct,
            response_time_ms: Some(response_time_ms),
            answered_at: Some(answered_at),
        });
        results.push(SimulatedAnswer {
            question_id: item.question_id.clone(),
            theme: item.theme.clone(),
            difficulty: item.difficulty,
            p_est: (p * 1000.0).round() / 1000.0,
            is_correct,
        });
    }

    let document: Value = json!({
        "user_session_id": session_id,
        "user_id": user_id,
        "started_at": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        "questions_played": played,
    });
    if !state.store().insert_session(document).await? {
        return Err(StoreError::InvalidDocument(format!("session {session_id} already exists")).into());
    }
    let inserted = state.store().insert_responses(&responses).await?;

    let after = theme_stats(state.store(), user_id, window).await?;
    tracing::info!(
        user_id,
        session_id = %session_id,
        policy = %recos.policy,
        answers = inserted,
        "simulated session stored"
    );

    Ok(SimulationReport {
        user_id: user_id.to_string(),
        session_id,
        policy: recos.policy,
        results,
        before,
        after,
    })
}
