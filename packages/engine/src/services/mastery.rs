use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{Difficulty, QuizStore};
use crate::error::EngineResult;
use crate::kt::history::{read_history, History};

/// Answers faster than this earn the full speed bonus.
const REFERENCE_RESPONSE_MS: f64 = 10_000.0;
const MIN_TIME_FACTOR: f64 = 0.3;
const ACCURACY_WEIGHT: f64 = 0.7;
const SPEED_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeStat {
    pub theme: String,
    pub attempts: usize,
    pub correct: usize,
    pub success_rate: f64,
    pub avg_response_time_ms: Option<f64>,
    pub success_rate_recent: Option<f64>,
    pub success_rate_prev: Option<f64>,
    pub trend_delta: Option<f64>,
    pub mastery: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ThemeAccumulator {
    attempts: usize,
    correct: usize,
    total_time_ms: f64,
    recent_attempts: usize,
    recent_correct: usize,
    prev_attempts: usize,
    prev_correct: usize,
}

impl ThemeAccumulator {
    fn finish(self, theme: String) -> ThemeStat {
        let success_rate = ratio(self.correct, self.attempts).unwrap_or(0.0);
        // untimed answers count as zero time; no time at all means unknown
        let avg_time = (self.attempts > 0 && self.total_time_ms > 0.0)
            .then(|| self.total_time_ms / self.attempts as f64);
        let recent = ratio(self.recent_correct, self.recent_attempts);
        let prev = ratio(self.prev_correct, self.prev_attempts);
        let trend = match (recent, prev) {
            (Some(r), Some(p)) => Some(r - p),
            _ => None,
        };

        ThemeStat {
            theme,
            attempts: self.attempts,
            correct: self.correct,
            success_rate: round4(success_rate),
            avg_response_time_ms: avg_time.map(|t| (t * 10.0).round() / 10.0),
            success_rate_recent: recent.map(round4),
            success_rate_prev: prev.map(round4),
            trend_delta: trend.map(round4),
            mastery: round4(mastery_score(success_rate, avg_time)),
        }
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// `clamp(10000 / avg_ms, 0.3, 1.0)`; 1.0 when no response time is known.
pub fn time_factor(avg_response_time_ms: Option<f64>) -> f64 {
    match avg_response_time_ms {
        Some(avg) if avg > 0.0 => (REFERENCE_RESPONSE_MS / avg).clamp(MIN_TIME_FACTOR, 1.0),
        _ => 1.0,
    }
}

pub fn mastery_score(success_rate: f64, avg_response_time_ms: Option<f64>) -> f64 {
    let tf = time_factor(avg_response_time_ms);
    ACCURACY_WEIGHT * success_rate + SPEED_WEIGHT * success_rate * tf
}

pub fn target_difficulty(mastery: f64) -> Difficulty {
    if mastery < 0.4 {
        Difficulty::Easy
    } else if mastery < 0.7 {
        Difficulty::Medium
    } else {
        Difficulty::Hard
    }
}

/// Per-theme statistics, weakest first.
///
/// `catalog_themes` are included even when never played (zero attempts,
/// zero mastery). Events without a timestamp count as happening `now`.
pub fn compute_theme_stats<I>(
    history: &History,
    catalog_themes: I,
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<ThemeStat>
where
    I: IntoIterator<Item = String>,
{
    let recent_from = now - window;
    let prev_from = now - window * 2;

    let mut acc: BTreeMap<String, ThemeAccumulator> = catalog_themes
        .into_iter()
        .map(|t| (t, ThemeAccumulator::default()))
        .collect();

    for e in &history.events {
        let Some(theme) = e.theme.as_deref() else {
            continue;
        };
        let ts = if e.has_timestamp() { e.timestamp } else { now };
        let a = acc.entry(theme.to_string()).or_default();

        a.attempts += 1;
        a.correct += e.correct as usize;
        a.total_time_ms += e.response_time_ms.unwrap_or(0.0);
        if recent_from <= ts && ts <= now {
            a.recent_attempts += 1;
            a.recent_correct += e.correct as usize;
        }
        if prev_from < ts && ts <= recent_from {
            a.prev_attempts += 1;
            a.prev_correct += e.correct as usize;
        }
    }

    let mut stats: Vec<ThemeStat> = acc
        .into_iter()
        .map(|(theme, a)| a.finish(theme))
        .collect();
    stats.sort_by(|a, b| {
        a.mastery
            .total_cmp(&b.mastery)
            .then(
                a.success_rate_recent
                    .unwrap_or(1.0)
                    .total_cmp(&b.success_rate_recent.unwrap_or(1.0)),
            )
            .then(a.attempts.cmp(&b.attempts))
    });
    stats
}

pub async fn theme_stats<S: QuizStore>(
    store: &S,
    user_id: &str,
    window_days: i64,
) -> EngineResult<Vec<ThemeStat>> {
    let history = read_history(store, user_id).await?;
    let themes = store.skill_pairs().await?.into_iter().map(|(theme, _)| theme);
    Ok(compute_theme_stats(
        &history,
        themes,
        Duration::days(window_days),
        Utc::now(),
    ))
}
