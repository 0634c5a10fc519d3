//! Question selection policies.
//!
//! `heuristic` builds revision/challenge pools from per-theme mastery,
//! `dkt` ranks unseen questions by how close the model's p(correct) is to a
//! target. `bandit` currently selects exactly like `heuristic`. Any policy
//! other than `heuristic` that is unknown or fails falls back to it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RecommenderConfig;
use crate::db::{Difficulty, Question, QuestionFilter, QuizStore};
use crate::error::EngineResult;
use crate::kt::artifact::ActiveModel;
use crate::kt::history::{read_history, History};
use crate::kt::sequence::user_sequence;
use crate::services::mastery::{compute_theme_stats, target_difficulty};
use crate::state::EngineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Heuristic,
    Bandit,
    Dkt,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Self::Heuristic, Self::Bandit, Self::Dkt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Bandit => "bandit",
            Self::Dkt => "dkt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "heuristic" => Some(Self::Heuristic),
            "bandit" => Some(Self::Bandit),
            "dkt" => Some(Self::Dkt),
            _ => None,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonType {
    Revision,
    Challenge,
    Fill,
    ColdStart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationItem {
    pub question_id: String,
    pub theme: String,
    pub difficulty: Difficulty,
    pub reason_type: ReasonType,
    pub reason: String,
    pub target_difficulty: Difficulty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_mastery: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_correct: Option<f64>,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl RecommendationItem {
    fn from_question(q: Question, reason_type: ReasonType, reason: String) -> Self {
        Self {
            target_difficulty: q.difficulty,
            question_id: q.question_id,
            theme: q.theme,
            difficulty: q.difficulty,
            reason_type,
            reason,
            theme_mastery: None,
            p_correct: None,
            content: q.content,
        }
    }
}

/// Outcome of one `recommend` call.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub requested: String,
    /// Policy that actually produced `items`.
    pub policy: Policy,
    pub fallback: bool,
    pub count: usize,
    pub items: Vec<RecommendationItem>,
}

/// `round(limit * mix_ratio)` with ties to even, and the remainder.
pub fn split_counts(limit: usize, mix_ratio: f64) -> (usize, usize) {
    let ratio = if mix_ratio.is_nan() { 0.5 } else { mix_ratio.clamp(0.0, 1.0) };
    let revision = ((limit as f64 * ratio).round_ties_even() as usize).min(limit);
    (revision, limit - revision)
}

/// Keep at most `max_per_theme` per theme in order, then append the rest so
/// nothing is lost. Output is a permutation of the input.
pub fn diversify(items: Vec<RecommendationItem>, max_per_theme: usize) -> Vec<RecommendationItem> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_pass = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let c = counts.entry(item.theme.as_str()).or_insert(0);
        if *c < max_per_theme {
            *c += 1;
            first_pass.push(i);
        }
    }
    let kept: HashSet<usize> = first_pass.iter().copied().collect();
    let order: Vec<usize> = first_pass
        .into_iter()
        .chain((0..items.len()).filter(|i| !kept.contains(i)))
        .collect();

    let mut slots: Vec<Option<RecommendationItem>> = items.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Everything the user should not be shown again right now.
pub fn excluded_questions(history: &History, cfg: &RecommenderConfig) -> HashSet<String> {
    let mut excluded = history.seen_question_ids();
    excluded.extend(history.recently_mastered(cfg.mastered_window, cfg.mastered_min_correct));
    excluded.extend(history.recent_question_ids(cfg.recent_events));
    excluded
}

/// Mastery-driven selection.
pub async fn recommend_heuristic<S, R>(
    store: &S,
    user_id: &str,
    limit: usize,
    mix_ratio: f64,
    window_days: i64,
    cfg: &RecommenderConfig,
    rng: &mut R,
) -> EngineResult<Vec<RecommendationItem>>
where
    S: QuizStore,
    R: Rng + Send,
{
    if limit == 0 {
        return Ok(Vec::new());
    }
    let history = read_history(store, user_id).await?;
    let stats = compute_theme_stats(&history, Vec::new(), Duration::days(window_days), Utc::now());
    let excluded = excluded_questions(&history, cfg);

    let mut revision = Vec::new();
    let mut challenge = Vec::new();
    for st in stats.iter().filter(|s| s.attempts > 0) {
        let diff = target_difficulty(st.mastery);
        let base = QuestionFilter::all().theme(st.theme.clone()).excluding(&excluded);

        for q in store.questions(&base.clone().difficulty(diff)).await? {
            let reason = format!(
                "Theme {} weakly mastered (mastery={:.2}). Revision at {}.",
                st.theme, st.mastery, diff
            );
            let mut item = RecommendationItem::from_question(q, ReasonType::Revision, reason);
            item.theme_mastery = Some(st.mastery);
            item.target_difficulty = diff;
            revision.push(item);
        }

        let harder = diff.harder();
        for q in store.questions(&base.difficulty(harder)).await? {
            let reason = format!("Progression on {}. Challenge at {}.", st.theme, harder);
            let mut item = RecommendationItem::from_question(q, ReasonType::Challenge, reason);
            item.theme_mastery = Some(st.mastery);
            item.target_difficulty = harder;
            challenge.push(item);
        }
    }

    if revision.is_empty() && challenge.is_empty() {
        return cold_start(store, &history, &excluded, limit, rng).await;
    }

    revision.shuffle(rng);
    challenge.shuffle(rng);
    let (k_rev, k_ch) = split_counts(limit, mix_ratio);

    let mut chosen: HashSet<String> = HashSet::new();
    let mut picked: Vec<RecommendationItem> = Vec::with_capacity(limit);
    for (pool, k) in [(revision, k_rev), (challenge, k_ch)] {
        let mut taken = 0;
        for item in pool {
            if taken == k {
                break;
            }
            if chosen.insert(item.question_id.clone()) {
                picked.push(item);
                taken += 1;
            }
        }
    }

    if picked.len() < limit {
        let missing = limit - picked.len();
        let mut skip = excluded;
        skip.extend(chosen.iter().cloned());
        let mut extra = store.questions(&QuestionFilter::all().excluding(&skip)).await?;
        extra.shuffle(rng);
        for q in extra.into_iter().take(missing) {
            chosen.insert(q.question_id.clone());
            picked.push(RecommendationItem::from_question(
                q,
                ReasonType::Fill,
                "Basket top-up.".to_string(),
            ));
        }
    }

    let mut out = diversify(picked, cfg.max_per_theme);
    out.truncate(limit);
    Ok(out)
}

async fn cold_start<S, R>(
    store: &S,
    history: &History,
    excluded: &HashSet<String>,
    limit: usize,
    rng: &mut R,
) -> EngineResult<Vec<RecommendationItem>>
where
    S: QuizStore,
    R: Rng + Send,
{
    let has_history = !excluded.is_empty();
    let mut filter = QuestionFilter::all()
        .difficulty(Difficulty::Easy)
        .excluding(excluded);
    let played = history.played_themes();
    if has_history && !played.is_empty() {
        filter = filter.themes(played);
    }

    let mut pool = store.questions(&filter).await?;
    pool.shuffle(rng);
    let (reason_type, reason) = if has_history {
        (ReasonType::Revision, "Gentle review on your played themes.")
    } else {
        (ReasonType::ColdStart, "New player: starting easy.")
    };
    Ok(pool
        .into_iter()
        .take(limit)
        .map(|q| {
            let mut item = RecommendationItem::from_question(q, reason_type, reason.to_string());
            item.target_difficulty = Difficulty::Easy;
            item
        })
        .collect())
}

struct Scored {
    item: RecommendationItem,
    score: f64,
}

fn target_score(p: f64, target: f64) -> f64 {
    -(p - target).powi(2)
}

fn sort_by_score(v: &mut [Scored]) {
    v.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn dkt_item(q: &Question, p: f64, reason_type: ReasonType, target: f64) -> RecommendationItem {
    let reason = format!("DKT: p(correct)≈{p:.2}, close to target {target:.2}");
    let mut item = RecommendationItem::from_question(q.clone(), reason_type, reason);
    item.p_correct = Some(p);
    item
}

/// Model-driven selection: revision items aim at p ≈ 0.70, challenge items at
/// p ≈ 0.55.
pub async fn recommend_dkt<S: QuizStore>(
    store: &S,
    user_id: &str,
    limit: usize,
    mix_ratio: f64,
    model: &ActiveModel,
    cfg: &RecommenderConfig,
) -> EngineResult<Vec<RecommendationItem>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let history = read_history(store, user_id).await?;
    let seen = history.seen_question_ids();
    let rows = store.user_responses(user_id).await?;
    let (seq, _) = user_sequence(&rows, &model.registry);
    let probs = model.next_step_probabilities(&seq);

    let candidates = store.questions(&QuestionFilter::all().excluding(&seen)).await?;
    let mut rev_pool = Vec::new();
    let mut ch_pool = Vec::new();
    let mut best: Vec<(usize, f64, ReasonType, f64)> = Vec::new();
    let mut catalog: Vec<(Question, f64)> = Vec::new();
    for q in candidates {
        let Some(p) = model.probability(&probs, &q.theme, q.difficulty) else {
            continue;
        };
        let rev = target_score(p, cfg.revision_target);
        let ch = target_score(p, cfg.challenge_target);
        rev_pool.push(Scored {
            item: dkt_item(&q, p, ReasonType::Revision, cfg.revision_target),
            score: rev,
        });
        ch_pool.push(Scored {
            item: dkt_item(&q, p, ReasonType::Challenge, cfg.challenge_target),
            score: ch,
        });
        let (score, kind, target) = if rev >= ch {
            (rev, ReasonType::Revision, cfg.revision_target)
        } else {
            (ch, ReasonType::Challenge, cfg.challenge_target)
        };
        best.push((catalog.len(), score, kind, target));
        catalog.push((q, p));
    }

    sort_by_score(&mut rev_pool);
    sort_by_score(&mut ch_pool);
    let (k_rev, k_ch) = split_counts(limit, mix_ratio);

    // dedupe by question id, keeping the higher score
    let mut by_id: HashMap<String, Scored> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for s in rev_pool.into_iter().take(k_rev).chain(ch_pool.into_iter().take(k_ch)) {
        match by_id.get(&s.item.question_id) {
            Some(existing) if existing.score >= s.score => {}
            Some(_) => {
                by_id.insert(s.item.question_id.clone(), s);
            }
            None => {
                order.push(s.item.question_id.clone());
                by_id.insert(s.item.question_id.clone(), s);
            }
        }
    }
    let mut items: Vec<Scored> = order.iter().filter_map(|id| by_id.remove(id)).collect();

    if items.len() < limit {
        let chosen: HashSet<String> = items.iter().map(|s| s.item.question_id.clone()).collect();
        best.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (idx, score, kind, target) in best {
            if items.len() >= limit {
                break;
            }
            let (q, p) = &catalog[idx];
            if chosen.contains(&q.question_id) {
                continue;
            }
            items.push(Scored {
                item: dkt_item(q, *p, kind, target),
                score,
            });
        }
    }

    sort_by_score(&mut items);
    items.truncate(limit);
    Ok(items.into_iter().map(|s| s.item).collect())
}

/// Run one named policy without fallback.
pub async fn run_policy<S: QuizStore>(
    state: &EngineState<S>,
    policy: Policy,
    user_id: &str,
    limit: usize,
    mix_ratio: f64,
) -> EngineResult<Vec<RecommendationItem>> {
    match policy {
        Policy::Heuristic | Policy::Bandit => {
            let mut rng = state.rng();
            recommend_heuristic(
                state.store(),
                user_id,
                limit,
                mix_ratio,
                state.config().analysis_window_days,
                state.recommender(),
                &mut rng,
            )
            .await
        }
        Policy::Dkt => {
            let model = state.active_model().await?;
            recommend_dkt(
                state.store(),
                user_id,
                limit,
                mix_ratio,
                &model,
                state.recommender(),
            )
            .await
        }
    }
}

/// Recommend with the requested policy, retrying once with `heuristic` when
/// the policy is unknown or fails.
pub async fn recommend<S: QuizStore>(
    state: &EngineState<S>,
    user_id: &str,
    limit: usize,
    mix_ratio: f64,
    policy: &str,
) -> EngineResult<Recommendations> {
    let requested = policy.to_string();
    let parsed = Policy::parse(policy);

    let first = match parsed {
        Some(Policy::Heuristic) | None => None,
        Some(p) => Some((p, run_policy(state, p, user_id, limit, mix_ratio).await)),
    };

    let (served, fallback, items) = match first {
        Some((p, Ok(items))) => (p, false, items),
        Some((p, Err(err))) => {
            tracing::warn!(
                user_id,
                policy = %p,
                error = %err,
                kind = ?err.kind(),
                "policy failed, falling back to heuristic"
            );
            let items = run_policy(state, Policy::Heuristic, user_id, limit, mix_ratio).await?;
            (Policy::Heuristic, true, items)
        }
        None => {
            if parsed.is_none() {
                tracing::warn!(user_id, policy, "unknown policy, using heuristic");
            }
            let items = run_policy(state, Policy::Heuristic, user_id, limit, mix_ratio).await?;
            (Policy::Heuristic, parsed.is_none(), items)
        }
    };

    tracing::info!(user_id, policy = %served, n = items.len(), "recommendations ready");
    Ok(Recommendations {
        requested,
        policy: served,
        fallback,
        count: items.len(),
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, theme: &str) -> RecommendationItem {
        RecommendationItem::from_question(
            Question::new(id, theme, Difficulty::Easy),
            ReasonType::Fill,
            String::new(),
        )
    }

    #[test]
    fn split_uses_bankers_rounding() {
        assert_eq!(split_counts(10, 0.5), (5, 5));
        assert_eq!(split_counts(5, 0.5), (2, 3));
        assert_eq!(split_counts(3, 0.5), (2, 1));
        assert_eq!(split_counts(10, 1.7), (10, 0));
        assert_eq!(split_counts(10, -1.0), (0, 10));
        assert_eq!(split_counts(0, 0.5), (0, 0));
    }

    #[test]
    fn diversify_caps_themes_then_tops_up() {
        let items = vec![
            item("a1", "A"),
            item("a2", "A"),
            item("a3", "A"),
            item("b1", "B"),
            item("a4", "A"),
            item("c1", "C"),
        ];
        let ids: Vec<String> = diversify(items, 2)
            .into_iter()
            .map(|i| i.question_id)
            .collect();
        assert_eq!(ids, vec!["a1", "a2", "b1", "c1", "a3", "a4"]);
    }

    #[test]
    fn policy_names() {
        assert_eq!(Policy::parse(" DKT "), Some(Policy::Dkt));
        assert_eq!(Policy::parse("bandit"), Some(Policy::Bandit));
        assert_eq!(Policy::parse("ucb"), None);
        assert_eq!(Policy::Heuristic.to_string(), "heuristic");
    }

    #[test]
    fn item_serialises_flat_content_without_internal_fields() {
        let mut q = Question::new("Q1", "Science", Difficulty::Medium);
        q.content.insert("question_text".into(), Value::from("Why?"));
        let json = serde_json::to_value(RecommendationItem::from_question(
            q,
            ReasonType::ColdStart,
            "r".into(),
        ))
        .unwrap();
        assert_eq!(json["reason_type"], "cold_start");
        assert_eq!(json["question_text"], "Why?");
        assert!(json.get("p_correct").is_none());
        assert!(json.get("score").is_none());
    }
}
