//! Offline quality checks for the active model and the policies.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use supaquiz_dkt::Interaction;

use crate::config::RecommenderConfig;
use crate::db::QuizStore;
use crate::error::EngineResult;
use crate::kt::artifact::ActiveModel;
use crate::kt::sequence::user_sequence;
use crate::services::recommendation::{run_policy, Policy, RecommendationItem};
use crate::state::EngineState;

/// Mix used when comparing policies side by side.
pub const COMPARE_MIX_RATIO: f64 = 0.5;

const MIN_HOLDOUT_EVENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldoutMetrics {
    pub user_id: String,
    pub n: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brier: Option<f64>,
    #[serde(rename = "accuracy@0.5", skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_in_sweet_spot: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HoldoutMetrics {
    fn too_short(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            n: 0,
            log_loss: None,
            brier: None,
            accuracy: None,
            pct_in_sweet_spot: None,
            message: Some("sequence too short".to_string()),
        }
    }
}

/// Next-step metrics over one sequence: every interaction from the second on
/// is predicted from its prefix, using a single causal forward pass.
pub fn evaluate_sequence(
    model: &ActiveModel,
    user_id: &str,
    seq: &[Interaction],
    cfg: &RecommenderConfig,
) -> HoldoutMetrics {
    if seq.len() < MIN_HOLDOUT_EVENTS {
        return HoldoutMetrics::too_short(user_id);
    }
    let preds = model.predict(seq);
    let eps = cfg.log_loss_eps;

    let mut n = 0usize;
    let mut log_loss = 0.0;
    let mut brier = 0.0;
    let mut hits = 0usize;
    let mut in_band = 0usize;
    for t in 1..seq.len() {
        let Some(&p) = preds.get(t - 1).and_then(|row| row.get(seq[t].skill)) else {
            continue;
        };
        let y = if seq[t].correct { 1.0 } else { 0.0 };
        let pc = p.clamp(eps, 1.0 - eps);
        log_loss -= y * pc.ln() + (1.0 - y) * (1.0 - pc).ln();
        brier += (p - y).powi(2);
        hits += ((p >= 0.5) == seq[t].correct) as usize;
        in_band += cfg.in_sweet_spot(p) as usize;
        n += 1;
    }
    if n == 0 {
        return HoldoutMetrics::too_short(user_id);
    }

    let nf = n as f64;
    HoldoutMetrics {
        user_id: user_id.to_string(),
        n,
        log_loss: Some(log_loss / nf),
        brier: Some(brier / nf),
        accuracy: Some(hits as f64 / nf),
        pct_in_sweet_spot: Some(in_band as f64 / nf),
        message: None,
    }
}

/// Holdout metrics of the active model on one user's history.
pub async fn holdout_metrics<S: QuizStore>(
    state: &EngineState<S>,
    user_id: &str,
) -> EngineResult<HoldoutMetrics> {
    let model = state.active_model().await?;
    let rows = state.store().user_responses(user_id).await?;
    let (seq, unmapped) = user_sequence(&rows, &model.registry);
    if unmapped > 0 {
        tracing::debug!(user_id, unmapped, "holdout skipped unmapped responses");
    }
    let metrics = evaluate_sequence(&model, user_id, &seq, state.recommender());
    tracing::info!(user_id, n = metrics.n, log_loss = ?metrics.log_loss, "holdout evaluated");
    Ok(metrics)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySummary {
    pub avg_p: Option<f64>,
    pub pct_in_sweet_spot: Option<f64>,
    pub n: usize,
    pub themes: usize,
}

/// Mean model probability over a recommendation list and the share of items
/// inside the sweet-spot band. Items whose skill is unknown are ignored.
pub fn summarize_with_dkt_p(
    model: &ActiveModel,
    probs: &[f64],
    items: &[RecommendationItem],
    cfg: &RecommenderConfig,
) -> PolicySummary {
    let ps: Vec<f64> = items
        .iter()
        .filter_map(|it| model.probability(probs, &it.theme, it.difficulty))
        .collect();
    let themes = items
        .iter()
        .map(|it| it.theme.as_str())
        .collect::<HashSet<_>>()
        .len();
    if ps.is_empty() {
        return PolicySummary {
            avg_p: None,
            pct_in_sweet_spot: None,
            n: 0,
            themes,
        };
    }
    let n = ps.len() as f64;
    PolicySummary {
        avg_p: Some(ps.iter().sum::<f64>() / n),
        pct_in_sweet_spot: Some(ps.iter().filter(|p| cfg.in_sweet_spot(**p)).count() as f64 / n),
        n: ps.len(),
        themes,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyComparison {
    pub user_id: String,
    pub limit: usize,
    pub recommendations: BTreeMap<Policy, Vec<RecommendationItem>>,
    /// Present only when a trained model is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BTreeMap<Policy, PolicySummary>>,
}

/// Run every policy for one user. A policy that fails contributes an empty
/// list instead of failing the comparison.
pub async fn compare_policies<S: QuizStore>(
    state: &EngineState<S>,
    user_id: &str,
    limit: usize,
) -> EngineResult<PolicyComparison> {
    let mut recommendations = BTreeMap::new();
    for policy in Policy::ALL {
        let items = match run_policy(state, policy, user_id, limit, COMPARE_MIX_RATIO).await {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(user_id, policy = %policy, error = %err, "policy failed during comparison");
                Vec::new()
            }
        };
        recommendations.insert(policy, items);
    }

    let summary = match state.try_active_model().await {
        Some(model) => {
            let rows = state.store().user_responses(user_id).await?;
            let (seq, _) = user_sequence(&rows, &model.registry);
            let probs = model.next_step_probabilities(&seq);
            Some(
                recommendations
                    .iter()
                    .map(|(policy, items)| {
                        (
                            *policy,
                            summarize_with_dkt_p(&model, &probs, items, state.recommender()),
                        )
                    })
                    .collect(),
            )
        }
        None => None,
    };

    Ok(PolicyComparison {
        user_id: user_id.to_string(),
        limit,
        recommendations,
        summary,
    })
}
