use std::collections::BTreeMap;

use supaquiz_dkt::Interaction;

use crate::db::ResponseRow;
use crate::kt::history::MISSING_TIMESTAMP;
use crate::kt::skills::SkillRegistry;

/// Per-user interaction sequences plus the number of rows whose skill is
/// unknown to the registry.
#[derive(Debug, Clone, Default)]
pub struct Sequences {
    pub by_user: BTreeMap<String, Vec<Interaction>>,
    pub unmapped: usize,
}

impl Sequences {
    /// Sequences in user order, for training.
    pub fn into_sequences(self) -> Vec<Vec<Interaction>> {
        self.by_user.into_values().collect()
    }

    pub fn total_interactions(&self) -> usize {
        self.by_user.values().map(Vec::len).sum()
    }
}

/// Time-ordered sequence of one user's joined responses. Missing timestamps
/// sort first; ties keep row order.
pub fn user_sequence(rows: &[ResponseRow], registry: &SkillRegistry) -> (Vec<Interaction>, usize) {
    let mut ordered: Vec<&ResponseRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.answered_at.unwrap_or(MISSING_TIMESTAMP));

    let mut unmapped = 0;
    let seq = ordered
        .into_iter()
        .filter_map(|r| match registry.index_of(&r.theme, r.difficulty) {
            Some(skill) => Some(Interaction::new(skill, r.is_correct)),
            None => {
                unmapped += 1;
                None
            }
        })
        .collect();
    (seq, unmapped)
}

/// Group joined rows by user and build each user's sequence.
pub fn build_user_sequences(rows: &[ResponseRow], registry: &SkillRegistry) -> Sequences {
    let mut grouped: BTreeMap<&str, Vec<ResponseRow>> = BTreeMap::new();
    for row in rows {
        grouped
            .entry(row.user_id.as_str())
            .or_default()
            .push(row.clone());
    }

    let mut out = Sequences::default();
    for (user_id, user_rows) in grouped {
        let (seq, unmapped) = user_sequence(&user_rows, registry);
        out.unmapped += unmapped;
        out.by_user.insert(user_id.to_string(), seq);
    }
    if out.unmapped > 0 {
        tracing::debug!(unmapped = out.unmapped, "responses with skills outside the mapping");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Difficulty;
    use chrono::{TimeZone, Utc};

    fn row(user: &str, theme: &str, d: Difficulty, correct: bool, minute: Option<u32>) -> ResponseRow {
        ResponseRow {
            user_id: user.into(),
            session_id: "S".into(),
            question_id: "Q".into(),
            theme: theme.into(),
            difficulty: d,
            is_correct: correct,
            response_time_ms: None,
            answered_at: minute.map(|m| Utc.with_ymd_and_hms(2024, 1, 1, 10, m, 0).unwrap()),
        }
    }

    fn registry() -> SkillRegistry {
        SkillRegistry::from_pairs(vec![
            ("Art".to_string(), Difficulty::Easy),
            ("Science".to_string(), Difficulty::Easy),
        ])
        .unwrap()
    }

    #[test]
    fn orders_by_time_with_missing_first_and_stable_ties() {
        let rows = vec![
            row("u", "Science", Difficulty::Easy, true, Some(5)),
            row("u", "Art", Difficulty::Easy, false, Some(1)),
            row("u", "Art", Difficulty::Easy, true, None),
            row("u", "Science", Difficulty::Easy, false, Some(1)),
        ];
        let (seq, unmapped) = user_sequence(&rows, &registry());
        assert_eq!(unmapped, 0);
        assert_eq!(
            seq,
            vec![
                Interaction::new(0, true),
                Interaction::new(0, false),
                Interaction::new(1, false),
                Interaction::new(1, true),
            ]
        );
    }

    #[test]
    fn groups_users_and_counts_unmapped() {
        let rows = vec![
            row("b", "Art", Difficulty::Easy, true, Some(1)),
            row("a", "Art", Difficulty::Hard, true, Some(2)),
            row("a", "Science", Difficulty::Easy, true, Some(3)),
        ];
        let seqs = build_user_sequences(&rows, &registry());
        assert_eq!(seqs.unmapped, 1);
        assert_eq!(seqs.by_user["a"], vec![Interaction::new(1, true)]);
        assert_eq!(seqs.total_interactions(), 2);
        assert_eq!(seqs.into_sequences().len(), 2);
    }
}
