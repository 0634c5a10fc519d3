use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::db::{Difficulty, QuizStore};
use crate::error::{EngineError, EngineResult};

const KEY_SEPARATOR: &str = "|||";

/// A `(theme, difficulty)` pair: the unit the sequence model reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Skill {
    pub theme: String,
    pub difficulty: Difficulty,
}

impl Skill {
    pub fn new(theme: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            theme: theme.into(),
            difficulty,
        }
    }

    /// `"<theme>|||<difficulty>"`, the key used in persisted mappings.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.theme, KEY_SEPARATOR, self.difficulty.as_str())
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let (theme, difficulty) = key.rsplit_once(KEY_SEPARATOR)?;
        Some(Self::new(theme, Difficulty::parse(difficulty)?))
    }
}

/// Stable skill indices 0..K, sorted by theme then difficulty label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillRegistry {
    skills: Vec<Skill>,
}

impl SkillRegistry {
    pub fn from_pairs<I>(pairs: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, Difficulty)>,
    {
        let mut skills: Vec<Skill> = pairs
            .into_iter()
            .map(|(theme, difficulty)| Skill::new(theme, difficulty))
            .collect();
        skills.sort_by(skill_order);
        skills.dedup();
        if skills.is_empty() {
            return Err(EngineError::EmptyCatalog);
        }
        Ok(Self { skills })
    }

    /// Rebuild from a persisted `index -> key` table. Indices must be exactly 0..K.
    pub fn from_index_map(index_to_skill: &BTreeMap<usize, String>) -> Option<Self> {
        let mut skills = Vec::with_capacity(index_to_skill.len());
        for (expected, (idx, key)) in index_to_skill.iter().enumerate() {
            if *idx != expected {
                return None;
            }
            skills.push(Skill::parse_key(key)?);
        }
        let ordered = skills
            .windows(2)
            .all(|w| skill_order(&w[0], &w[1]) == Ordering::Less);
        ordered.then_some(Self { skills })
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn index_of(&self, theme: &str, difficulty: Difficulty) -> Option<usize> {
        self.skills
            .binary_search_by(|s| {
                (s.theme.as_str(), s.difficulty.as_str()).cmp(&(theme, difficulty.as_str()))
            })
            .ok()
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn skill_to_index(&self) -> BTreeMap<String, usize> {
        self.skills.iter().enumerate().map(|(i, s)| (s.key(), i)).collect()
    }

    pub fn index_to_skill(&self) -> BTreeMap<usize, String> {
        self.skills.iter().enumerate().map(|(i, s)| (i, s.key())).collect()
    }
}

fn skill_order(a: &Skill, b: &Skill) -> Ordering {
    (a.theme.as_str(), a.difficulty.as_str()).cmp(&(b.theme.as_str(), b.difficulty.as_str()))
}

/// Build the registry from the current catalog.
pub async fn build_skill_mapping<S: QuizStore>(store: &S) -> EngineResult<SkillRegistry> {
    let pairs = store.skill_pairs().await?;
    SkillRegistry::from_pairs(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs() -> Vec<(String, Difficulty)> {
        vec![
            ("Science".into(), Difficulty::Medium),
            ("Art".into(), Difficulty::Hard),
            ("Science".into(), Difficulty::Easy),
            ("Art".into(), Difficulty::Easy),
            ("Science".into(), Difficulty::Easy),
        ]
    }

    #[test]
    fn sorts_by_theme_then_label() {
        let reg = SkillRegistry::from_pairs(pairs()).unwrap();
        let keys: Vec<String> = reg.skills().iter().map(Skill::key).collect();
        assert_eq!(
            keys,
            vec!["Art|||easy", "Art|||hard", "Science|||easy", "Science|||medium"]
        );
        assert_eq!(reg.index_of("Science", Difficulty::Medium), Some(3));
        assert_eq!(reg.index_of("Science", Difficulty::Hard), None);
    }

    #[test]
    fn empty_catalog_is_an_error() {
        assert!(matches!(
            SkillRegistry::from_pairs(Vec::new()),
            Err(EngineError::EmptyCatalog)
        ));
    }

    #[test]
    fn index_map_round_trips() {
        let reg = SkillRegistry::from_pairs(pairs()).unwrap();
        let restored = SkillRegistry::from_index_map(&reg.index_to_skill()).unwrap();
        assert_eq!(reg, restored);
        assert_eq!(reg.skill_to_index().get("Art|||hard"), Some(&1));
    }

    #[test]
    fn index_map_with_gaps_is_rejected() {
        let mut map = BTreeMap::new();
        map.insert(0, "Art|||easy".to_string());
        map.insert(2, "Art|||hard".to_string());
        assert!(SkillRegistry::from_index_map(&map).is_none());
    }

    #[test]
    fn unsorted_index_map_is_rejected() {
        let mut map = BTreeMap::new();
        map.insert(0, "Science|||easy".to_string());
        map.insert(1, "Art|||easy".to_string());
        assert!(SkillRegistry::from_index_map(&map).is_none());
    }

    #[test]
    fn themes_may_contain_the_separator_prefix() {
        let s = Skill::parse_key("Sci|||Fi|||hard").unwrap();
        assert_eq!(s.theme, "Sci|||Fi");
        assert_eq!(s.difficulty, Difficulty::Hard);
    }
}
