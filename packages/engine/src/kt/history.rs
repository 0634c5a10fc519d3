//! Interaction history reader.
//!
//! UserSessions documents come in two shapes: full game sessions carrying a
//! `questions_played` array, and lightweight training events with the answer
//! fields at the top level. Both are normalised into [`Event`]. Reading never
//! fails on bad data: unusable fields fall back to defaults and unusable
//! sub-documents are counted in [`History::skipped`].

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::db::{Difficulty, QuizStore, StoreResult};

/// Timestamp used for events with no readable time; sorts before everything.
pub const MISSING_TIMESTAMP: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

const PLAYED_ARRAY: &str = "questions_played";

const TRUTHY: &[&str] = &["1", "true", "yes", "ok", "correct", "vrai"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Source field names per canonical attribute, highest priority first.
#[derive(Debug, Clone, Copy)]
pub struct FieldTable {
    pub question_id: &'static [&'static str],
    pub correct: &'static [&'static str],
    pub response_time: &'static [&'static str],
    pub theme: &'static [&'static str],
    pub difficulty: &'static [&'static str],
    pub timestamp: &'static [&'static str],
}

/// Fields of a session document (and of a flat training event).
pub const SESSION_FIELDS: FieldTable = FieldTable {
    question_id: &["question_id", "questionId"],
    correct: &["correct", "is_correct", "isCorrect"],
    response_time: &["response_time_ms", "responseTimeMs", "response_time"],
    theme: &["theme", "thematique"],
    difficulty: &["difficulty", "difficulte"],
    timestamp: &["createdAt", "created_at", "end_time", "start_time", "started_at"],
};

/// Fields of one `questions_played` entry. Missing theme, difficulty and
/// timestamp fall back to the parent session.
pub const PLAYED_FIELDS: FieldTable = FieldTable {
    question_id: &["question_id", "questionId"],
    correct: &["is_correct", "correct", "isCorrect"],
    response_time: &["response_time_ms", "responseTimeMs", "response_time"],
    theme: &["theme", "thematique"],
    difficulty: &["difficulty", "difficulte"],
    timestamp: &["answered_at", "answeredAt"],
};

/// One answered question in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub theme: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub question_id: Option<String>,
    pub correct: bool,
    pub response_time_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn has_timestamp(&self) -> bool {
        self.timestamp != MISSING_TIMESTAMP
    }
}

/// First field of `names` holding a non-null, non-empty value.
pub fn first_present<'a>(doc: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().filter_map(|n| doc.get(*n)).find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim().to_lowercase();
            TRUTHY.contains(&s.as_str())
        }
        _ => false,
    }
}

fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_response_time(value: Option<&Value>) -> Option<f64> {
    value?.as_f64().filter(|ms| ms.is_finite() && *ms >= 0.0)
}

/// Parse RFC 3339, naive ISO-8601 (taken as UTC), dates, epoch milliseconds
/// and extended-JSON `{"$date": ...}` wrappers.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(map) => map
            .get("$date")
            .or_else(|| map.get("$numberLong"))
            .and_then(parse_timestamp),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    let naive = s.trim_end_matches('Z');
    for fmt in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(t.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(naive, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    }
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn timestamp_from(doc: &Value, names: &[&str]) -> Option<DateTime<Utc>> {
    names
        .iter()
        .filter_map(|n| doc.get(*n))
        .find_map(parse_timestamp)
}

fn difficulty_from(doc: &Value, names: &[&str]) -> Option<Difficulty> {
    first_present(doc, names)
        .and_then(Value::as_str)
        .and_then(Difficulty::parse)
}

/// Normalise one played entry against its parent session.
pub fn normalize_played(session: &Value, played: &Value) -> Event {
    let f = PLAYED_FIELDS;
    let s = SESSION_FIELDS;
    Event {
        theme: coerce_string(first_present(played, f.theme))
            .or_else(|| coerce_string(first_present(session, s.theme))),
        difficulty: difficulty_from(played, f.difficulty)
            .or_else(|| difficulty_from(session, s.difficulty)),
        question_id: coerce_string(first_present(played, f.question_id)),
        correct: coerce_bool(first_present(played, f.correct)),
        response_time_ms: coerce_response_time(first_present(played, f.response_time)),
        timestamp: timestamp_from(played, f.timestamp)
            .or_else(|| timestamp_from(session, s.timestamp))
            .unwrap_or(MISSING_TIMESTAMP),
    }
}

/// Normalise a flat training event.
pub fn normalize_flat(doc: &Value) -> Event {
    let s = SESSION_FIELDS;
    Event {
        theme: coerce_string(first_present(doc, s.theme)),
        difficulty: difficulty_from(doc, s.difficulty),
        question_id: coerce_string(first_present(doc, s.question_id)),
        correct: coerce_bool(first_present(doc, s.correct)),
        response_time_ms: coerce_response_time(first_present(doc, s.response_time)),
        timestamp: timestamp_from(doc, s.timestamp).unwrap_or(MISSING_TIMESTAMP),
    }
}

/// Events of one session document, plus the number of played entries that
/// were not objects.
pub fn normalize_session(doc: &Value) -> (Vec<Event>, usize) {
    let played = doc
        .get(PLAYED_ARRAY)
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty());

    match played {
        Some(entries) => {
            let mut skipped = 0;
            let events = entries
                .iter()
                .filter_map(|entry| {
                    if entry.is_object() {
                        Some(normalize_played(doc, entry))
                    } else {
                        skipped += 1;
                        None
                    }
                })
                .collect();
            (events, skipped)
        }
        None if first_present(doc, SESSION_FIELDS.question_id).is_some() => {
            (vec![normalize_flat(doc)], 0)
        }
        None => (Vec::new(), 0),
    }
}

/// Merged history of one user in document order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct History {
    pub events: Vec<Event>,
    pub skipped: usize,
}

impl History {
    pub fn from_documents<'a, I>(docs: I) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut history = Self::default();
        for doc in docs {
            if !doc.is_object() {
                history.skipped += 1;
                continue;
            }
            let (events, skipped) = normalize_session(doc);
            history.events.extend(events);
            history.skipped += skipped;
        }
        history
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn seen_question_ids(&self) -> HashSet<String> {
        self.events
            .iter()
            .filter_map(|e| e.question_id.clone())
            .collect()
    }

    /// Events newest first; equal timestamps keep document order.
    fn newest_first(&self) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.events.iter().collect();
        events.sort_by_key(|e| Reverse(e.timestamp));
        events
    }

    /// Question ids among the `n` most recent events.
    pub fn recent_question_ids(&self, n: usize) -> HashSet<String> {
        self.newest_first()
            .into_iter()
            .take(n)
            .filter_map(|e| e.question_id.clone())
            .collect()
    }

    /// Questions answered correctly at least `min_correct` times within the
    /// `window` most recent events.
    pub fn recently_mastered(&self, window: usize, min_correct: usize) -> HashSet<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for e in self.newest_first().into_iter().take(window) {
            if let (Some(qid), true) = (e.question_id.as_deref(), e.correct) {
                *counts.entry(qid).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .filter(|(_, c)| *c >= min_correct)
            .map(|(qid, _)| qid.to_string())
            .collect()
    }

    pub fn played_themes(&self) -> BTreeSet<String> {
        self.events.iter().filter_map(|e| e.theme.clone()).collect()
    }
}

pub async fn read_history<S: QuizStore>(store: &S, user_id: &str) -> StoreResult<History> {
    let docs = store.session_documents(user_id).await?;
    let history = History::from_documents(&docs);
    if history.skipped > 0 {
        tracing::debug!(user_id, skipped = history.skipped, "skipped malformed history entries");
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boolean_coercion_is_lenient() {
        for v in [json!(true), json!(1), json!("TRUE"), json!(" yes "), json!("correct"), json!("vrai"), json!(2.5)] {
            assert!(coerce_bool(Some(&v)), "{v} should be truthy");
        }
        for v in [json!(false), json!(0), json!("no"), json!("wrong"), json!(null), json!([1])] {
            assert!(!coerce_bool(Some(&v)), "{v} should be falsy");
        }
        assert!(!coerce_bool(None));
    }

    #[test]
    fn timestamps_accept_several_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        for v in [
            json!("2024-05-01T12:30:00Z"),
            json!("2024-05-01T12:30:00+00:00"),
            json!("2024-05-01T12:30:00"),
            json!("2024-05-01T12:30:00.000Z"),
            json!("2024-05-01 12:30:00"),
            json!({"$date": "2024-05-01T12:30:00Z"}),
            json!(expected.timestamp_millis()),
        ] {
            assert_eq!(parse_timestamp(&v), Some(expected), "{v}");
        }
        assert_eq!(
            parse_timestamp(&json!("2024-05-01")),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn played_entries_inherit_session_fields() {
        let doc = json!({
            "user_id": "u1",
            "theme": "Science",
            "difficulty": "facile",
            "createdAt": "2024-05-01T10:00:00Z",
            "questions_played": [
                {"question_id": "Q1", "is_correct": "yes", "response_time_ms": 4200},
                {"question_id": "Q2", "is_correct": 0, "theme": "History",
                 "answered_at": "2024-05-02T10:00:00Z"},
                "garbage"
            ]
        });
        let (events, skipped) = normalize_session(&doc);
        assert_eq!(skipped, 1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].theme.as_deref(), Some("Science"));
        assert_eq!(events[0].difficulty, Some(Difficulty::Easy));
        assert!(events[0].correct);
        assert_eq!(events[0].response_time_ms, Some(4200.0));
        assert_eq!(events[1].theme.as_deref(), Some("History"));
        assert!(!events[1].correct);
        assert!(events[1].timestamp > events[0].timestamp);
    }

    #[test]
    fn flat_events_and_empty_sessions() {
        let flat = json!({"question_id": "Q9", "correct": "true", "theme": "Art",
                          "response_time_ms": "fast", "end_time": "bad date"});
        let (events, _) = normalize_session(&flat);
        assert_eq!(events.len(), 1);
        assert!(events[0].correct);
        assert_eq!(events[0].response_time_ms, None);
        assert!(!events[0].has_timestamp());

        let bare = json!({"user_session_id": "S", "user_id": "u", "questions_played": []});
        assert!(normalize_session(&bare).0.is_empty());
    }

    #[test]
    fn timestamp_priority_falls_through_unparseable_fields() {
        let doc = json!({"question_id": "Q1", "createdAt": "??", "start_time": "2024-01-02T00:00:00Z"});
        let e = normalize_flat(&doc);
        assert_eq!(e.timestamp, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn recency_sets() {
        let docs: Vec<Value> = (0..8)
            .map(|i| {
                json!({
                    "question_id": format!("Q{}", i % 3),
                    "correct": i >= 4,
                    "createdAt": format!("2024-01-0{}T00:00:00Z", i + 1),
                })
            })
            .collect();
        let h = History::from_documents(&docs);
        assert_eq!(h.seen_question_ids().len(), 3);
        // newest two events are Q1 (i=7) and Q0 (i=6)
        let recent = h.recent_question_ids(2);
        assert_eq!(recent, HashSet::from(["Q1".to_string(), "Q0".to_string()]));
        // i = 4..=7 are correct: Q1 twice (4, 7), Q2 once, Q0 once
        let mastered = h.recently_mastered(6, 2);
        assert_eq!(mastered, HashSet::from(["Q1".to_string()]));
    }

    #[test]
    fn non_object_documents_are_counted() {
        let docs = vec![json!("oops"), json!({"question_id": "Q1"})];
        let h = History::from_documents(&docs);
        assert_eq!(h.skipped, 1);
        assert_eq!(h.events.len(), 1);
        assert_eq!(h.played_themes().len(), 0);
    }
}
