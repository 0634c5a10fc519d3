use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{
    session_keys, Difficulty, Question, QuestionFilter, QuizStore, ResponseRecord, ResponseRow,
    StoreError, StoreResult,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS "questions" (
        "question_id" TEXT PRIMARY KEY NOT NULL,
        "theme" TEXT NOT NULL,
        "difficulty" TEXT NOT NULL,
        "content" TEXT NOT NULL DEFAULT '{}'
    )"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_questions_theme_difficulty" ON "questions" ("theme", "difficulty")"#,
    r#"CREATE TABLE IF NOT EXISTS "user_sessions" (
        "user_session_id" TEXT PRIMARY KEY NOT NULL,
        "user_id" TEXT NOT NULL,
        "document" TEXT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_user_sessions_user" ON "user_sessions" ("user_id")"#,
    r#"CREATE TABLE IF NOT EXISTS "responses" (
        "response_id" TEXT PRIMARY KEY NOT NULL,
        "session_id" TEXT NOT NULL,
        "question_id" TEXT NOT NULL,
        "is_correct" INTEGER NOT NULL,
        "response_time_ms" REAL,
        "answered_at" TEXT
    )"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_responses_session" ON "responses" ("session_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_responses_answered_at" ON "responses" ("answered_at")"#,
];

const JOINED_RESPONSES: &str = r#"
    SELECT s."user_id", r."session_id", r."question_id", q."theme", q."difficulty",
           r."is_correct", r."response_time_ms", r."answered_at"
    FROM "responses" r
    JOIN "user_sessions" s ON s."user_session_id" = r."session_id"
    JOIN "questions" q ON q."question_id" = r."question_id"
"#;

/// SQLite-backed store. The schema is created on connect.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let in_memory = url.contains(":memory:");
        if !in_memory {
            if let Some(parent) = sqlite_file_path(url).and_then(|p| p.parent().map(Path::to_path_buf)) {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(&parent)
                        .map_err(|e| StoreError::Init(format!("{}: {e}", parent.display())))?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Init(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        // every in-memory connection would be a separate database
        let max_connections = if in_memory { 1 } else { 5 };
        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(url, "sqlite store ready");
        Ok(store)
    }

    pub async fn open(path: &Path) -> StoreResult<Self> {
        Self::connect(&format!("sqlite:{}", path.display())).await
    }

    async fn migrate(&self) -> StoreResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn joined(&self, user_id: Option<&str>) -> StoreResult<Vec<ResponseRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(JOINED_RESPONSES);
        if let Some(user_id) = user_id {
            qb.push(r#" WHERE s."user_id" = "#).push_bind(user_id);
        }
        qb.push(r#" ORDER BY r.rowid"#);
        let rows = qb.build().fetch_all(&self.pool).await?;

        let total = rows.len();
        let out: Vec<ResponseRow> = rows.iter().filter_map(response_row).collect();
        if out.len() < total {
            tracing::debug!(skipped = total - out.len(), "skipped malformed response rows");
        }
        Ok(out)
    }
}

fn sqlite_file_path(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    (!path.is_empty()).then(|| Path::new(path))
}

fn encode_time(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn decode_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn question_row(row: &SqliteRow) -> Option<Question> {
    let difficulty: String = row.try_get("difficulty").ok()?;
    let content: String = row.try_get("content").unwrap_or_else(|_| "{}".to_string());
    Some(Question {
        question_id: row.try_get("question_id").ok()?,
        theme: row.try_get("theme").ok()?,
        difficulty: Difficulty::parse(&difficulty)?,
        content: serde_json::from_str::<Map<String, Value>>(&content).unwrap_or_default(),
    })
}

fn response_row(row: &SqliteRow) -> Option<ResponseRow> {
    let difficulty: String = row.try_get("difficulty").ok()?;
    Some(ResponseRow {
        user_id: row.try_get("user_id").ok()?,
        session_id: row.try_get("session_id").ok()?,
        question_id: row.try_get("question_id").ok()?,
        theme: row.try_get("theme").ok()?,
        difficulty: Difficulty::parse(&difficulty)?,
        is_correct: row.try_get::<i64, _>("is_correct").ok()? != 0,
        response_time_ms: row.try_get("response_time_ms").ok().flatten(),
        answered_at: decode_time(row.try_get("answered_at").ok().flatten()),
    })
}

impl QuizStore for SqliteStore {
    async fn questions(&self, filter: &QuestionFilter) -> StoreResult<Vec<Question>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"SELECT "question_id", "theme", "difficulty", "content" FROM "questions" WHERE 1 = 1"#,
        );
        if let Some(d) = filter.difficulty {
            qb.push(r#" AND "difficulty" = "#).push_bind(d.as_str());
        }
        if let Some(themes) = &filter.themes {
            if themes.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(r#" AND "theme" IN ("#);
            let mut sep = qb.separated(", ");
            for t in themes {
                sep.push_bind(t.clone());
            }
            sep.push_unseparated(")");
        }
        qb.push(" ORDER BY rowid");
        // exclusions grow with history and are applied in memory, so the
        // limit can only go to SQL when there are none
        if let (Some(n), true) = (filter.limit, filter.exclude.is_empty()) {
            qb.push(" LIMIT ").push_bind(n as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .filter_map(question_row)
            .filter(|q| !filter.exclude.contains(&q.question_id))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn skill_pairs(&self) -> StoreResult<Vec<(String, Difficulty)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as(r#"SELECT DISTINCT "theme", "difficulty" FROM "questions""#)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(theme, d)| Difficulty::parse(&d).map(|d| (theme, d)))
            .collect())
    }

    async fn session_documents(&self, user_id: &str) -> StoreResult<Vec<Value>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"SELECT "document" FROM "user_sessions" WHERE "user_id" = $1 ORDER BY rowid"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let total = rows.len();
        let docs: Vec<Value> = rows
            .into_iter()
            .filter_map(|(raw,)| serde_json::from_str(&raw).ok())
            .collect();
        if docs.len() < total {
            tracing::debug!(user_id, skipped = total - docs.len(), "skipped unreadable session documents");
        }
        Ok(docs)
    }

    async fn user_responses(&self, user_id: &str) -> StoreResult<Vec<ResponseRow>> {
        self.joined(Some(user_id)).await
    }

    async fn all_responses(&self) -> StoreResult<Vec<ResponseRow>> {
        self.joined(None).await
    }

    async fn insert_questions(&self, questions: &[Question]) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for q in questions {
            let content = serde_json::to_string(&q.content)?;
            let result = sqlx::query(
                r#"INSERT OR IGNORE INTO "questions" ("question_id", "theme", "difficulty", "content") VALUES ($1, $2, $3, $4)"#,
            )
            .bind(&q.question_id)
            .bind(&q.theme)
            .bind(q.difficulty.as_str())
            .bind(content)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn insert_session(&self, document: Value) -> StoreResult<bool> {
        let (session_id, user_id) = session_keys(&document)?;
        let raw = serde_json::to_string(&document)?;
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO "user_sessions" ("user_session_id", "user_id", "document") VALUES ($1, $2, $3)"#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_responses(&self, responses: &[ResponseRecord]) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for r in responses {
            let result = sqlx::query(
                r#"INSERT OR IGNORE INTO "responses" ("response_id", "session_id", "question_id", "is_correct", "response_time_ms", "answered_at") VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(&r.response_id)
            .bind(&r.session_id)
            .bind(&r.question_id)
            .bind(r.is_correct as i64)
            .bind(r.response_time_ms)
            .bind(encode_time(&r.answered_at))
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_path_is_extracted_from_url() {
        assert_eq!(sqlite_file_path("sqlite:/tmp/a/engine.db"), Some(Path::new("/tmp/a/engine.db")));
        assert_eq!(sqlite_file_path("sqlite://data.db?mode=rwc"), Some(Path::new("data.db")));
        assert_eq!(sqlite_file_path("postgres://x"), None);
    }

    #[test]
    fn timestamps_survive_text_encoding() {
        let t = DateTime::parse_from_rfc3339("2024-03-01T10:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(decode_time(encode_time(&Some(t))), Some(t));
        assert_eq!(encode_time(&None), None);
    }
}
