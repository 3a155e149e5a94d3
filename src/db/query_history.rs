//! Query history - append-only per-session turn log
//!
//! Turns are never updated in place; a session is either appended to or
//! cleared as a whole. The SQLite store serializes access through one
//! connection, so concurrent appends (same session or not) each land as a
//! complete row with a distinct autoincrement id, which fixes their order.

use crate::error::{CopilotError, Result};
use crate::llm::{QueryPlan, Refinement};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const QUESTION_BUDGET: usize = 220;
const SQL_BUDGET: usize = 220;
const INSIGHT_BUDGET: usize = 240;

/// One immutable question-to-result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub timestamp: DateTime<Utc>,
    /// Question text the plan was generated for
    pub question: String,
    pub question_original: String,
    pub question_refined: String,
    pub refinement: Option<Refinement>,
    pub plan: Option<QueryPlan>,
    /// Admitted SQL on success, otherwise whatever text was attempted
    pub sql: Option<String>,
    pub result_preview: Option<Vec<Map<String, Value>>>,
    pub error: Option<String>,
}

impl Turn {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Turns of `session_id`, oldest first; empty for unknown sessions.
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>>;

    /// Durably appends one turn before returning.
    async fn append(&self, session_id: &str, turn: &Turn) -> Result<()>;

    /// Irreversibly deletes every turn of `session_id`.
    async fn clear(&self, session_id: &str) -> Result<()>;

    async fn sessions(&self) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| CopilotError::SessionStore(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| CopilotError::SessionStore(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                turn_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_session_turns_session
                ON session_turns(session_id, id);
            "#,
        )
        .map_err(|e| CopilotError::SessionStore(format!("Failed to create table: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CopilotError::SessionStore("connection lock poisoned".to_string()))?;
            task(&mut *guard)
        })
        .await
        .map_err(|e| CopilotError::SessionStore(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut statement = conn
                .prepare("SELECT turn_json FROM session_turns WHERE session_id = ?1 ORDER BY id")
                .map_err(|e| CopilotError::SessionStore(e.to_string()))?;
            let rows = statement
                .query_map(params![session_id], |row| row.get::<usize, String>(0))
                .map_err(|e| CopilotError::SessionStore(e.to_string()))?;

            let mut turns = Vec::new();
            for row in rows {
                let json = row.map_err(|e| CopilotError::SessionStore(e.to_string()))?;
                turns.push(serde_json::from_str(&json)?);
            }
            Ok(turns)
        })
        .await
    }

    async fn append(&self, session_id: &str, turn: &Turn) -> Result<()> {
        let session_id = session_id.to_string();
        let recorded_at = turn.timestamp.to_rfc3339();
        let json = serde_json::to_string(turn)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO session_turns (session_id, recorded_at, turn_json) VALUES (?1, ?2, ?3)",
                params![session_id, recorded_at, json],
            )
            .map_err(|e| CopilotError::SessionStore(format!("Failed to append turn: {}", e)))?;
            info!("Appended turn to session {}", session_id);
            Ok(())
        })
        .await
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM session_turns WHERE session_id = ?1",
                    params![session_id],
                )
                .map_err(|e| CopilotError::SessionStore(e.to_string()))?;
            info!("Cleared session {} ({} turns)", session_id, removed);
            Ok(())
        })
        .await
    }

    async fn sessions(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut statement = conn
                .prepare(
                    "SELECT session_id FROM session_turns
                     GROUP BY session_id ORDER BY MAX(id) DESC",
                )
                .map_err(|e| CopilotError::SessionStore(e.to_string()))?;
            let ids = statement
                .query_map([], |row| row.get::<usize, String>(0))
                .map_err(|e| CopilotError::SessionStore(e.to_string()))?;
            ids.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CopilotError::SessionStore(e.to_string()))
        })
        .await
    }
}

/// Compact digest of the last `max_items` turns for the collaborator prompt.
/// Each field is cut to a fixed character budget; older turns are omitted.
pub fn summarize_for_context(turns: &[Turn], max_items: usize) -> String {
    let start = turns.len().saturating_sub(max_items);
    turns[start..]
        .iter()
        .map(|turn| {
            let question = if turn.question_refined.is_empty() {
                &turn.question
            } else {
                &turn.question_refined
            };
            let sql = turn.sql.as_deref().unwrap_or_default().replace('\n', " ");
            let insight = turn
                .plan
                .as_ref()
                .map(|plan| plan.explain.as_str())
                .unwrap_or_default();
            format!(
                "- Q: {}\n  SQL: {}\n  Insight: {}",
                truncate_chars(question, QUESTION_BUDGET),
                truncate_chars(&sql, SQL_BUDGET),
                truncate_chars(insight, INSIGHT_BUDGET)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::VizSuggestion;
    use serde_json::json;

    fn turn(question: &str, error: Option<&str>) -> Turn {
        let mut row = Map::new();
        row.insert("category".to_string(), json!("books"));
        row.insert("units".to_string(), json!(12));
        Turn {
            timestamp: Utc::now(),
            question: question.to_string(),
            question_original: question.to_string(),
            question_refined: question.to_string(),
            refinement: Some(Refinement {
                refined_question: question.to_string(),
                clarifications: vec!["which year?".to_string()],
                assumptions: vec![],
                confidence: 0.8,
            }),
            plan: Some(QueryPlan {
                sql: "SELECT category FROM products".to_string(),
                explain: "Units per category".to_string(),
                viz_suggestion: VizSuggestion {
                    kind: "bar".to_string(),
                    extra: Map::new(),
                },
                notes: String::new(),
            }),
            sql: Some("SELECT category\nFROM products LIMIT 1000".to_string()),
            result_preview: error.is_none().then(|| vec![row]),
            error: error.map(str::to_string),
        }
    }

    fn store() -> (tempfile::TempDir, SqliteSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("nested/sessions.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let (_dir, store) = store();
        assert!(store.load("never-written").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_load_round_trip() {
        let (_dir, store) = store();
        let written = vec![
            turn("sales by month", None),
            turn("sales by category", Some("Execution error: no such column: x")),
            turn("top products", None),
        ];
        for t in &written {
            store.append("s1", t).await.unwrap();
        }
        store.append("other", &turn("unrelated", None)).await.unwrap();

        assert_eq!(store.load("s1").await.unwrap(), written);
    }

    #[tokio::test]
    async fn test_clear_only_affects_one_session() {
        let (_dir, store) = store();
        store.append("a", &turn("q1", None)).await.unwrap();
        store.append("b", &turn("q2", None)).await.unwrap();

        store.clear("a").await.unwrap();

        assert!(store.load("a").await.unwrap().is_empty());
        assert_eq!(store.load("b").await.unwrap().len(), 1);
        assert_eq!(store.sessions().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_to_one_session_are_all_kept() {
        let (_dir, store) = store();
        let mut handles = Vec::new();
        for i in 0..24 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("shared", &turn(&format!("q{}", i), None)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let turns = store.load("shared").await.unwrap();
        assert_eq!(turns.len(), 24);
        let mut questions: Vec<String> = turns.into_iter().map(|t| t.question).collect();
        questions.sort();
        questions.dedup();
        assert_eq!(questions.len(), 24);
    }

    #[test]
    fn test_digest_keeps_last_items_and_truncates() {
        let mut long = turn(&"x".repeat(500), None);
        long.question_refined = "é".repeat(300);
        let turns = vec![turn("first", None), turn("second", None), long];

        let digest = summarize_for_context(&turns, 2);
        assert!(!digest.contains("first"));
        assert!(digest.starts_with("- Q: second\n  SQL: SELECT category FROM products LIMIT 1000"));
        assert!(digest.contains(&format!("- Q: {}\n", "é".repeat(220))));
        assert!(digest.contains("  Insight: Units per category"));
    }

    #[test]
    fn test_digest_of_empty_history() {
        assert_eq!(summarize_for_context(&[], 4), "");
    }
}
