//! SQLite execution engine
//!
//! Runs gateway-admitted statements on a read-only connection that lives for
//! exactly one call. Engine errors are returned as-is, never retried.

use crate::db::open_read_only;
use crate::error::{CopilotError, Result};
use crate::execution::result::{sqlite_value_to_json, QueryResult};
use crate::gateway::ValidatedSql;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    db_path: PathBuf,
}

impl QueryExecutor {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn execute(&self, sql: &ValidatedSql) -> Result<QueryResult> {
        let db_path = self.db_path.clone();
        let sql = sql.as_str().to_owned();

        let result = tokio::task::spawn_blocking(move || -> Result<QueryResult> {
            let conn = open_read_only(&db_path).map_err(as_execution)?;
            collect_rows(&conn, &sql)
        })
        .await
        .map_err(|e| CopilotError::Execution(format!("query task failed: {}", e)))??;

        info!(
            "Query returned {} rows in {}ms",
            result.row_count(),
            result.execution_time_ms
        );
        Ok(result)
    }
}

/// Runs `sql` on `conn` and materializes every row.
pub(crate) fn collect_rows(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let started = Instant::now();

    let mut statement = conn
        .prepare(sql)
        .map_err(|e| CopilotError::Execution(e.to_string()))?;
    let columns: Vec<String> = statement
        .column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut rows = statement
        .query([])
        .map_err(|e| CopilotError::Execution(e.to_string()))?;
    let mut collected = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| CopilotError::Execution(e.to_string()))?
    {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            let value = row
                .get::<usize, rusqlite::types::Value>(index)
                .map_err(|e| CopilotError::Execution(e.to_string()))?;
            values.push(sqlite_value_to_json(value));
        }
        collected.push(values);
    }

    Ok(QueryResult::new(
        columns,
        collected,
        started.elapsed().as_millis() as u64,
    ))
}

fn as_execution(error: CopilotError) -> CopilotError {
    match error {
        CopilotError::Execution(_) => error,
        other => CopilotError::Execution(other.to_string()),
    }
}
