//! Schema introspection over `sqlite_master` and `PRAGMA` metadata
//!
//! Table and column listing is strict. Foreign-key edges are best effort: a
//! table whose key list cannot be read contributes no edges.

use crate::db::{open_read_only, quote_identifier};
use crate::error::{CopilotError, Result};
use crate::execution::sqlite_engine::collect_rows;
use crate::execution::QueryResult;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
}

/// `from_table.from_column -> to_table.to_column`. A `None` target column
/// refers to the target table's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: Option<String>,
}

/// Immutable snapshot of the database structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl SchemaDescription {
    pub fn table(&self, name: &str) -> Option<&[ColumnInfo]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct SchemaIntrospector {
    db_path: PathBuf,
}

impl SchemaIntrospector {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub async fn describe(&self) -> Result<SchemaDescription> {
        let db_path = self.db_path.clone();
        run_blocking(move || {
            let conn = open_read_only(&db_path).map_err(as_schema)?;
            describe_schema(&conn)
        })
        .await
    }

    pub async fn row_count(&self, table: &str) -> Result<u64> {
        let db_path = self.db_path.clone();
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        run_blocking(move || {
            let conn = open_read_only(&db_path).map_err(as_schema)?;
            conn.query_row(&sql, [], |row| row.get::<usize, i64>(0))
                .map(|n| n.max(0) as u64)
                .map_err(|e| CopilotError::Schema(e.to_string()))
        })
        .await
    }

    pub async fn sample_rows(&self, table: &str, n: usize) -> Result<QueryResult> {
        let db_path = self.db_path.clone();
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), n);
        run_blocking(move || {
            let conn = open_read_only(&db_path).map_err(as_schema)?;
            collect_rows(&conn, &sql).map_err(as_schema)
        })
        .await
    }
}

fn describe_schema(conn: &Connection) -> Result<SchemaDescription> {
    describe_schema_with(conn, foreign_keys)
}

/// Foreign-key edges come from `read_keys`; a table whose keys fail to
/// load contributes none.
fn describe_schema_with<K>(conn: &Connection, read_keys: K) -> Result<SchemaDescription>
where
    K: Fn(&Connection, &str) -> rusqlite::Result<Vec<ForeignKey>>,
{
    let mut schema = SchemaDescription::default();

    for table in list_tables(conn)? {
        let columns = table_columns(conn, &table)?;
        match read_keys(conn, &table) {
            Ok(edges) => schema.foreign_keys.extend(edges),
            Err(e) => warn!("Skipping foreign keys of {}: {}", table, e),
        }
        schema.tables.insert(table, columns);
    }

    debug!(
        "Introspected {} tables, {} foreign keys",
        schema.tables.len(),
        schema.foreign_keys.len()
    );
    Ok(schema)
}

fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut statement = conn
        .prepare(
            r"SELECT name FROM sqlite_master
              WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
              ORDER BY name",
        )
        .map_err(|e| CopilotError::Schema(e.to_string()))?;
    let names = statement
        .query_map([], |row| row.get::<usize, String>(0))
        .map_err(|e| CopilotError::Schema(e.to_string()))?;
    names
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CopilotError::Schema(e.to_string()))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let pragma = format!("PRAGMA table_info({})", quote_identifier(table));
    let mut statement = conn
        .prepare(&pragma)
        .map_err(|e| CopilotError::Schema(format!("columns of {}: {}", table, e)))?;
    let columns = statement
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get::<usize, String>(1)?,
                declared_type: row.get::<usize, Option<String>>(2)?.unwrap_or_default(),
            })
        })
        .map_err(|e| CopilotError::Schema(format!("columns of {}: {}", table, e)))?;
    columns
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CopilotError::Schema(format!("columns of {}: {}", table, e)))
}

fn foreign_keys(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ForeignKey>> {
    let pragma = format!("PRAGMA foreign_key_list({})", quote_identifier(table));
    let mut statement = conn.prepare(&pragma)?;
    let edges = statement.query_map([], |row| {
        Ok(ForeignKey {
            from_table: table.to_string(),
            to_table: row.get::<usize, String>(2)?,
            from_column: row.get::<usize, String>(3)?,
            to_column: row.get::<usize, Option<String>>(4)?,
        })
    })?;
    edges.collect()
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| CopilotError::Schema(format!("introspection task failed: {}", e)))?
}

fn as_schema(error: CopilotError) -> CopilotError {
    match error {
        CopilotError::Schema(_) => error,
        other => CopilotError::Schema(other.to_string()),
    }
}
