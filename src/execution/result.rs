//! Query Result - tabular output of an executed statement

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in select order
    pub columns: Vec<String>,

    /// Rows in result order, each aligned with `columns`
    pub rows: Vec<Vec<Value>>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, execution_time_ms: u64) -> Self {
        Self {
            columns,
            rows,
            execution_time_ms,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `limit` rows keyed by column name.
    pub fn preview(&self, limit: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }
}

/// Converts a SQLite value to JSON. Blobs become lowercase hex.
pub fn sqlite_value_to_json(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as SqlValue;

    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value as SqlValue;
    use serde_json::json;

    #[test]
    fn test_preview_is_record_oriented_and_bounded() {
        let result = QueryResult::new(
            vec!["category".to_string(), "units".to_string()],
            vec![
                vec![json!("books"), json!(3)],
                vec![json!("games"), json!(7)],
                vec![json!("toys"), json!(1)],
            ],
            2,
        );

        let preview = result.preview(2);
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[1]["category"], json!("games"));
        assert_eq!(preview[1]["units"], json!(7));
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(sqlite_value_to_json(SqlValue::Null), Value::Null);
        assert_eq!(sqlite_value_to_json(SqlValue::Integer(4)), json!(4));
        assert_eq!(sqlite_value_to_json(SqlValue::Real(2.5)), json!(2.5));
        assert_eq!(sqlite_value_to_json(SqlValue::Text("x".into())), json!("x"));
        assert_eq!(
            sqlite_value_to_json(SqlValue::Blob(vec![0x0a, 0xff])),
            json!("0aff")
        );
    }
}
