//! SQL Safety Gateway
//!
//! Trust boundary between collaborator-proposed SQL and the database.
//! Admission runs fence/comment/terminator stripping, the textual
//! single-statement check, a SQLite-dialect parse, the denylist walk and
//! finally row-limit injection. Nothing here touches the database.

pub mod policy;
pub mod sanitize;

pub use policy::{find_denied, DeniedOperation};
pub use sanitize::sanitize;

use crate::error::{CopilotError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::fmt;
use tracing::{debug, warn};

pub const DEFAULT_ROW_LIMIT: usize = 1000;

pub const MULTIPLE_STATEMENTS: &str = "multiple statements not permitted";
pub const EMPTY_STATEMENT: &str = "no SQL statement found";

lazy_static! {
    static ref LIMIT_KEYWORD: Regex = Regex::new(r"(?i)\bLIMIT\b").expect("limit pattern");
}

/// SQL that passed every gateway stage. Only the gateway constructs it, so
/// the executor cannot be handed unvalidated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SqlGateway {
    max_rows: usize,
}

impl SqlGateway {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Sanitizes, checks, parses and policy-checks `raw`, returning the
    /// sanitized single statement without any limit applied.
    pub fn validate(&self, raw: &str) -> Result<String> {
        self.check(raw).map(|(sql, _)| sql)
    }

    fn check(&self, raw: &str) -> Result<(String, Statement)> {
        let sql = sanitize(raw);
        if sql.is_empty() {
            return Err(reject(CopilotError::Sanitization(EMPTY_STATEMENT.to_string())));
        }

        // Textual and deliberately strict: a ';' inside a string literal is
        // also refused.
        if sql.contains(';') {
            return Err(reject(CopilotError::Sanitization(
                MULTIPLE_STATEMENTS.to_string(),
            )));
        }

        let mut statements = Parser::parse_sql(&SQLiteDialect {}, &sql)
            .map_err(|e| reject(CopilotError::Parse(e.to_string())))?;
        match statements.len() {
            0 => return Err(reject(CopilotError::Sanitization(EMPTY_STATEMENT.to_string()))),
            1 => {}
            _ => {
                return Err(reject(CopilotError::Sanitization(
                    MULTIPLE_STATEMENTS.to_string(),
                )))
            }
        }

        if let Some(operation) = find_denied(&statements) {
            return Err(reject(CopilotError::Policy(operation)));
        }

        match statements.pop() {
            Some(statement) => Ok((sql, statement)),
            None => Err(reject(CopilotError::Sanitization(EMPTY_STATEMENT.to_string()))),
        }
    }

    /// Appends `LIMIT <max_rows>` unless a limit keyword is already present.
    /// An existing limit is never lowered or rewritten.
    pub fn enforce_limit(&self, sql: &str) -> String {
        if LIMIT_KEYWORD.is_match(sql) {
            return sql.to_string();
        }
        format!("{} LIMIT {}", sql.trim(), self.max_rows)
    }

    /// Full admission: validation followed by limit injection. Only queries
    /// get a limit; other admitted statements (`EXPLAIN`, `SHOW`) pass as is.
    pub fn admit(&self, raw: &str) -> Result<ValidatedSql> {
        let (sql, statement) = self.check(raw)?;
        let bounded = match statement {
            Statement::Query(_) => self.enforce_limit(&sql),
            _ => sql,
        };
        debug!("Admitted SQL: {}", bounded);
        Ok(ValidatedSql(bounded))
    }
}

impl Default for SqlGateway {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_LIMIT)
    }
}

fn reject(error: CopilotError) -> CopilotError {
    warn!("Gateway rejected SQL: {}", error);
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> SqlGateway {
        SqlGateway::new(1000)
    }

    #[test]
    fn test_second_statement_rejected_before_parse() {
        let err = gateway().admit("DELETE FROM orders; SELECT 1").unwrap_err();
        assert!(matches!(err, CopilotError::Sanitization(_)));
        assert_eq!(err.to_string(), MULTIPLE_STATEMENTS);
    }

    #[test]
    fn test_second_statement_after_any_read() {
        let firsts = [
            "SELECT 1",
            "SELECT * FROM orders WHERE quantity > 2",
            "WITH t AS (SELECT 1) SELECT * FROM t",
        ];
        for first in firsts {
            let raw = format!("{}; DROP TABLE orders", first);
            let err = gateway().admit(&raw).unwrap_err();
            assert_eq!(err.to_string(), MULTIPLE_STATEMENTS, "for {}", first);
        }
    }

    #[test]
    fn test_terminator_inside_literal_is_rejected() {
        let err = gateway().admit("SELECT 'a;b' FROM orders").unwrap_err();
        assert!(matches!(err, CopilotError::Sanitization(_)));
    }

    #[test]
    fn test_drop_is_policy_rejection() {
        let err = gateway().admit("DROP TABLE customers").unwrap_err();
        assert!(matches!(err, CopilotError::Policy(DeniedOperation::Drop)));
        assert!(err.to_string().starts_with("operation not permitted"));
    }

    #[test]
    fn test_mutation_nested_in_cte_is_rejected() {
        let err = gateway()
            .admit("WITH src AS (SELECT 1 AS id) INSERT INTO orders (order_id) SELECT id FROM src")
            .unwrap_err();
        assert!(matches!(err, CopilotError::Policy(DeniedOperation::Insert)));
    }

    #[test]
    fn test_rare_schema_changes_are_policy_rejections() {
        let err = gateway().admit("ALTER VIEW v AS SELECT 1").unwrap_err();
        assert!(matches!(err, CopilotError::Policy(DeniedOperation::Alter)));

        let err = gateway().admit("DROP FUNCTION f").unwrap_err();
        assert!(matches!(err, CopilotError::Policy(DeniedOperation::Drop)));
    }

    #[test]
    fn test_transaction_control_is_rejected() {
        let err = gateway().admit("BEGIN").unwrap_err();
        assert!(matches!(err, CopilotError::Policy(DeniedOperation::Transaction)));
    }

    #[test]
    fn test_limit_only_added_to_queries() {
        let admitted = gateway().admit("EXPLAIN SELECT * FROM orders").unwrap();
        assert_eq!(admitted.as_str(), "EXPLAIN SELECT * FROM orders");
    }

    #[test]
    fn test_pragma_is_rejected() {
        let err = gateway().admit("PRAGMA table_info(orders)").unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn test_unparseable_admin_commands_are_rejected() {
        for raw in ["VACUUM", "DETACH DATABASE other", "REINDEX orders"] {
            let err = gateway().admit(raw).unwrap_err();
            assert!(err.is_rejection(), "{} was admitted", raw);
        }
    }

    #[test]
    fn test_parse_failure_carries_diagnostic() {
        let err = gateway().admit("SELEC * FROM orders").unwrap_err();
        assert!(matches!(err, CopilotError::Parse(_)));
        assert!(err.to_string().starts_with("invalid SQL: "));
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = gateway().admit("```sql\n-- nothing here\n```").unwrap_err();
        assert!(matches!(err, CopilotError::Sanitization(_)));
    }

    #[test]
    fn test_limit_injected_once() {
        let admitted = gateway()
            .admit("```sql\nSELECT category FROM products;\n```")
            .unwrap();
        assert_eq!(admitted.as_str(), "SELECT category FROM products LIMIT 1000");
        assert_eq!(admitted.as_str().matches("LIMIT").count(), 1);
    }

    #[test]
    fn test_existing_limit_preserved() {
        let admitted = gateway().admit("select * from orders limit 5").unwrap();
        assert_eq!(admitted.as_str(), "select * from orders limit 5");
    }

    #[test]
    fn test_configured_ceiling_used() {
        let admitted = SqlGateway::new(50).admit("SELECT 1").unwrap();
        assert_eq!(admitted.as_str(), "SELECT 1 LIMIT 50");
    }
}
