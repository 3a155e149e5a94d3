//! Statement-kind denylist
//!
//! Every statement in the parse tree is checked, including statements nested
//! inside another one (`WITH ... INSERT`, `EXPLAIN DELETE`). Commands the
//! SQLite dialect cannot parse (VACUUM, DETACH, REINDEX) never get here: they
//! fail at the parse stage.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{visit_statements, Statement};
use std::fmt;
use std::ops::ControlFlow;

/// Operation kinds that may not appear anywhere in an admitted statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeniedOperation {
    Insert,
    Update,
    Delete,
    Merge,
    Truncate,
    Create,
    Alter,
    Drop,
    Pragma,
    Attach,
    Analyze,
    Copy,
    Grant,
    Revoke,
    Transaction,
}

impl DeniedOperation {
    /// Maps a single statement node to its denylist entry, if any.
    pub fn of(statement: &Statement) -> Option<Self> {
        let operation = match statement {
            Statement::Insert { .. } => Self::Insert,
            Statement::Update { .. } => Self::Update,
            Statement::Delete { .. } => Self::Delete,
            Statement::Merge { .. } => Self::Merge,
            Statement::Truncate { .. } => Self::Truncate,
            Statement::CreateTable { .. }
            | Statement::CreateView { .. }
            | Statement::CreateIndex { .. }
            | Statement::CreateVirtualTable { .. }
            | Statement::CreateSchema { .. }
            | Statement::CreateDatabase { .. }
            | Statement::CreateFunction { .. }
            | Statement::CreateRole { .. }
            | Statement::CreateSequence { .. }
            | Statement::CreateProcedure { .. }
            | Statement::CreateMacro { .. }
            | Statement::CreateStage { .. }
            | Statement::CreateType { .. } => Self::Create,
            Statement::AlterTable { .. }
            | Statement::AlterIndex { .. }
            | Statement::AlterView { .. }
            | Statement::AlterRole { .. } => Self::Alter,
            Statement::Drop { .. } | Statement::DropFunction { .. } => Self::Drop,
            Statement::Pragma { .. } => Self::Pragma,
            Statement::AttachDatabase { .. } => Self::Attach,
            Statement::Analyze { .. } => Self::Analyze,
            Statement::Copy { .. }
            | Statement::CopyIntoSnowflake { .. }
            | Statement::Directory { .. } => Self::Copy,
            Statement::Grant { .. } => Self::Grant,
            Statement::Revoke { .. } => Self::Revoke,
            Statement::StartTransaction { .. }
            | Statement::SetTransaction { .. }
            | Statement::Commit { .. }
            | Statement::Rollback { .. }
            | Statement::Savepoint { .. } => Self::Transaction,
            _ => return None,
        };
        Some(operation)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Merge => "MERGE",
            Self::Truncate => "TRUNCATE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Pragma => "PRAGMA",
            Self::Attach => "ATTACH",
            Self::Analyze => "ANALYZE",
            Self::Copy => "COPY",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Transaction => "TRANSACTION",
        }
    }
}

impl fmt::Display for DeniedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Returns the first denied operation found anywhere in the statements.
pub fn find_denied(statements: &[Statement]) -> Option<DeniedOperation> {
    statements.iter().find_map(|root| {
        let flow = visit_statements(root, |statement| match DeniedOperation::of(statement) {
            Some(operation) => ControlFlow::Break(operation),
            None => ControlFlow::Continue(()),
        });
        match flow {
            ControlFlow::Break(operation) => Some(operation),
            ControlFlow::Continue(()) => None,
        }
    })
}
