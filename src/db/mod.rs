//! Database access for the analytical SQLite file and the session history
//!
//! Connections to the analytical database are opened read-only and scoped to
//! a single call.

pub mod introspector;
pub mod query_history;

pub use introspector::{ColumnInfo, ForeignKey, SchemaDescription, SchemaIntrospector};
pub use query_history::{summarize_for_context, SessionStore, SqliteSessionStore, Turn};

use crate::error::{CopilotError, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Opens `path` read-only. Never creates the file.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        CopilotError::Execution(format!(
            "failed to open database {}: {}",
            path.display(),
            e
        ))
    })
}

/// Double-quotes an identifier for direct interpolation into SQLite text.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("orders"), "\"orders\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
