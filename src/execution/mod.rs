pub mod result;
pub mod sqlite_engine;

pub use result::QueryResult;
pub use sqlite_engine::QueryExecutor;
