//! nf-trace: Execution trace storage backed by SQLite.

pub mod export;
pub mod query;
pub mod store;

pub use export::{export_json, export_run_json};
pub use query::TraceQuery;
pub use store::TraceStore;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("database error: {0}")]
    Database(String),
    #[error("run not found: {0}")]
    RunNotFound(Uuid),
    #[error("export error: {0}")]
    Export(String),
}

impl From<rusqlite::Error> for TraceError {
    fn from(e: rusqlite::Error) -> Self {
        TraceError::Database(e.to_string())
    }
}
