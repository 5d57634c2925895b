pub mod execution_store;
pub mod repository;
pub mod workflow_store;

pub use execution_store::ExecutionStore;
pub use repository::{SqliteRepository, WorkflowRepository};
pub use workflow_store::WorkflowStore;

use chrono::{DateTime, TimeZone, Utc};

/// Timestamps are stored as epoch milliseconds.
pub(crate) fn millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|v| Utc.timestamp_millis_opt(v).single())
}
