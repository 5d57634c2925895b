use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::execution::ExecutionRecord;
use crate::workflow::context::ExecutionStatus;

const SELECT_COLUMNS: &str = "SELECT id, workflow_id, owner_id, status, phase_results, duration_ms, \
     initial_input, final_output, error_message, completed_phases, total_phases, progress_percent, \
     tags, metadata, created_at, updated_at, completed_at FROM workflow_executions";

#[derive(Clone)]
pub struct ExecutionStore {
    db: Database,
}

impl ExecutionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or overwrite the record for an execution id.
    pub async fn upsert(&self, record: &ExecutionRecord) -> Result<(), ServerError> {
        let r = record.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_executions (id, workflow_id, owner_id, status, phase_results, \
                     duration_ms, initial_input, final_output, error_message, completed_phases, total_phases, \
                     progress_percent, tags, metadata, created_at, updated_at, completed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                     ON CONFLICT(id) DO UPDATE SET
                       status = excluded.status,
                       phase_results = excluded.phase_results,
                       duration_ms = excluded.duration_ms,
                       final_output = excluded.final_output,
                       error_message = excluded.error_message,
                       completed_phases = excluded.completed_phases,
                       total_phases = excluded.total_phases,
                       progress_percent = excluded.progress_percent,
                       metadata = excluded.metadata,
                       updated_at = excluded.updated_at,
                       completed_at = excluded.completed_at",
                    rusqlite::params![
                        r.id,
                        r.workflow_id,
                        r.owner_id,
                        r.status.as_str(),
                        serde_json::to_string(&r.phase_results).unwrap_or_else(|_| "[]".into()),
                        r.duration_ms as i64,
                        r.initial_input.to_string(),
                        r.final_output.as_ref().map(|v| v.to_string()),
                        r.error_message,
                        r.completed_phases,
                        r.total_phases,
                        r.progress_percent,
                        serde_json::to_string(&r.tags).unwrap_or_else(|_| "[]".into()),
                        serde_json::to_string(&r.metadata).unwrap_or_else(|_| "{}".into()),
                        r.created_at.timestamp_millis(),
                        r.updated_at.timestamp_millis(),
                        r.completed_at.map(|t| t.timestamp_millis()),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ExecutionRecord>, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    rusqlite::params![id],
                    |row| Ok(row_to_record(row)),
                )
                .optional()
            })
            .await
    }

    pub async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, ServerError> {
        let wf = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE workflow_id = ?1 ORDER BY created_at DESC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![wf], |row| Ok(row_to_record(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> ExecutionRecord {
    let json_col = |idx: usize| -> Option<String> { row.get(idx).unwrap_or(None) };
    let status: String = row.get(3).unwrap_or_default();

    ExecutionRecord {
        id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        owner_id: row.get(2).unwrap_or(None),
        status: status.parse().unwrap_or(ExecutionStatus::Failed),
        phase_results: json_col(4)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        duration_ms: row.get::<_, i64>(5).unwrap_or(0).max(0) as u64,
        initial_input: json_col(6)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        final_output: json_col(7).and_then(|s| serde_json::from_str(&s).ok()),
        error_message: row.get(8).unwrap_or(None),
        completed_phases: row.get(9).unwrap_or(0),
        total_phases: row.get(10).unwrap_or(0),
        progress_percent: row.get(11).unwrap_or(0),
        tags: json_col(12)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        metadata: json_col(13)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        created_at: super::millis_to_datetime(row.get(14).ok()).unwrap_or_else(chrono::Utc::now),
        updated_at: super::millis_to_datetime(row.get(15).ok()).unwrap_or_else(chrono::Utc::now),
        completed_at: super::millis_to_datetime(row.get(16).unwrap_or(None)),
    }
}
