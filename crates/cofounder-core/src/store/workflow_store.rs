use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::ServerError;
use crate::workflow::schema::WorkflowDefinition;

const SELECT_COLUMNS: &str =
    "SELECT id, name, description, owner_id, tags, phases, created_at, updated_at FROM workflows";

#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, workflow: &WorkflowDefinition) -> Result<(), ServerError> {
        let wf = workflow.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (id, name, description, owner_id, tags, phases, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET
                       name = excluded.name,
                       description = excluded.description,
                       owner_id = excluded.owner_id,
                       tags = excluded.tags,
                       phases = excluded.phases,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        wf.id,
                        wf.name,
                        wf.description,
                        wf.owner_id,
                        serde_json::to_string(&wf.tags).unwrap_or_else(|_| "[]".into()),
                        serde_json::to_string(&wf.phases).unwrap_or_else(|_| "[]".into()),
                        wf.created_at.timestamp_millis(),
                        wf.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorkflowDefinition>, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    rusqlite::params![id],
                    |row| Ok(row_to_workflow(row)),
                )
                .optional()
            })
            .await
    }

    /// Newest first; `owner_id` narrows to one user's workflows.
    pub async fn list(&self, owner_id: Option<&str>) -> Result<Vec<WorkflowDefinition>, ServerError> {
        let owner = owner_id.map(str::to_string);
        self.db
            .with_conn_async(move |conn| {
                let rows = match owner {
                    Some(owner) => {
                        let mut stmt = conn.prepare(&format!(
                            "{} WHERE owner_id = ?1 ORDER BY created_at DESC",
                            SELECT_COLUMNS
                        ))?;
                        let rows = stmt
                            .query_map(rusqlite::params![owner], |row| Ok(row_to_workflow(row)))?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt =
                            conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_COLUMNS))?;
                        let rows = stmt
                            .query_map([], |row| Ok(row_to_workflow(row)))?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ServerError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM workflows WHERE id = ?1", rusqlite::params![id])?;
                Ok(n > 0)
            })
            .await
    }
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> WorkflowDefinition {
    let tags: String = row.get(4).unwrap_or_default();
    let phases: String = row.get(5).unwrap_or_default();
    WorkflowDefinition {
        id: row.get(0).unwrap_or_default(),
        name: row.get(1).unwrap_or_default(),
        description: row.get(2).unwrap_or_default(),
        owner_id: row.get(3).unwrap_or(None),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        phases: serde_json::from_str(&phases).unwrap_or_default(),
        created_at: super::millis_to_datetime(row.get(6).ok()).unwrap_or_else(chrono::Utc::now),
        updated_at: super::millis_to_datetime(row.get(7).ok()).unwrap_or_else(chrono::Utc::now),
    }
}
