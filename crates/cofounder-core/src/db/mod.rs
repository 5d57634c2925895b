//! SQLite database layer for the co-founder backend.
//!
//! Connections come from an r2d2 pool over a WAL-mode database, so
//! concurrent readers and finishing executions do not queue behind one
//! connection. All database operations are executed via
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::ServerError;

/// Connections kept by a file-backed database.
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Thread-safe, cloneable handle to a pooled SQLite database.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, ServerError> {
        Self::open_with_pool_size(db_path, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size(db_path: &str, pool_size: u32) -> Result<Self, ServerError> {
        if db_path == ":memory:" {
            return Self::open_in_memory();
        }

        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA busy_timeout=5000; PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;",
            )
        });
        let db = Self::from_manager(manager, pool_size.max(1))?;

        tracing::info!(pool_size, "SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    ///
    /// Every in-memory connection is its own database, so the pool holds one.
    pub fn open_in_memory() -> Result<Self, ServerError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON;"));
        Self::from_manager(manager, 1)
    }

    fn from_manager(manager: SqliteConnectionManager, size: u32) -> Result<Self, ServerError> {
        // Recycling a connection would drop an in-memory database with it.
        let pool = Pool::builder()
            .max_size(size)
            .max_lifetime(None)
            .idle_timeout(None)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .map_err(|e| ServerError::Database(format!("Failed to open database: {}", e)))?;

        let db = Self { pool };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with a pooled connection.
    /// Automatically handles checkout and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .pool
            .get()
            .map_err(|e| ServerError::Database(format!("No connection available: {}", e)))?;
        f(&conn).map_err(|e| ServerError::Database(e.to_string()))
    }

    /// Execute a closure with a pooled connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| ServerError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), ServerError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workflows (
                    id              TEXT PRIMARY KEY,
                    name            TEXT NOT NULL,
                    description     TEXT NOT NULL DEFAULT '',
                    owner_id        TEXT,
                    tags            TEXT NOT NULL DEFAULT '[]',
                    phases          TEXT NOT NULL DEFAULT '[]',
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_workflows_owner ON workflows(owner_id);

                CREATE TABLE IF NOT EXISTS workflow_executions (
                    id                  TEXT PRIMARY KEY,
                    workflow_id         TEXT NOT NULL,
                    owner_id            TEXT,
                    status              TEXT NOT NULL DEFAULT 'pending',
                    phase_results       TEXT NOT NULL DEFAULT '[]',
                    duration_ms         INTEGER NOT NULL DEFAULT 0,
                    initial_input       TEXT NOT NULL DEFAULT 'null',
                    final_output        TEXT,
                    error_message       TEXT,
                    completed_phases    INTEGER NOT NULL DEFAULT 0,
                    total_phases        INTEGER NOT NULL DEFAULT 0,
                    progress_percent    INTEGER NOT NULL DEFAULT 0,
                    tags                TEXT NOT NULL DEFAULT '[]',
                    metadata            TEXT NOT NULL DEFAULT '{}',
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL,
                    completed_at        INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_executions_workflow ON workflow_executions(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_executions_status ON workflow_executions(status);
                "
            )
        })?;
        self.run_migrations()
    }

    /// Apply incremental migrations for schema changes on existing databases.
    fn run_migrations(&self) -> Result<(), ServerError> {
        self.with_conn(|conn| {
            // Early databases predate completion timestamps; ignore "duplicate column".
            let _ = conn.execute(
                "ALTER TABLE workflow_executions ADD COLUMN completed_at INTEGER",
                [],
            );
            Ok(())
        })
    }
}
