//! Shared application state for the axum server and the CLI.

use std::sync::Arc;

use crate::db::Database;
use crate::store::{SqliteRepository, WorkflowRepository};
use crate::workflow::{AgentRegistry, Coordinator, CoordinatorConfig, SpecialistLoader};

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub db: Database,
    pub repository: Arc<dyn WorkflowRepository>,
    pub specialists: SpecialistLoader,
    pub coordinator: Coordinator,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Built-in specialists plus any found in the conventional directories.
    pub fn new(db: Database) -> Self {
        let mut specialists = SpecialistLoader::with_builtins();
        specialists.load_default_dirs();
        Self::with_specialists(db, specialists, CoordinatorConfig::default())
    }

    pub fn with_specialists(
        db: Database,
        specialists: SpecialistLoader,
        config: CoordinatorConfig,
    ) -> Self {
        let registry = Arc::new(AgentRegistry::with_specialists(&specialists));
        Self::with_registry(db, specialists, registry, config)
    }

    /// Full control over which agents are available.
    pub fn with_registry(
        db: Database,
        specialists: SpecialistLoader,
        registry: Arc<AgentRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        let repository: Arc<dyn WorkflowRepository> = Arc::new(SqliteRepository::new(db.clone()));
        let coordinator = Coordinator::new(registry, repository.clone(), config);
        Self {
            db,
            repository,
            specialists,
            coordinator,
        }
    }
}
