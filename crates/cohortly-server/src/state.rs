use std::sync::Arc;

use cohortly_core::store::StatsBackend;
use cohortly_duckdb::DuckDbBackend;

use crate::config::Config;
use crate::external::ExternalApis;
use crate::pipeline::Orchestrator;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB backend. Internally uses `Arc<tokio::sync::Mutex<Connection>>`.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Job runner. Holds the single-run guard shared by HTTP, CLI and the
    /// scheduler.
    pub jobs: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(db: DuckDbBackend, config: Config, apis: ExternalApis) -> Self {
        let db = Arc::new(db);
        let config = Arc::new(config);
        let store: Arc<dyn StatsBackend> = db.clone();
        Self {
            jobs: Arc::new(Orchestrator::new(store, apis, Arc::clone(&config))),
            db,
            config,
        }
    }
}
