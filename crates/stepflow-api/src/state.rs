//! Application state wiring storage, config, and the engine together.
//!
//! The workflow runner is generic over repository and provider traits;
//! AppState pins it to the SQLite repository and the boxed gateway provider.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use stepflow_core::llm::box_provider::BoxLlmProvider;
use stepflow_core::workflow::executor::WorkflowRunner;
use stepflow_infra::config::{load_global_config, resolve_data_dir};
use stepflow_infra::llm::create_provider;
use stepflow_infra::sqlite::pool::{DatabasePool, database_url};
use stepflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use stepflow_types::config::GlobalConfig;

/// Runner pinned to the concrete infra implementations.
pub type ConcreteRunner = WorkflowRunner<SqliteWorkflowRepository, BoxLlmProvider>;

/// Shared application state for CLI commands.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: Arc<GlobalConfig>,
    pub repo: SqliteWorkflowRepository,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: resolve the data dir, load config,
    /// open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = Arc::new(load_global_config(&data_dir).await);

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("Failed to open the stepflow database")?;
        let repo = SqliteWorkflowRepository::new(db_pool.clone());

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            data_dir,
            config,
            repo,
            db_pool,
        })
    }

    /// Build a workflow runner. Only commands that execute workflows need
    /// the provider, so the API key is resolved here rather than in `init`.
    pub fn runner(&self) -> anyhow::Result<Arc<ConcreteRunner>> {
        let provider = create_provider(&self.config.provider).with_context(|| {
            format!(
                "Cannot reach the model gateway: set the {} environment variable",
                self.config.provider.api_key_env
            )
        })?;

        Ok(Arc::new(WorkflowRunner::new(
            SqliteWorkflowRepository::new(self.db_pool.clone()),
            Arc::new(provider),
            Arc::clone(&self.config),
        )))
    }
}
