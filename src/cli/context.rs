//! Wiring shared by the commands: configuration, database and governor.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::embeddings::provider_from_config;
use crate::adapters::sqlite::{
    database_url, initialize_database, SqliteDistillationRepository, SqliteEpisodeRepository,
    SqliteEventQueue, SqliteEvidenceRepository, SqliteInsightRepository, SqlitePolicyRepository,
    SqliteTriggerRuleRepository, SqliteVectorStore,
};
use crate::domain::models::Config;
use crate::domain::ports::EventQueue;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{GovernanceEventBus, Governor, GovernorStores};

pub struct AppContext {
    pub config: Config,
    pub governor: Arc<Governor>,
    pub queue: Arc<dyn EventQueue>,
}

impl AppContext {
    /// Load configuration from `.praxis/` and open the database.
    pub async fn load() -> Result<Self> {
        let config = ConfigLoader::load().context("Failed to load configuration")?;
        Self::open(config).await
    }

    pub async fn open(config: Config) -> Result<Self> {
        let url = database_url(&config.database.path);
        let pool = initialize_database(&url)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        let embedder =
            provider_from_config(&config.embeddings).context("Failed to build embedding provider")?;

        let stores = GovernorStores {
            episodes: Arc::new(SqliteEpisodeRepository::new(pool.clone())),
            insights: Arc::new(SqliteInsightRepository::new(pool.clone())),
            distillations: Arc::new(SqliteDistillationRepository::new(pool.clone())),
            evidence: Arc::new(SqliteEvidenceRepository::new(pool.clone())),
            policies: Arc::new(SqlitePolicyRepository::new(pool.clone())),
            triggers: Arc::new(SqliteTriggerRuleRepository::new(pool.clone())),
            vectors: Arc::new(SqliteVectorStore::new(pool.clone())),
            embedder,
        };
        let governor = Arc::new(Governor::new(
            stores,
            config.clone(),
            Arc::new(GovernanceEventBus::default()),
        ));
        governor
            .load_rules()
            .await
            .context("Failed to load trigger rules")?;

        Ok(Self {
            config,
            governor,
            queue: Arc::new(SqliteEventQueue::new(pool)),
        })
    }
}
