//! Common test utilities for integration tests
//!
//! Builds a governor over an in-memory SQLite database with the hashing
//! embedder, plus packet helpers shared across test files.

#![allow(dead_code)]

use std::sync::Arc;

use praxis::adapters::embeddings::HashingEmbeddingProvider;
use praxis::adapters::sqlite::{
    create_migrated_test_pool, SqliteDistillationRepository, SqliteEpisodeRepository,
    SqliteEvidenceRepository, SqliteInsightRepository, SqlitePolicyRepository,
    SqliteTriggerRuleRepository, SqliteVectorStore,
};
use praxis::domain::models::{
    ActionDescriptor, Config, DecisionPacket, OutcomeClass, Prediction,
};
use praxis::domain::ports::{DistillationRepository, EpisodeRepository};
use praxis::services::{GovernanceEventBus, Governor, GovernorStores};
use sqlx::SqlitePool;

pub struct TestEnv {
    pub governor: Arc<Governor>,
    pub pool: SqlitePool,
}

/// Governor with the default configuration.
pub async fn setup() -> TestEnv {
    setup_with(Config::default()).await
}

pub async fn setup_with(config: Config) -> TestEnv {
    let pool = create_migrated_test_pool()
        .await
        .expect("failed to create test database");
    let episodes = Arc::new(SqliteEpisodeRepository::new(pool.clone()));
    let governor = governor_over(&pool, episodes, config);
    TestEnv {
        governor: Arc::new(governor),
        pool,
    }
}

/// Governor with a caller-supplied episode store, for storage failure tests.
pub fn governor_over(
    pool: &SqlitePool,
    episodes: Arc<dyn EpisodeRepository>,
    config: Config,
) -> Governor {
    let distillations = Arc::new(SqliteDistillationRepository::new(pool.clone()));
    governor_with_stores(pool, episodes, distillations, config)
}

/// Governor with caller-supplied episode and distillation stores.
pub fn governor_with_stores(
    pool: &SqlitePool,
    episodes: Arc<dyn EpisodeRepository>,
    distillations: Arc<dyn DistillationRepository>,
    config: Config,
) -> Governor {
    let stores = GovernorStores {
        episodes,
        insights: Arc::new(SqliteInsightRepository::new(pool.clone())),
        distillations,
        evidence: Arc::new(SqliteEvidenceRepository::new(pool.clone())),
        policies: Arc::new(SqlitePolicyRepository::new(pool.clone())),
        triggers: Arc::new(SqliteTriggerRuleRepository::new(pool.clone())),
        vectors: Arc::new(SqliteVectorStore::new(pool.clone())),
        embedder: Arc::new(HashingEmbeddingProvider::new(256).expect("embedder")),
    };
    Governor::new(stores, config, Arc::new(GovernanceEventBus::default()))
}

/// Read a file, expecting success.
pub fn read(target: &str) -> DecisionPacket {
    DecisionPacket::new(
        format!("inspect {target}"),
        ActionDescriptor::new("Read").with_target(target),
        Prediction::new("file exists", OutcomeClass::Success),
        0.7,
    )
}

/// Edit a file, expecting success.
pub fn edit(target: &str) -> DecisionPacket {
    DecisionPacket::new(
        format!("change {target}"),
        ActionDescriptor::new("Edit").with_target(target),
        Prediction::new("edit applies cleanly", OutcomeClass::Success),
        0.7,
    )
}

/// Run a shell command, expecting success.
pub fn bash(command: &str) -> DecisionPacket {
    DecisionPacket::new(
        format!("run {command}"),
        ActionDescriptor::new("Bash").with_command(command),
        Prediction::new("command exits 0", OutcomeClass::Success),
        0.7,
    )
}

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
