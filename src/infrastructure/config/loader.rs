use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{Config, DEFAULT_GUARDRAIL_ORDER};

/// Project directory holding config, database and logs.
pub const PROJECT_DIR: &str = ".praxis";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid weight {name}: {value}. Must be finite and non-negative")]
    InvalidWeight { name: String, value: f64 },

    #[error("Invalid threshold {name}: {value}. Must be within [0, 1]")]
    InvalidThreshold { name: String, value: f64 },

    #[error("Invalid {0}: must be at least 1")]
    ZeroLimit(String),

    #[error("ephemeral_min_hours ({0}) must not exceed ephemeral_max_hours ({1})")]
    InvalidEphemeralWindow(u64, u64),

    #[error("Unknown guardrail '{0}' in guardrails.order; custom guardrails must be namespaced as 'owner:name'")]
    UnknownGuardrail(String),

    #[error("Unknown embedding provider '{0}'. Must be one of: hashing, openai, null")]
    UnknownEmbeddingProvider(String),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_elapsed_ms ({1})"
    )]
    InvalidBackoff(u64, u64),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .praxis/config.yaml (project config, created by init)
    /// 3. .praxis/local.yaml (local overrides, optional)
    /// 4. Environment variables (PRAXIS_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(PROJECT_DIR)
    }

    /// Same precedence as [`load`](Self::load), rooted at an explicit project directory.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("PRAXIS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        let budget = &config.budget;
        nonzero("budget.max_steps", budget.max_steps as usize)?;
        nonzero("budget.max_seconds", budget.max_seconds as usize)?;
        nonzero("budget.step_timeout_secs", budget.step_timeout_secs as usize)?;
        unit("budget.warn_ratio", budget.warn_ratio)?;

        let guardrails = &config.guardrails;
        nonzero("guardrails.progress_window", guardrails.progress_window)?;
        nonzero("guardrails.no_new_info_window", guardrails.no_new_info_window)?;
        nonzero("guardrails.repeat_error_threshold", guardrails.repeat_error_threshold)?;
        nonzero("guardrails.diff_thrash_threshold", guardrails.diff_thrash_threshold)?;
        nonzero("guardrails.confidence_window", guardrails.confidence_window)?;
        nonzero("guardrails.evidence_retry_limit", guardrails.evidence_retry_limit)?;
        unit("guardrails.confidence_epsilon", guardrails.confidence_epsilon)?;
        for name in guardrails.order.iter().chain(&guardrails.disabled) {
            if !DEFAULT_GUARDRAIL_ORDER.contains(&name.as_str()) && !name.contains(':') {
                return Err(ConfigError::UnknownGuardrail(name.clone()));
            }
        }

        let gate = &config.gate;
        for (name, value) in [
            ("gate.weights.impact", gate.weights.impact),
            ("gate.weights.novelty", gate.weights.novelty),
            ("gate.weights.surprise", gate.weights.surprise),
            ("gate.weights.recurrence", gate.weights.recurrence),
            ("gate.weights.irreversibility", gate.weights.irreversibility),
            ("retrieval.weights.similarity", config.retrieval.weights.similarity),
            ("retrieval.weights.recency", config.retrieval.weights.recency),
            ("retrieval.weights.outcome", config.retrieval.weights.outcome),
        ] {
            weight(name, value)?;
        }
        unit("gate.durable_threshold", gate.durable_threshold)?;
        if gate.ephemeral_min_hours > gate.ephemeral_max_hours {
            return Err(ConfigError::InvalidEphemeralWindow(
                gate.ephemeral_min_hours,
                gate.ephemeral_max_hours,
            ));
        }
        nonzero("gate.recurrence_threshold", gate.recurrence_threshold as usize)?;

        let retrieval = &config.retrieval;
        unit("retrieval.min_similarity", retrieval.min_similarity)?;
        unit("retrieval.memory_binding_threshold", retrieval.memory_binding_threshold)?;
        unit("retrieval.diversity_threshold", retrieval.diversity_threshold)?;
        nonzero("retrieval.top_k", retrieval.top_k)?;
        nonzero("retrieval.default_limit", retrieval.default_limit)?;
        if !retrieval.recency_half_life_days.is_finite() || retrieval.recency_half_life_days <= 0.0 {
            return Err(ConfigError::InvalidWeight {
                name: "retrieval.recency_half_life_days".to_string(),
                value: retrieval.recency_half_life_days,
            });
        }

        let distillation = &config.distillation;
        for (name, value) in [
            ("distillation.candidate_surprise", distillation.candidate_surprise),
            ("distillation.acceptance_threshold", distillation.acceptance_threshold),
            ("distillation.merge_similarity", distillation.merge_similarity),
            ("distillation.blend_rate", distillation.blend_rate),
            ("distillation.supersede_below", distillation.supersede_below),
            ("distillation.promote_confidence", distillation.promote_confidence),
            ("learning.confidence_alpha", config.learning.confidence_alpha),
        ] {
            unit(name, value)?;
        }

        if !["hashing", "openai", "null"].contains(&config.embeddings.provider.as_str()) {
            return Err(ConfigError::UnknownEmbeddingProvider(
                config.embeddings.provider.clone(),
            ));
        }
        nonzero("embeddings.dimension", config.embeddings.dimension)?;

        nonzero("worker.batch_size", config.worker.batch_size)?;
        nonzero("worker.lease_secs", config.worker.lease_secs as usize)?;
        nonzero("worker.max_attempts", config.worker.max_attempts as usize)?;
        nonzero("evidence.sweep_interval_secs", config.evidence.sweep_interval_secs as usize)?;

        let persistence = &config.persistence;
        if persistence.initial_backoff_ms >= persistence.max_elapsed_ms {
            return Err(ConfigError::InvalidBackoff(
                persistence.initial_backoff_ms,
                persistence.max_elapsed_ms,
            ));
        }

        Ok(())
    }
}

fn nonzero(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroLimit(name.to_string()));
    }
    Ok(())
}

fn unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidThreshold {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

fn weight(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidWeight {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PrecisionMode;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.database.path, ".praxis/praxis.db");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut config = Config::default();
        config.gate.weights.novelty = -0.1;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWeight { .. })
        ));

        let mut config = Config::default();
        config.retrieval.weights.recency = f64::NAN;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.retrieval.memory_binding_threshold = 1.2;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = Config::default();
        config.guardrails.no_new_info_window = 0;
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::ZeroLimit(name) => assert_eq!(name, "guardrails.no_new_info_window"),
            other => panic!("Expected ZeroLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_ephemeral_window() {
        let mut config = Config::default();
        config.gate.ephemeral_min_hours = 80;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidEphemeralWindow(80, 72))
        ));
    }

    #[test]
    fn test_validate_guardrail_names() {
        let mut config = Config::default();
        config.guardrails.order.push("team:no-friday-deploys".to_string());
        assert!(ConfigLoader::validate(&config).is_ok());

        config.guardrails.order.push("made-up".to_string());
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownGuardrail(name)) if name == "made-up"
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("config.yaml")).unwrap();
        writeln!(
            base,
            "budget:\n  max_steps: 20\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        let mut local = std::fs::File::create(dir.path().join("local.yaml")).unwrap();
        writeln!(local, "budget:\n  max_steps: 30\nlogging:\n  level: debug").unwrap();

        temp_env::with_vars_unset(["PRAXIS_BUDGET__MAX_STEPS"], || {
            let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
            assert_eq!(config.budget.max_steps, 30, "local overrides project config");
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.logging.format, "json", "base value persists");
            assert_eq!(config.budget.max_seconds, 3600, "defaults fill the rest");
        });
    }

    #[test]
    fn test_env_override() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_vars(
            [
                ("PRAXIS_BUDGET__MAX_STEPS", Some("7")),
                ("PRAXIS_RETRIEVAL__PRECISION_MODE", Some("loose")),
                ("PRAXIS_GUARDRAILS__PROGRESS_WINDOW", Some("9")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.budget.max_steps, 7);
                assert_eq!(config.retrieval.precision_mode, PrecisionMode::Loose);
                assert_eq!(config.guardrails.progress_window, 9);
            },
        );
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_var("PRAXIS_GATE__DURABLE_THRESHOLD", Some("1.5"), || {
            assert!(ConfigLoader::load_from_dir(dir.path()).is_err());
        });
    }
}
