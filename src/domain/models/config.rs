use serde::{Deserialize, Serialize};

use super::advice::PrecisionMode;
use super::evidence::EvidenceKind;

/// Main configuration structure for Praxis
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-episode resource budget
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Guardrail thresholds and ordering
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// Importance gate weights and thresholds
    #[serde(default)]
    pub gate: GateConfig,

    /// Retrieval fusion weights and precision mode
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Evidence retention table
    #[serde(default)]
    pub evidence: EvidenceConfig,

    /// Distillation thresholds
    #[serde(default)]
    pub distillation: DistillationConfig,

    /// Confidence learning rate
    #[serde(default)]
    pub learning: LearningConfig,

    /// Embedding backend
    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    /// Event worker settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Canonical storage retry policy
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".praxis/praxis.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Resource budget applied to each new episode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,

    /// Caller-visible timeout per step
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Fraction of the budget after which a warning is attached to each step
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,
}

const fn default_max_steps() -> u32 {
    50
}

const fn default_max_seconds() -> u64 {
    3600
}

const fn default_step_timeout_secs() -> u64 {
    600
}

const fn default_warn_ratio() -> f64 {
    0.8
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_seconds: default_max_seconds(),
            step_timeout_secs: default_step_timeout_secs(),
            warn_ratio: default_warn_ratio(),
        }
    }
}

/// Built-in guardrail names, in their default evaluation order.
pub const DEFAULT_GUARDRAIL_ORDER: [&str; 9] = [
    "outcome-enforcement",
    "policy-constraint",
    "evidence-before-modification",
    "diff-thrash",
    "repeat-error",
    "no-new-information",
    "progress-contract",
    "confidence-stagnation",
    "memory-binding",
];

/// Guardrail thresholds. Every watcher threshold is tunable here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct GuardrailConfig {
    /// Steps without an observable state change before re-planning is required
    pub progress_window: usize,
    /// Consecutive steps without new information before DIAGNOSE is forced
    pub no_new_info_window: usize,
    /// Occurrences of one error signature that force DIAGNOSE
    pub repeat_error_threshold: usize,
    /// Edits of one target without a passing validation that force SIMPLIFY
    pub diff_thrash_threshold: usize,
    pub confidence_window: usize,
    pub confidence_epsilon: f64,
    /// Failed mutations on a target before diagnostic evidence is required
    pub evidence_retry_limit: usize,
    /// Evaluation order; first blocking guardrail wins
    pub order: Vec<String>,
    pub disabled: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            progress_window: 5,
            no_new_info_window: 4,
            repeat_error_threshold: 2,
            diff_thrash_threshold: 3,
            confidence_window: 3,
            confidence_epsilon: 0.05,
            evidence_retry_limit: 2,
            order: DEFAULT_GUARDRAIL_ORDER.iter().map(|s| (*s).to_string()).collect(),
            disabled: Vec::new(),
        }
    }
}

/// Weights of the five importance signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateWeights {
    pub impact: f64,
    pub novelty: f64,
    pub surprise: f64,
    pub recurrence: f64,
    pub irreversibility: f64,
}

impl Default for GateWeights {
    fn default() -> Self {
        Self {
            impact: 0.3,
            novelty: 0.2,
            surprise: 0.3,
            recurrence: 0.2,
            irreversibility: 0.4,
        }
    }
}

impl GateWeights {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.impact,
            self.novelty,
            self.surprise,
            self.recurrence,
            self.irreversibility,
        ]
    }
}

/// Importance gate configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct GateConfig {
    pub weights: GateWeights,
    /// Scores strictly above this become durable
    pub durable_threshold: f64,
    pub ephemeral_min_hours: u64,
    pub ephemeral_max_hours: u64,
    /// Times a lesson fingerprint must recur before the recurrence signal fires
    pub recurrence_threshold: u32,
    /// Substrings marking a mutating action as irreversible or high stakes
    pub high_stakes_patterns: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            weights: GateWeights::default(),
            durable_threshold: 0.5,
            ephemeral_min_hours: 24,
            ephemeral_max_hours: 72,
            recurrence_threshold: 3,
            high_stakes_patterns: [
                "deploy",
                "migrat",
                "drop table",
                "rm -rf",
                "force push",
                "production",
                "secret",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

/// Fusion weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionWeights {
    pub similarity: f64,
    pub recency: f64,
    pub outcome: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            similarity: 0.5,
            recency: 0.2,
            outcome: 0.3,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct RetrievalConfig {
    pub weights: FusionWeights,
    pub precision_mode: PrecisionMode,
    /// Similarity floor for semantic matches, before the precision offset
    pub min_similarity: f64,
    pub top_k: usize,
    /// Similarity at which a semantic match must be cited by the step
    pub memory_binding_threshold: f64,
    pub recency_half_life_days: f64,
    /// Token overlap above which a later candidate is a near-duplicate
    pub diversity_threshold: f64,
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            precision_mode: PrecisionMode::Balanced,
            min_similarity: 0.35,
            top_k: 10,
            memory_binding_threshold: 0.75,
            recency_half_life_days: 14.0,
            diversity_threshold: 0.8,
            default_limit: 5,
        }
    }
}

/// Retention hours per evidence type. `None` keeps the evidence forever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct RetentionHours {
    pub tool_output: Option<u64>,
    pub test_result: Option<u64>,
    pub build_artifact: Option<u64>,
    pub deploy_log: Option<u64>,
    pub security_event: Option<u64>,
    pub user_flagged: Option<u64>,
}

impl Default for RetentionHours {
    fn default() -> Self {
        Self {
            tool_output: Some(72),
            test_result: Some(168),
            build_artifact: Some(168),
            deploy_log: Some(720),
            security_event: Some(2160),
            user_flagged: None,
        }
    }
}

impl RetentionHours {
    pub const fn for_kind(&self, kind: EvidenceKind) -> Option<u64> {
        match kind {
            EvidenceKind::ToolOutput => self.tool_output,
            EvidenceKind::TestResult => self.test_result,
            EvidenceKind::BuildArtifact => self.build_artifact,
            EvidenceKind::DeployLog => self.deploy_log,
            EvidenceKind::SecurityEvent => self.security_event,
            EvidenceKind::UserFlagged => self.user_flagged,
        }
    }
}

/// Evidence store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EvidenceConfig {
    #[serde(default)]
    pub retention_hours: RetentionHours,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

const fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            retention_hours: RetentionHours::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Distillation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct DistillationConfig {
    /// Minimum step surprise for a step to yield a candidate without a lesson
    pub candidate_surprise: f64,
    pub acceptance_threshold: f64,
    pub merge_similarity: f64,
    /// How far one corroboration or contradiction moves confidence
    pub blend_rate: f64,
    pub supersede_below: f64,
    pub promote_confidence: f64,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self {
            candidate_surprise: 0.5,
            acceptance_threshold: 0.45,
            merge_similarity: 0.85,
            blend_rate: 0.2,
            supersede_below: 0.2,
            promote_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LearningConfig {
    /// Step size of the confidence moving average
    #[serde(default = "default_confidence_alpha")]
    pub confidence_alpha: f64,
}

const fn default_confidence_alpha() -> f64 {
    0.2
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            confidence_alpha: default_confidence_alpha(),
        }
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EmbeddingConfig {
    /// hashing, openai or null
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Model name for HTTP providers
    #[serde(default)]
    pub model: Option<String>,

    /// Base URL override for OpenAI-compatible endpoints
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}

const fn default_embedding_dimension() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dimension: default_embedding_dimension(),
            model: None,
            base_url: None,
        }
    }
}

/// Event worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub lease_secs: u64,
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            poll_interval_ms: 500,
            lease_secs: 60,
            max_attempts: 5,
        }
    }
}

/// Retry policy for canonical storage writes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct PersistenceConfig {
    pub initial_backoff_ms: u64,
    pub max_elapsed_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_elapsed_ms: 2000,
        }
    }
}
