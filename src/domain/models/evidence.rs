//! Evidence: ephemeral proof artifacts tied to a step.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::RetentionHours;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    ToolOutput,
    TestResult,
    BuildArtifact,
    DeployLog,
    SecurityEvent,
    UserFlagged,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolOutput => "tool_output",
            Self::TestResult => "test_result",
            Self::BuildArtifact => "build_artifact",
            Self::DeployLog => "deploy_log",
            Self::SecurityEvent => "security_event",
            Self::UserFlagged => "user_flagged",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "tool_output" => Some(Self::ToolOutput),
            "test_result" => Some(Self::TestResult),
            "build_artifact" => Some(Self::BuildArtifact),
            "deploy_log" => Some(Self::DeployLog),
            "security_event" => Some(Self::SecurityEvent),
            "user_flagged" => Some(Self::UserFlagged),
            _ => None,
        }
    }
}

/// Diagnostic artifacts that unlock mutation after repeated failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Reproduction,
    NarrowedScope,
    DiscriminatingSignal,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reproduction => "reproduction",
            Self::NarrowedScope => "narrowed_scope",
            Self::DiscriminatingSignal => "discriminating_signal",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reproduction" => Some(Self::Reproduction),
            "narrowed_scope" => Some(Self::NarrowedScope),
            "discriminating_signal" => Some(Self::DiscriminatingSignal),
            _ => None,
        }
    }
}

/// Evidence supplied by the caller when completing a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceInput {
    pub kind: EvidenceKind,
    pub content: String,
    #[serde(default)]
    pub diagnostic: Option<DiagnosticKind>,
    /// Target the artifact concerns, when different from the step's target
    #[serde(default)]
    pub target: Option<String>,
}

impl EvidenceInput {
    pub fn new(kind: EvidenceKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            diagnostic: None,
            target: None,
        }
    }

    pub fn diagnostic(mut self, diagnostic: DiagnosticKind) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }

    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// A stored evidence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub step_id: Uuid,
    pub episode_id: Uuid,
    pub kind: EvidenceKind,
    pub diagnostic: Option<DiagnosticKind>,
    pub target: Option<String>,
    /// Scrubbed content blob
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// None = retained permanently
    pub expires_at: Option<DateTime<Utc>>,
}

impl Evidence {
    pub fn new(
        episode_id: Uuid,
        step_id: Uuid,
        input: EvidenceInput,
        retention: &RetentionHours,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = retention
            .for_kind(input.kind)
            .map(|hours| now + Duration::hours(hours as i64));
        Self {
            id: Uuid::new_v4(),
            step_id,
            episode_id,
            kind: input.kind,
            diagnostic: input.diagnostic,
            target: input.target,
            content: input.content,
            created_at: now,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Episode-held pointer to a piece of evidence. Survives evidence expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub evidence_id: Uuid,
    pub step_id: Uuid,
    /// Sequence number of the step that recorded the evidence
    pub step_sequence: u32,
    pub kind: EvidenceKind,
    pub diagnostic: Option<DiagnosticKind>,
    pub target: Option<String>,
}
