//! Insight records scored by the importance gate.
//!
//! Each record kind carries only the fields it needs, validated at
//! construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::action::Evaluation;
use crate::domain::errors::{DomainError, DomainResult};

/// The five gate signals, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImportanceSignals {
    /// Did it unblock something
    pub impact: f64,
    /// Distance from the existing corpus
    pub novelty: f64,
    pub surprise: f64,
    /// Pattern recurred past the threshold
    pub recurrence: f64,
    /// Touches an irreversible or high-stakes category
    pub irreversibility: f64,
}

impl ImportanceSignals {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.impact,
            self.novelty,
            self.surprise,
            self.recurrence,
            self.irreversibility,
        ]
    }

    /// Clamp every signal into [0, 1]; non-finite values become 0.
    pub fn clamped(self) -> Self {
        let c = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            impact: c(self.impact),
            novelty: c(self.novelty),
            surprise: c(self.surprise),
            recurrence: c(self.recurrence),
            irreversibility: c(self.irreversibility),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightKind {
    StepLesson {
        step_id: Uuid,
        evaluation: Evaluation,
        lesson: String,
    },
    Note {
        text: String,
    },
    DistilledRule {
        distillation_id: Uuid,
        statement: String,
    },
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepLesson { .. } => "step_lesson",
            Self::Note { .. } => "note",
            Self::DistilledRule { .. } => "distilled_rule",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::StepLesson { lesson, .. } => lesson,
            Self::Note { text } => text,
            Self::DistilledRule { statement, .. } => statement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "retention", rename_all = "snake_case")]
pub enum Retention {
    /// Canonical; eligible for distillation and retrieval indexing
    Durable,
    /// Cached until `expires_at`; not eligible for promotion
    Ephemeral { expires_at: DateTime<Utc> },
}

impl Retention {
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Durable => None,
            Self::Ephemeral { expires_at } => Some(*expires_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub episode_id: Option<Uuid>,
    pub kind: InsightKind,
    pub signals: ImportanceSignals,
    pub importance: f64,
    pub retention: Retention,
    /// Hash of the normalized text, used for recurrence counting
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Insight {
    pub fn new(
        episode_id: Option<Uuid>,
        kind: InsightKind,
        signals: ImportanceSignals,
        importance: f64,
        retention: Retention,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if kind.text().trim().is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "{} insight requires non-empty text",
                kind.as_str()
            )));
        }
        let fingerprint = text_fingerprint(kind.text());
        Ok(Self {
            id: Uuid::new_v4(),
            episode_id,
            kind,
            signals,
            importance,
            retention,
            fingerprint,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn text(&self) -> &str {
        self.kind.text()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.retention.expires_at().is_some_and(|at| at <= now)
    }
}

/// Hash of lowercased text with whitespace collapsed.
pub fn text_fingerprint(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}
