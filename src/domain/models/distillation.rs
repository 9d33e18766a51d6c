//! Distillations: reusable rules extracted from step history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistillationType {
    Heuristic,
    SharpEdge,
    AntiPattern,
    Playbook,
    Policy,
}

impl DistillationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::SharpEdge => "sharp_edge",
            Self::AntiPattern => "anti_pattern",
            Self::Playbook => "playbook",
            Self::Policy => "policy",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "heuristic" => Some(Self::Heuristic),
            "sharp_edge" => Some(Self::SharpEdge),
            "anti_pattern" => Some(Self::AntiPattern),
            "playbook" => Some(Self::Playbook),
            "policy" => Some(Self::Policy),
            _ => None,
        }
    }
}

/// Whether the source outcomes support or warn against the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeDirection {
    Positive,
    Negative,
}

impl OutcomeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistillationStatus {
    Active,
    /// Kept for history; never hard-deleted
    Superseded,
}

impl DistillationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }
}

/// An extracted rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distillation {
    pub id: Uuid,
    pub statement: String,
    pub kind: DistillationType,
    pub direction: OutcomeDirection,
    pub domain_tags: Vec<String>,
    /// Keywords that become a trigger pattern on promotion
    pub trigger_tags: Vec<String>,
    /// Source step ids. Pointers, never embedded copies.
    pub provenance: Vec<Uuid>,
    pub source_episodes: Vec<Uuid>,
    pub validation_count: u32,
    pub contradiction_count: u32,
    pub confidence: f64,
    pub status: DistillationStatus,
    /// Hash of statement and sorted provenance
    pub fingerprint: String,
    /// Trigger rule created on promotion
    pub promoted_rule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
}

impl Distillation {
    pub fn from_candidate(candidate: &DistillationCandidate, confidence: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            statement: candidate.statement.clone(),
            kind: candidate.kind,
            direction: candidate.direction,
            domain_tags: candidate.domain_tags.clone(),
            trigger_tags: candidate.trigger_tags.clone(),
            provenance: candidate.provenance.clone(),
            source_episodes: vec![candidate.episode_id],
            validation_count: 0,
            contradiction_count: 0,
            confidence: confidence.clamp(0.0, 1.0),
            status: DistillationStatus::Active,
            fingerprint: candidate.fingerprint(),
            promoted_rule_id: None,
            created_at: now,
            updated_at: now,
            last_reinforced_at: now,
        }
    }

    /// validation / (validation + contradiction), 0.5 without history.
    pub fn effectiveness(&self) -> f64 {
        let total = self.validation_count + self.contradiction_count;
        if total == 0 {
            0.5
        } else {
            f64::from(self.validation_count) / f64::from(total)
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DistillationStatus::Active
    }

    /// Corroborating outcome: count it and blend confidence upward.
    pub fn corroborate(&mut self, evidence: &[Uuid], blend_rate: f64, now: DateTime<Utc>) {
        self.validation_count += 1;
        self.confidence = (self.confidence + blend_rate * (1.0 - self.confidence)).clamp(0.0, 1.0);
        self.extend_provenance(evidence);
        self.last_reinforced_at = now;
        self.updated_at = now;
    }

    /// Contradicting outcome: count it and reduce confidence.
    pub fn contradict(
        &mut self,
        evidence: &[Uuid],
        blend_rate: f64,
        supersede_below: f64,
        now: DateTime<Utc>,
    ) {
        self.contradiction_count += 1;
        self.confidence = (self.confidence * (1.0 - blend_rate)).clamp(0.0, 1.0);
        self.extend_provenance(evidence);
        if self.confidence < supersede_below {
            self.status = DistillationStatus::Superseded;
        }
        self.updated_at = now;
    }

    fn extend_provenance(&mut self, steps: &[Uuid]) {
        for step in steps {
            if !self.provenance.contains(step) {
                self.provenance.push(*step);
            }
        }
    }
}

/// A proposed rule before merge-or-contradict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationCandidate {
    pub episode_id: Uuid,
    pub statement: String,
    pub kind: DistillationType,
    pub direction: OutcomeDirection,
    pub domain_tags: Vec<String>,
    pub trigger_tags: Vec<String>,
    pub provenance: Vec<Uuid>,
    pub impact: f64,
    pub novelty: f64,
    pub generalizability: f64,
    pub surprise: f64,
}

impl DistillationCandidate {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.statement, &self.provenance)
    }
}

/// Stable hash of a statement and its (order-independent) provenance.
pub fn fingerprint(statement: &str, provenance: &[Uuid]) -> String {
    let mut ids: Vec<String> = provenance.iter().map(Uuid::to_string).collect();
    ids.sort();
    let mut hasher = Sha256::new();
    hasher.update(statement.trim().to_lowercase().as_bytes());
    for id in ids {
        hasher.update(b"|");
        hasher.update(id.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
