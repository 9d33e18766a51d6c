//! Importance gate.
//!
//! Scores a candidate insight from five signals and decides whether it
//! becomes durable memory or an ephemeral cache entry. Pure; safe to call
//! concurrently from any number of episodes.

use chrono::{DateTime, Duration, Utc};

use crate::domain::models::{ActionDescriptor, GateConfig, ImportanceSignals, Retention};

/// Outcome of scoring one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub importance: f64,
    pub retention: Retention,
}

impl GateDecision {
    pub fn is_durable(&self) -> bool {
        self.retention.is_durable()
    }
}

#[derive(Debug, Clone)]
pub struct ImportanceGate {
    config: GateConfig,
}

impl ImportanceGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Weighted sum of the clamped signals, clamped to [0, 1].
    pub fn score(&self, signals: &ImportanceSignals) -> f64 {
        let signals = signals.clamped();
        let raw: f64 = signals
            .as_array()
            .iter()
            .zip(self.config.weights.as_array())
            .map(|(s, w)| s * w.max(0.0))
            .sum();
        raw.clamp(0.0, 1.0)
    }

    /// Score and pick a retention. Ephemeral entries live between the
    /// configured min and max hours, longer for higher scores.
    pub fn evaluate(&self, signals: &ImportanceSignals, now: DateTime<Utc>) -> GateDecision {
        let importance = self.score(signals);
        let retention = if importance > self.config.durable_threshold {
            Retention::Durable
        } else {
            Retention::Ephemeral {
                expires_at: now + self.ephemeral_ttl(importance),
            }
        };
        tracing::debug!(
            importance,
            durable = retention.is_durable(),
            impact = signals.impact,
            novelty = signals.novelty,
            surprise = signals.surprise,
            "importance scored"
        );
        GateDecision {
            importance,
            retention,
        }
    }

    fn ephemeral_ttl(&self, importance: f64) -> Duration {
        let min = self.config.ephemeral_min_hours as f64;
        let max = self.config.ephemeral_max_hours.max(self.config.ephemeral_min_hours) as f64;
        let fraction = if self.config.durable_threshold > 0.0 {
            (importance / self.config.durable_threshold).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let minutes = (min + (max - min) * fraction) * 60.0;
        Duration::minutes(minutes.round() as i64)
    }

    /// Recurrence fires once a fingerprint has been seen often enough.
    pub fn recurrence_signal(&self, occurrences: u32) -> f64 {
        if occurrences >= self.config.recurrence_threshold {
            1.0
        } else {
            0.0
        }
    }

    /// Irreversibility fires for mutating actions that touch a high-stakes pattern.
    pub fn irreversibility_signal(&self, action: &ActionDescriptor) -> f64 {
        if !action.effective_category().is_mutating() {
            return 0.0;
        }
        let text = action.query_text().to_lowercase();
        if self
            .config
            .high_stakes_patterns
            .iter()
            .any(|p| !p.is_empty() && text.contains(&p.to_lowercase()))
        {
            1.0
        } else {
            0.0
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}
