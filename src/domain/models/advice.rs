//! Ranked advice returned by retrieval.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Priority tier of a piece of advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Background,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Additive boost applied to the fusion score.
    pub const fn boost(&self) -> f64 {
        match self {
            Self::Critical => 0.3,
            Self::High => 0.2,
            Self::Normal => 0.0,
            Self::Background => -0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Background => "background",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "background" | "low" => Some(Self::Background),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceSource {
    Trigger,
    Semantic,
}

impl AdviceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Semantic => "semantic",
        }
    }
}

/// Single threshold offset trading precision for recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionMode {
    Strict,
    #[default]
    Balanced,
    Loose,
}

impl PrecisionMode {
    pub const fn offset(&self) -> f64 {
        match self {
            Self::Strict => 0.1,
            Self::Balanced => 0.0,
            Self::Loose => -0.1,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "balanced" => Some(Self::Balanced),
            "loose" => Some(Self::Loose),
            _ => None,
        }
    }
}

/// One ranked piece of advice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceItem {
    /// Memory id a step cites to acknowledge this advice
    pub id: Uuid,
    pub text: String,
    pub source: AdviceSource,
    pub priority: Priority,
    pub score: f64,
    pub similarity: f64,
    pub distillation_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdviceResponse {
    pub items: Vec<AdviceItem>,
    /// Semantic search was unavailable; trigger rules only
    pub degraded: bool,
}

impl AdviceResponse {
    pub fn ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|i| i.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_boosts_are_ordered() {
        assert!(Priority::Critical.boost() > Priority::High.boost());
        assert!(Priority::High.boost() > Priority::Normal.boost());
        assert!(Priority::Normal.boost() > Priority::Background.boost());
        assert!(Priority::Critical > Priority::Background);
    }

    #[test]
    fn test_precision_offsets() {
        assert!(PrecisionMode::Strict.offset() > 0.0);
        assert_eq!(PrecisionMode::from_str("LOOSE"), Some(PrecisionMode::Loose));
    }
}
