//! Governance phases and the action categories each phase permits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a proposed action. Phases gate actions by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// Read-only inspection
    Inspect,
    /// Edits and writes
    Mutate,
    /// Commands that may change state
    Execute,
    /// Tests, builds, lints
    Verify,
    /// Free-form note
    Note,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Mutate => "mutate",
            Self::Execute => "execute",
            Self::Verify => "verify",
            Self::Note => "note",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inspect" => Some(Self::Inspect),
            "mutate" => Some(Self::Mutate),
            "execute" => Some(Self::Execute),
            "verify" => Some(Self::Verify),
            "note" => Some(Self::Note),
            _ => None,
        }
    }

    /// Whether actions of this category can change observable state.
    pub const fn is_mutating(&self) -> bool {
        matches!(self, Self::Mutate | Self::Execute)
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the episode state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Explore,
    Plan,
    Execute,
    Validate,
    /// Terminal success path
    Consolidate,
    Diagnose,
    Simplify,
    /// Waiting on external approval
    Escalate,
    /// Terminal abort path
    Halt,
}

/// Order used to name the required phase in a phase violation.
const CANONICAL_ORDER: [Phase; 9] = [
    Phase::Execute,
    Phase::Validate,
    Phase::Explore,
    Phase::Plan,
    Phase::Diagnose,
    Phase::Simplify,
    Phase::Escalate,
    Phase::Consolidate,
    Phase::Halt,
];

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "EXPLORE",
            Self::Plan => "PLAN",
            Self::Execute => "EXECUTE",
            Self::Validate => "VALIDATE",
            Self::Consolidate => "CONSOLIDATE",
            Self::Diagnose => "DIAGNOSE",
            Self::Simplify => "SIMPLIFY",
            Self::Escalate => "ESCALATE",
            Self::Halt => "HALT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "EXPLORE" => Some(Self::Explore),
            "PLAN" => Some(Self::Plan),
            "EXECUTE" => Some(Self::Execute),
            "VALIDATE" => Some(Self::Validate),
            "CONSOLIDATE" => Some(Self::Consolidate),
            "DIAGNOSE" => Some(Self::Diagnose),
            "SIMPLIFY" => Some(Self::Simplify),
            "ESCALATE" => Some(Self::Escalate),
            "HALT" => Some(Self::Halt),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Consolidate | Self::Halt)
    }

    /// Action categories permitted in this phase.
    pub fn allowed_categories(&self) -> &'static [ActionCategory] {
        use ActionCategory::{Execute, Inspect, Mutate, Note, Verify};
        match self {
            Self::Explore | Self::Plan => &[Inspect, Note],
            Self::Execute => &[Inspect, Mutate, Execute, Verify, Note],
            Self::Validate | Self::Diagnose | Self::Simplify => &[Inspect, Verify, Note],
            Self::Escalate | Self::Consolidate => &[Note],
            Self::Halt => &[],
        }
    }

    pub fn permits(&self, category: ActionCategory) -> bool {
        self.allowed_categories().contains(&category)
    }

    /// Targets reachable through an explicit phase-completion signal.
    pub fn allowed_transitions(&self) -> &'static [Phase] {
        use Phase::{Consolidate, Diagnose, Escalate, Execute, Explore, Halt, Plan, Simplify, Validate};
        match self {
            Self::Explore => &[Plan, Diagnose, Escalate, Halt],
            Self::Plan => &[Execute, Explore, Escalate, Halt],
            Self::Execute => &[Validate, Diagnose, Simplify, Plan, Escalate, Halt],
            Self::Validate => &[Consolidate, Execute, Diagnose, Plan, Escalate, Halt],
            Self::Diagnose => &[Plan, Explore, Execute, Simplify, Escalate, Halt],
            Self::Simplify => &[Plan, Execute, Escalate, Halt],
            Self::Escalate => &[Plan, Halt],
            Self::Consolidate | Self::Halt => &[],
        }
    }

    pub fn can_transition_to(&self, target: Phase) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// First phase in canonical order that permits the category.
    pub fn required_for(category: ActionCategory) -> Option<Phase> {
        CANONICAL_ORDER.iter().copied().find(|p| p.permits(category))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_only_in_execute() {
        let phases = [
            Phase::Explore,
            Phase::Plan,
            Phase::Execute,
            Phase::Validate,
            Phase::Consolidate,
            Phase::Diagnose,
            Phase::Simplify,
            Phase::Escalate,
            Phase::Halt,
        ];
        for phase in phases {
            assert_eq!(
                phase.permits(ActionCategory::Mutate),
                phase == Phase::Execute,
                "{phase}"
            );
        }
    }

    #[test]
    fn test_required_phase() {
        assert_eq!(Phase::required_for(ActionCategory::Mutate), Some(Phase::Execute));
        assert_eq!(Phase::required_for(ActionCategory::Verify), Some(Phase::Execute));
        assert_eq!(Phase::required_for(ActionCategory::Note), Some(Phase::Execute));
    }

    #[test]
    fn test_terminal_phases_have_no_exits() {
        assert!(Phase::Consolidate.allowed_transitions().is_empty());
        assert!(Phase::Halt.allowed_transitions().is_empty());
        assert!(!Phase::Halt.can_transition_to(Phase::Plan));
        assert!(Phase::Validate.can_transition_to(Phase::Consolidate));
        assert!(!Phase::Explore.can_transition_to(Phase::Execute));
    }

    #[test]
    fn test_round_trip_names() {
        assert_eq!(Phase::from_str("diagnose"), Some(Phase::Diagnose));
        assert_eq!(ActionCategory::from_str("VERIFY"), Some(ActionCategory::Verify));
        assert_eq!(Phase::from_str("unknown"), None);
        let json = serde_json::to_string(&Phase::Simplify).unwrap();
        assert_eq!(json, "\"SIMPLIFY\"");
    }
}
