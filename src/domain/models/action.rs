//! Action descriptors and outcome classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::phase::ActionCategory;

/// Describes the action a step intends to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActionDescriptor {
    /// Tool name as reported by the host (e.g. `Read`, `Edit`, `Bash`)
    pub tool: String,
    /// Explicit category; inferred from the tool when absent
    #[serde(default)]
    pub category: Option<ActionCategory>,
    /// File or resource the action touches
    #[serde(default)]
    pub target: Option<String>,
    /// Command line for shell-like tools
    #[serde(default)]
    pub command: Option<String>,
    /// Short human-readable description
    #[serde(default)]
    pub summary: String,
}

impl ActionDescriptor {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: ActionCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// The explicit category, or one inferred from the tool name and command.
    pub fn effective_category(&self) -> ActionCategory {
        self.category
            .unwrap_or_else(|| infer_category(&self.tool, self.command.as_deref()))
    }

    /// Text used for retrieval queries and high-stakes matching.
    pub fn query_text(&self) -> String {
        let mut parts = vec![self.tool.as_str()];
        if !self.summary.is_empty() {
            parts.push(&self.summary);
        }
        if let Some(target) = &self.target {
            parts.push(target);
        }
        if let Some(command) = &self.command {
            parts.push(command);
        }
        parts.join(" ")
    }
}

const VERIFY_MARKERS: [&str; 8] = [
    "test", "build", "check", "lint", "clippy", "pytest", "verify", "fmt --check",
];

const INSPECT_COMMANDS: [&str; 10] = [
    "ls", "cat", "head", "tail", "grep", "rg", "find", "pwd", "git status", "git diff",
];

/// Classify a tool invocation that carries no explicit category.
pub fn infer_category(tool: &str, command: Option<&str>) -> ActionCategory {
    match tool.to_lowercase().as_str() {
        "read" | "grep" | "glob" | "ls" | "search" | "view" | "webfetch" | "websearch" => {
            ActionCategory::Inspect
        }
        "edit" | "write" | "multiedit" | "notebookedit" | "delete" | "move" => ActionCategory::Mutate,
        "note" | "todowrite" | "comment" => ActionCategory::Note,
        "bash" | "shell" | "exec" | "run" | "command" => {
            let command = command.unwrap_or_default().trim().to_lowercase();
            if VERIFY_MARKERS.iter().any(|m| command.contains(m)) {
                ActionCategory::Verify
            } else if INSPECT_COMMANDS
                .iter()
                .any(|c| command == *c || command.starts_with(&format!("{c} ")))
            {
                ActionCategory::Inspect
            } else {
                ActionCategory::Execute
            }
        }
        _ => ActionCategory::Execute,
    }
}

/// Coarse class of an action's result, used to compare prediction and outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    Partial,
    Failure,
}

impl OutcomeClass {
    pub const fn value(&self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Partial => 0.5,
            Self::Failure => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "success" | "ok" | "pass" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failure" | "fail" | "error" => Some(Self::Failure),
            _ => None,
        }
    }

    /// Normalized distance in [0, 1] between two outcome classes.
    pub fn distance(&self, other: Self) -> f64 {
        (self.value() - other.value()).abs()
    }
}

/// Evaluation tag assigned when a step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    Pass,
    Partial,
    Fail,
}

impl Evaluation {
    /// Evaluation of an observed outcome against the predicted one.
    pub fn compare(predicted: OutcomeClass, observed: OutcomeClass) -> Self {
        let distance = predicted.distance(observed);
        if distance < 0.25 {
            Self::Pass
        } else if distance < 0.75 {
            Self::Partial
        } else {
            Self::Fail
        }
    }

    /// Target value the confidence average moves toward.
    pub const fn confidence_target(&self) -> f64 {
        match self {
            Self::Pass => 1.0,
            Self::Partial => 0.5,
            Self::Fail => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Partial => "partial",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_category_from_tool() {
        assert_eq!(infer_category("Read", None), ActionCategory::Inspect);
        assert_eq!(infer_category("Edit", None), ActionCategory::Mutate);
        assert_eq!(infer_category("Bash", Some("cargo test --lib")), ActionCategory::Verify);
        assert_eq!(infer_category("Bash", Some("ls -la src")), ActionCategory::Inspect);
        assert_eq!(infer_category("Bash", Some("npm install")), ActionCategory::Execute);
        assert_eq!(infer_category("SomethingNew", None), ActionCategory::Execute);
    }

    #[test]
    fn test_explicit_category_wins() {
        let action = ActionDescriptor::new("Bash")
            .with_command("make deploy")
            .with_category(ActionCategory::Note);
        assert_eq!(action.effective_category(), ActionCategory::Note);
    }

    #[test]
    fn test_evaluation_against_prediction() {
        use OutcomeClass::{Failure, Partial, Success};
        assert_eq!(Evaluation::compare(Success, Success), Evaluation::Pass);
        assert_eq!(Evaluation::compare(Failure, Failure), Evaluation::Pass);
        assert_eq!(Evaluation::compare(Success, Partial), Evaluation::Partial);
        assert_eq!(Evaluation::compare(Success, Failure), Evaluation::Fail);
        assert!((Success.distance(Failure) - 1.0).abs() < f64::EPSILON);
    }
}
