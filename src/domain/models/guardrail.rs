//! Guardrail verdict types shared by the governor and the error taxonomy.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::Phase;

/// What the caller must do before re-submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remediation {
    CiteMemory { ids: Vec<Uuid> },
    SupplyPrediction,
    Replan,
    Diagnose,
    Simplify { target: String },
    RecordDiagnosticEvidence { target: String },
    ComplyWithPolicy { policy_id: Uuid },
    ReleaseTarget { target: String },
}

impl Remediation {
    pub fn hint(&self) -> String {
        match self {
            Self::CiteMemory { ids } => format!(
                "cite at least one of [{}] or declare none relevant after reviewing all of them",
                ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
            ),
            Self::SupplyPrediction => {
                "state a falsifiable prediction with an expected outcome".to_string()
            }
            Self::Replan => "return to PLAN and choose a different approach".to_string(),
            Self::Diagnose => {
                "switch to DIAGNOSE and isolate the failure before retrying".to_string()
            }
            Self::Simplify { target } => {
                format!("switch to SIMPLIFY; {target} is frozen until released")
            }
            Self::RecordDiagnosticEvidence { target } => format!(
                "record a reproduction, narrowed scope or discriminating signal for {target}"
            ),
            Self::ComplyWithPolicy { policy_id } => {
                format!("choose an action permitted by policy {policy_id}")
            }
            Self::ReleaseTarget { target } => {
                format!("release {target} explicitly before modifying it again")
            }
        }
    }
}

/// A veto or redirect issued by a guardrail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailBlock {
    pub guardrail: String,
    pub reason: String,
    pub remediation: Remediation,
    /// Phase the episode is moved to
    pub force_phase: Option<Phase>,
    /// Target frozen for the rest of the episode
    pub freeze_target: Option<String>,
}

impl GuardrailBlock {
    pub fn new(guardrail: impl Into<String>, reason: impl Into<String>, remediation: Remediation) -> Self {
        Self {
            guardrail: guardrail.into(),
            reason: reason.into(),
            remediation,
            force_phase: None,
            freeze_target: None,
        }
    }

    pub fn forcing(mut self, phase: Phase) -> Self {
        self.force_phase = Some(phase);
        self
    }

    pub fn freezing(mut self, target: impl Into<String>) -> Self {
        self.freeze_target = Some(target.into());
        self
    }
}
