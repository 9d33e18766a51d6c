//! Outcome enforcement: no step without a falsifiable prediction.
//!
//! The completion half (an observed outcome class is required before a step
//! can be evaluated) is enforced by the governor, which rejects the
//! completion with `EvaluationMissing`.

use super::{Guardrail, GuardrailContext, GuardrailResult};
use crate::domain::models::{GuardrailBlock, Remediation};

pub const NAME: &str = "outcome-enforcement";

pub struct OutcomeEnforcement;

impl Guardrail for OutcomeEnforcement {
    fn name(&self) -> &str {
        NAME
    }

    fn before_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        let Some(packet) = ctx.proposed else {
            return GuardrailResult::Allowed;
        };
        if packet.prediction.is_falsifiable() {
            return GuardrailResult::Allowed;
        }
        GuardrailResult::Blocked(GuardrailBlock::new(
            NAME,
            "step has no falsifiable prediction",
            Remediation::SupplyPrediction,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AdviceResponse, GuardrailConfig, Phase};
    use crate::services::guardrails::testing::{episode, packet};

    #[test]
    fn test_blank_prediction_blocks() {
        let episode = episode(Phase::Explore);
        let mut proposed = packet("Read", None);
        let advice = AdviceResponse::default();
        let config = GuardrailConfig::default();
        let check = |p: &crate::domain::models::DecisionPacket| {
            OutcomeEnforcement.before_step(&GuardrailContext {
                episode: &episode,
                steps: &[],
                proposed: Some(p),
                advice: &advice,
                policies: &[],
                config: &config,
                binding_threshold: 0.75,
            })
        };
        assert!(check(&proposed).is_allowed());
        proposed.prediction.statement = "   ".into();
        assert!(check(&proposed).is_blocked());
    }
}
