//! Evidence before modification: after repeated failed mutations of a
//! target, further mutation needs a diagnostic artifact recorded since the
//! last failure.

use super::{Guardrail, GuardrailContext, GuardrailResult};
use crate::domain::models::{GuardrailBlock, Remediation};

pub const NAME: &str = "evidence-before-modification";

pub struct EvidenceBeforeModification;

impl Guardrail for EvidenceBeforeModification {
    fn name(&self) -> &str {
        NAME
    }

    fn before_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        let (Some(category), Some(target)) = (ctx.proposed_category(), ctx.proposed_target()) else {
            return GuardrailResult::Allowed;
        };
        if !category.is_mutating() {
            return GuardrailResult::Allowed;
        }

        let failures: Vec<u32> = ctx
            .completed()
            .filter(|s| s.target() == Some(target) && s.is_failed_mutation())
            .map(|s| s.sequence)
            .collect();
        if failures.len() < ctx.config.evidence_retry_limit {
            return GuardrailResult::Allowed;
        }
        let last_failure = failures.iter().copied().max().unwrap_or(0);

        let diagnosed = ctx.episode.evidence_refs.iter().any(|r| {
            r.diagnostic.is_some()
                && r.target.as_deref() == Some(target)
                && r.step_sequence > last_failure
        });
        if diagnosed {
            return GuardrailResult::Allowed;
        }

        GuardrailResult::Blocked(GuardrailBlock::new(
            NAME,
            format!(
                "{} failed modifications of {target} without diagnostic evidence",
                failures.len()
            ),
            Remediation::RecordDiagnosticEvidence {
                target: target.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AdviceResponse, DiagnosticKind, EvidenceKind, EvidenceRef, GuardrailConfig, OutcomeClass,
        Phase,
    };
    use crate::services::guardrails::testing::{completed, episode, packet, StepSpec};
    use uuid::Uuid;

    fn failed_edit(episode_id: Uuid, sequence: u32) -> crate::domain::models::Step {
        completed(
            episode_id,
            sequence,
            StepSpec {
                tool: "Edit",
                target: Some("src/db.rs"),
                outcome: OutcomeClass::Failure,
                error: Some("compile error"),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_requires_fresh_diagnostic_evidence() {
        let mut episode = episode(Phase::Execute);
        let steps = vec![failed_edit(episode.id, 1), failed_edit(episode.id, 2)];
        let advice = AdviceResponse::default();
        let config = GuardrailConfig::default();
        let edit = packet("Edit", Some("src/db.rs"));
        let read = packet("Read", Some("src/db.rs"));

        let check = |episode: &crate::domain::models::Episode,
                     p: &crate::domain::models::DecisionPacket| {
            EvidenceBeforeModification.before_step(&GuardrailContext {
                episode,
                steps: &steps,
                proposed: Some(p),
                advice: &advice,
                policies: &[],
                config: &config,
                binding_threshold: 0.75,
            })
        };

        assert!(check(&episode, &edit).is_blocked());
        assert!(check(&episode, &read).is_allowed());

        // Diagnostic evidence from before the last failure does not count.
        let mut stale = EvidenceRef {
            evidence_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            step_sequence: 1,
            kind: EvidenceKind::TestResult,
            diagnostic: Some(DiagnosticKind::Reproduction),
            target: Some("src/db.rs".into()),
        };
        episode.evidence_refs.push(stale.clone());
        assert!(check(&episode, &edit).is_blocked());

        stale.step_sequence = 3;
        episode.evidence_refs.push(stale);
        assert!(check(&episode, &edit).is_allowed());
    }

    #[test]
    fn test_one_failure_is_not_enough() {
        let episode = episode(Phase::Execute);
        let steps = vec![failed_edit(episode.id, 1)];
        let advice = AdviceResponse::default();
        let config = GuardrailConfig::default();
        let edit = packet("Edit", Some("src/db.rs"));
        let result = EvidenceBeforeModification.before_step(&GuardrailContext {
            episode: &episode,
            steps: &steps,
            proposed: Some(&edit),
            advice: &advice,
            policies: &[],
            config: &config,
            binding_threshold: 0.75,
        });
        assert!(result.is_allowed());
    }
}
