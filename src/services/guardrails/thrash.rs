//! Watchers for churn: the same target edited over and over, and the same
//! error coming back.

use super::{Guardrail, GuardrailContext, GuardrailResult};
use crate::domain::models::{GuardrailBlock, OutcomeClass, Phase, Remediation};

pub const DIFF_THRASH: &str = "diff-thrash";
pub const REPEAT_ERROR: &str = "repeat-error";

/// Edits of one target without a passing validation in between force
/// SIMPLIFY and freeze the target. Frozen targets stay blocked until they
/// are released.
pub struct DiffThrash;

impl Guardrail for DiffThrash {
    fn name(&self) -> &str {
        DIFF_THRASH
    }

    fn before_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        let (Some(category), Some(target)) = (ctx.proposed_category(), ctx.proposed_target()) else {
            return GuardrailResult::Allowed;
        };
        if category.is_mutating() && ctx.episode.is_frozen(target) {
            return GuardrailResult::Blocked(GuardrailBlock::new(
                DIFF_THRASH,
                format!("{target} is frozen after repeated edits"),
                Remediation::ReleaseTarget {
                    target: target.to_string(),
                },
            ));
        }
        GuardrailResult::Allowed
    }

    fn after_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        let Some(step) = ctx.last_completed() else {
            return GuardrailResult::Allowed;
        };
        let Some(target) = step.target() else {
            return GuardrailResult::Allowed;
        };
        if !step.category().is_mutating() {
            return GuardrailResult::Allowed;
        }

        let last_pass = ctx
            .completed()
            .filter(|s| {
                s.outcome
                    .as_ref()
                    .is_some_and(|o| o.validated && o.outcome == OutcomeClass::Success)
            })
            .map(|s| s.sequence)
            .max()
            .unwrap_or(0);
        let since = last_pass.max(ctx.last_fired(DIFF_THRASH));

        let edits = ctx
            .completed()
            .filter(|s| s.sequence > since && s.category().is_mutating() && s.target() == Some(target))
            .count();
        if edits < ctx.config.diff_thrash_threshold {
            return GuardrailResult::Allowed;
        }

        GuardrailResult::Blocked(
            GuardrailBlock::new(
                DIFF_THRASH,
                format!("{target} modified {edits} times without a passing validation"),
                Remediation::Simplify {
                    target: target.to_string(),
                },
            )
            .forcing(Phase::Simplify)
            .freezing(target),
        )
    }
}

/// The same normalized error signature recurring forces DIAGNOSE.
pub struct RepeatError;

impl Guardrail for RepeatError {
    fn name(&self) -> &str {
        REPEAT_ERROR
    }

    fn after_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        if ctx.episode.phase == Phase::Diagnose {
            return GuardrailResult::Allowed;
        }
        let Some(signature) = ctx
            .last_completed()
            .and_then(|s| s.outcome.as_ref())
            .and_then(|o| o.error_signature.as_deref())
        else {
            return GuardrailResult::Allowed;
        };

        let occurrences = ctx
            .completed()
            .filter(|s| {
                s.outcome
                    .as_ref()
                    .and_then(|o| o.error_signature.as_deref())
                    == Some(signature)
            })
            .count();
        if occurrences < ctx.config.repeat_error_threshold {
            return GuardrailResult::Allowed;
        }

        GuardrailResult::Blocked(
            GuardrailBlock::new(
                REPEAT_ERROR,
                format!("error '{signature}' occurred {occurrences} times"),
                Remediation::Diagnose,
            )
            .forcing(Phase::Diagnose),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AdviceResponse, Episode, GuardrailConfig, Step, TransitionTrigger,
    };
    use crate::services::guardrails::testing::{completed, episode, packet, StepSpec};
    use chrono::Utc;

    fn edit(episode: &Episode, sequence: u32) -> Step {
        completed(
            episode.id,
            sequence,
            StepSpec {
                tool: "Edit",
                target: Some("src/lib.rs"),
                state_changed: true,
                ..Default::default()
            },
        )
    }

    fn after(guardrail: &dyn Guardrail, episode: &Episode, steps: &[Step]) -> GuardrailResult {
        let advice = AdviceResponse::default();
        let config = GuardrailConfig::default();
        guardrail.after_step(&GuardrailContext {
            episode,
            steps,
            proposed: None,
            advice: &advice,
            policies: &[],
            config: &config,
            binding_threshold: 0.75,
        })
    }

    #[test]
    fn test_third_edit_forces_simplify_and_freezes() {
        let episode = episode(Phase::Execute);
        let mut steps = vec![edit(&episode, 1), edit(&episode, 2)];
        assert!(after(&DiffThrash, &episode, &steps).is_allowed());

        steps.push(edit(&episode, 3));
        match after(&DiffThrash, &episode, &steps) {
            GuardrailResult::Blocked(block) => {
                assert_eq!(block.force_phase, Some(Phase::Simplify));
                assert_eq!(block.freeze_target.as_deref(), Some("src/lib.rs"));
            }
            other => panic!("expected diff-thrash, got {other:?}"),
        }
    }

    #[test]
    fn test_passing_validation_resets_the_count() {
        let episode = episode(Phase::Execute);
        let verify = completed(
            episode.id,
            3,
            StepSpec {
                tool: "Bash",
                validated: true,
                ..Default::default()
            },
        );
        let steps = vec![edit(&episode, 1), edit(&episode, 2), verify, edit(&episode, 4)];
        assert!(after(&DiffThrash, &episode, &steps).is_allowed());
    }

    #[test]
    fn test_frozen_target_blocks_mutation_only() {
        let mut episode = episode(Phase::Execute);
        episode.freeze_target("src/lib.rs");
        let advice = AdviceResponse::default();
        let config = GuardrailConfig::default();
        let check = |p: &crate::domain::models::DecisionPacket| {
            DiffThrash.before_step(&GuardrailContext {
                episode: &episode,
                steps: &[],
                proposed: Some(p),
                advice: &advice,
                policies: &[],
                config: &config,
                binding_threshold: 0.75,
            })
        };
        assert!(check(&packet("Edit", Some("src/lib.rs"))).is_blocked());
        assert!(check(&packet("Read", Some("src/lib.rs"))).is_allowed());
        assert!(check(&packet("Edit", Some("src/main.rs"))).is_allowed());
    }

    #[test]
    fn test_repeat_error_on_second_occurrence() {
        let mut episode = episode(Phase::Execute);
        let failing = |sequence, error| {
            completed(
                episode.id,
                sequence,
                StepSpec {
                    tool: "Bash",
                    outcome: OutcomeClass::Failure,
                    error: Some(error),
                    ..Default::default()
                },
            )
        };
        let mut steps = vec![
            completed(episode.id, 1, StepSpec::default()),
            failing(2, "ConnectionRefused:db"),
            completed(episode.id, 3, StepSpec::default()),
            completed(episode.id, 4, StepSpec::default()),
        ];
        assert!(after(&RepeatError, &episode, &steps).is_allowed());

        steps.push(failing(5, "connectionrefused:DB"));
        match after(&RepeatError, &episode, &steps) {
            GuardrailResult::Blocked(block) => assert_eq!(block.force_phase, Some(Phase::Diagnose)),
            other => panic!("expected repeat-error, got {other:?}"),
        }

        episode.force_phase(
            Phase::Diagnose,
            "repeat",
            TransitionTrigger::Guardrail {
                name: REPEAT_ERROR.into(),
            },
            Utc::now(),
        );
        assert!(after(&RepeatError, &episode, &steps).is_allowed());
    }
}
