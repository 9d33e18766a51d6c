//! Windowed progress watchers.
//!
//! Each looks only at steps completed since the current phase was entered,
//! so a forced transition starts a fresh window.

use super::{Guardrail, GuardrailContext, GuardrailResult};
use crate::domain::models::{Evaluation, GuardrailBlock, Phase, Remediation};

pub const PROGRESS_CONTRACT: &str = "progress-contract";
pub const NO_NEW_INFORMATION: &str = "no-new-information";
pub const CONFIDENCE_STAGNATION: &str = "confidence-stagnation";

/// Phases in which steps are expected to move observable state.
const WORKING_PHASES: [Phase; 4] = [Phase::Execute, Phase::Validate, Phase::Diagnose, Phase::Simplify];

/// No observable state change in the last N steps requires re-planning.
pub struct ProgressContract;

impl Guardrail for ProgressContract {
    fn name(&self) -> &str {
        PROGRESS_CONTRACT
    }

    fn before_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        if !WORKING_PHASES.contains(&ctx.episode.phase) {
            return GuardrailResult::Allowed;
        }
        let window = ctx.phase_window();
        let n = ctx.config.progress_window;
        if window.len() < n {
            return GuardrailResult::Allowed;
        }
        let stalled = window[window.len() - n..]
            .iter()
            .all(|s| s.outcome.as_ref().is_some_and(|o| !o.state_changed));
        if !stalled {
            return GuardrailResult::Allowed;
        }
        GuardrailResult::Blocked(
            GuardrailBlock::new(
                PROGRESS_CONTRACT,
                format!("no observable state change in the last {n} steps"),
                Remediation::Replan,
            )
            .forcing(Phase::Plan),
        )
    }
}

/// K consecutive steps without new evidence or observations force DIAGNOSE.
pub struct NoNewInformation;

impl Guardrail for NoNewInformation {
    fn name(&self) -> &str {
        NO_NEW_INFORMATION
    }

    fn after_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        if ctx.episode.phase == Phase::Diagnose {
            return GuardrailResult::Allowed;
        }
        let window = ctx.phase_window();
        let k = ctx.config.no_new_info_window;
        if window.len() < k {
            return GuardrailResult::Allowed;
        }
        let starved = window[window.len() - k..]
            .iter()
            .all(|s| s.outcome.as_ref().is_some_and(|o| !o.new_information));
        if !starved {
            return GuardrailResult::Allowed;
        }
        GuardrailResult::Blocked(
            GuardrailBlock::new(
                NO_NEW_INFORMATION,
                format!("{k} consecutive steps produced no new information"),
                Remediation::Diagnose,
            )
            .forcing(Phase::Diagnose),
        )
    }
}

/// Confidence that stops moving while steps keep missing forces a re-plan
/// with alternatives.
pub struct ConfidenceStagnation;

impl Guardrail for ConfidenceStagnation {
    fn name(&self) -> &str {
        CONFIDENCE_STAGNATION
    }

    fn after_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        if ctx.episode.phase == Phase::Plan {
            return GuardrailResult::Allowed;
        }
        let window = ctx.phase_window();
        let w = ctx.config.confidence_window;
        if w == 0 || window.len() < w {
            return GuardrailResult::Allowed;
        }
        let recent: Vec<_> = window[window.len() - w..]
            .iter()
            .filter_map(|s| s.outcome.as_ref())
            .collect();
        if recent.iter().all(|o| o.evaluation == Evaluation::Pass) {
            return GuardrailResult::Allowed;
        }
        let (lo, hi) = recent.iter().fold((f64::MAX, f64::MIN), |(lo, hi), o| {
            (lo.min(o.confidence_after), hi.max(o.confidence_after))
        });
        let delta = hi - lo;
        if delta >= ctx.config.confidence_epsilon {
            return GuardrailResult::Allowed;
        }
        GuardrailResult::Blocked(
            GuardrailBlock::new(
                CONFIDENCE_STAGNATION,
                format!(
                    "confidence moved {delta:.3} over the last {w} steps; revisit the rejected alternatives"
                ),
                Remediation::Replan,
            )
            .forcing(Phase::Plan),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AdviceResponse, Episode, GuardrailConfig, OutcomeClass, Step, TransitionTrigger,
    };
    use crate::services::guardrails::testing::{completed, episode, packet, StepSpec};
    use chrono::Utc;

    fn ctx_result(
        guardrail: &dyn Guardrail,
        episode: &Episode,
        steps: &[Step],
        before: bool,
    ) -> GuardrailResult {
        let advice = AdviceResponse::default();
        let config = GuardrailConfig::default();
        let proposed = packet("Read", None);
        let ctx = GuardrailContext {
            episode,
            steps,
            proposed: before.then_some(&proposed),
            advice: &advice,
            policies: &[],
            config: &config,
            binding_threshold: 0.75,
        };
        if before {
            guardrail.before_step(&ctx)
        } else {
            guardrail.after_step(&ctx)
        }
    }

    fn idle(episode: &Episode, n: u32) -> Vec<Step> {
        (1..=n)
            .map(|i| {
                completed(
                    episode.id,
                    i,
                    StepSpec {
                        new_information: false,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_progress_contract_forces_plan() {
        let episode = episode(Phase::Execute);
        assert!(ctx_result(&ProgressContract, &episode, &idle(&episode, 4), true).is_allowed());
        match ctx_result(&ProgressContract, &episode, &idle(&episode, 5), true) {
            GuardrailResult::Blocked(block) => assert_eq!(block.force_phase, Some(Phase::Plan)),
            other => panic!("expected block, got {other:?}"),
        }
        // Exploration is read-only by definition.
        let exploring = super::super::testing::episode(Phase::Explore);
        assert!(ctx_result(&ProgressContract, &exploring, &idle(&exploring, 8), true).is_allowed());
    }

    #[test]
    fn test_window_resets_on_transition() {
        let mut episode = episode(Phase::Explore);
        let steps = idle(&episode, 5);
        episode.steps_taken = 5;
        episode.force_phase(
            Phase::Execute,
            "go",
            TransitionTrigger::Explicit,
            Utc::now(),
        );
        assert!(ctx_result(&ProgressContract, &episode, &steps, true).is_allowed());
        assert!(ctx_result(&NoNewInformation, &episode, &steps, false).is_allowed());
    }

    #[test]
    fn test_no_new_information_forces_diagnose() {
        let episode = episode(Phase::Execute);
        match ctx_result(&NoNewInformation, &episode, &idle(&episode, 4), false) {
            GuardrailResult::Blocked(block) => assert_eq!(block.force_phase, Some(Phase::Diagnose)),
            other => panic!("expected block, got {other:?}"),
        }
        let mut steps = idle(&episode, 4);
        steps.push(completed(episode.id, 5, StepSpec::default()));
        assert!(ctx_result(&NoNewInformation, &episode, &steps, false).is_allowed());
    }

    #[test]
    fn test_confidence_stagnation() {
        let episode = episode(Phase::Execute);
        let partial = |i| {
            completed(
                episode.id,
                i,
                StepSpec {
                    outcome: OutcomeClass::Partial,
                    confidence_after: 0.5 + f64::from(i) * 0.01,
                    ..Default::default()
                },
            )
        };
        let steps: Vec<Step> = (1..=3).map(partial).collect();
        assert!(ctx_result(&ConfidenceStagnation, &episode, &steps, false).is_blocked());

        // Passing steps with a flat confidence are fine.
        let steps: Vec<Step> = (1..=3)
            .map(|i| completed(episode.id, i, StepSpec::default()))
            .collect();
        assert!(ctx_result(&ConfidenceStagnation, &episode, &steps, false).is_allowed());

        let moving: Vec<Step> = (1..=3)
            .map(|i| {
                completed(
                    episode.id,
                    i,
                    StepSpec {
                        outcome: OutcomeClass::Failure,
                        confidence_after: 0.9 - f64::from(i) * 0.2,
                        ..Default::default()
                    },
                )
            })
            .collect();
        assert!(ctx_result(&ConfidenceStagnation, &episode, &moving, false).is_allowed());
    }
}
