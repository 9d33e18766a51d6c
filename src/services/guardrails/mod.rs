//! Guardrails and watchers.
//!
//! A guardrail is a small, pure check over an immutable [`GuardrailContext`].
//! `before_step` may veto a proposed action; `after_step` runs once a step
//! has completed and may force a phase transition. Guardrails are registered
//! with the [`GuardrailEngine`] and evaluated in the order named by
//! `guardrails.order`; the first block wins.
//!
//! | Guardrail                      | Hook   | Effect                          |
//! |--------------------------------|--------|---------------------------------|
//! | `outcome-enforcement`          | before | requires a falsifiable prediction |
//! | `policy-constraint`            | before | active policy forbids the action |
//! | `evidence-before-modification` | before | diagnostic evidence after failed edits |
//! | `diff-thrash`                  | both   | force SIMPLIFY, freeze target    |
//! | `repeat-error`                 | after  | force DIAGNOSE                   |
//! | `no-new-information`           | after  | force DIAGNOSE                   |
//! | `progress-contract`            | before | force PLAN                       |
//! | `confidence-stagnation`        | after  | force PLAN                       |
//! | `memory-binding`               | before | cite surfaced memory             |

pub mod evidence;
pub mod memory_binding;
pub mod outcome;
pub mod policy;
pub mod progress;
pub mod thrash;

use std::sync::Arc;

use crate::domain::models::{
    ActionCategory, AdviceItem, AdviceResponse, AdviceSource, DecisionPacket, Episode,
    GuardrailBlock, GuardrailConfig, Policy, Step,
};

pub use evidence::EvidenceBeforeModification;
pub use memory_binding::MemoryBinding;
pub use outcome::OutcomeEnforcement;
pub use policy::{glob_matches, PolicyConstraint};
pub use progress::{ConfidenceStagnation, NoNewInformation, ProgressContract};
pub use thrash::{DiffThrash, RepeatError};

/// Result of a guardrail check.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailResult {
    /// Action is allowed.
    Allowed,
    /// Vetoed, or a watcher forcing a transition.
    Blocked(GuardrailBlock),
    /// Allowed, with a note for the caller.
    Warning(String),
}

impl GuardrailResult {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Blocked(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Everything a guardrail may look at. Borrowed and read-only.
pub struct GuardrailContext<'a> {
    pub episode: &'a Episode,
    /// Steps of the episode in sequence order. For `after_step` the step
    /// just completed is the last entry.
    pub steps: &'a [Step],
    /// The proposed action (`before_step` only)
    pub proposed: Option<&'a DecisionPacket>,
    pub advice: &'a AdviceResponse,
    pub policies: &'a [Policy],
    pub config: &'a GuardrailConfig,
    /// Similarity at which semantic advice must be acknowledged
    pub binding_threshold: f64,
}

impl<'a> GuardrailContext<'a> {
    pub fn completed(&self) -> impl DoubleEndedIterator<Item = &'a Step> + 'a {
        self.steps.iter().filter(|s| s.is_completed())
    }

    /// Completed steps taken since the current phase was entered.
    pub fn phase_window(&self) -> Vec<&'a Step> {
        let entered = self.episode.phase_entered_at_step();
        self.completed().filter(|s| s.sequence > entered).collect()
    }

    /// The most recently completed step.
    pub fn last_completed(&self) -> Option<&'a Step> {
        self.completed().next_back()
    }

    pub fn proposed_category(&self) -> Option<ActionCategory> {
        self.proposed.map(|p| p.action.effective_category())
    }

    pub fn proposed_target(&self) -> Option<&'a str> {
        self.proposed.and_then(|p| p.action.target.as_deref())
    }

    /// Advice the step must acknowledge: every trigger match plus semantic
    /// matches at or above the binding threshold.
    pub fn relevant_memory(&self) -> Vec<&'a AdviceItem> {
        self.advice
            .items
            .iter()
            .filter(|i| i.source == AdviceSource::Trigger || i.similarity >= self.binding_threshold)
            .collect()
    }

    /// Sequence of the last step at which `guardrail` forced a transition.
    pub fn last_fired(&self, guardrail: &str) -> u32 {
        use crate::domain::models::TransitionTrigger;
        self.episode
            .phase_history
            .iter()
            .rev()
            .find(|t| matches!(&t.trigger, TransitionTrigger::Guardrail { name } if name == guardrail))
            .map_or(0, |t| t.at_step)
    }
}

/// A pluggable guardrail.
pub trait Guardrail: Send + Sync {
    /// Name used in `guardrails.order` and in block reasons.
    fn name(&self) -> &str;

    fn before_step(&self, _ctx: &GuardrailContext<'_>) -> GuardrailResult {
        GuardrailResult::Allowed
    }

    fn after_step(&self, _ctx: &GuardrailContext<'_>) -> GuardrailResult {
        GuardrailResult::Allowed
    }
}

/// What a pass over the guardrails produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardrailOutcome {
    pub block: Option<GuardrailBlock>,
    pub warnings: Vec<String>,
}

/// Ordered registry of guardrails.
///
/// Order and the disabled set come from the configuration passed to each
/// check, so an episode keeps the ordering it was opened with.
pub struct GuardrailEngine {
    guardrails: Vec<Arc<dyn Guardrail>>,
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl GuardrailEngine {
    pub fn empty() -> Self {
        Self {
            guardrails: Vec::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut engine = Self::empty();
        engine.register(Arc::new(OutcomeEnforcement));
        engine.register(Arc::new(PolicyConstraint));
        engine.register(Arc::new(EvidenceBeforeModification));
        engine.register(Arc::new(DiffThrash));
        engine.register(Arc::new(RepeatError));
        engine.register(Arc::new(NoNewInformation));
        engine.register(Arc::new(ProgressContract));
        engine.register(Arc::new(ConfidenceStagnation));
        engine.register(Arc::new(MemoryBinding));
        engine
    }

    /// Add a guardrail. A guardrail with the same name replaces the old one.
    pub fn register(&mut self, guardrail: Arc<dyn Guardrail>) {
        self.guardrails.retain(|g| g.name() != guardrail.name());
        tracing::debug!(guardrail = guardrail.name(), "guardrail registered");
        self.guardrails.push(guardrail);
    }

    pub fn names(&self) -> Vec<String> {
        self.guardrails.iter().map(|g| g.name().to_string()).collect()
    }

    /// Enabled guardrails in evaluation order. Guardrails the order list does
    /// not name run afterwards, in registration order.
    fn ordered(&self, config: &GuardrailConfig) -> Vec<&Arc<dyn Guardrail>> {
        let mut enabled: Vec<&Arc<dyn Guardrail>> = self
            .guardrails
            .iter()
            .filter(|g| !config.disabled.iter().any(|d| d == g.name()))
            .collect();
        enabled.sort_by_key(|g| {
            config
                .order
                .iter()
                .position(|n| n == g.name())
                .unwrap_or(usize::MAX)
        });
        enabled
    }

    pub fn check_before(&self, ctx: &GuardrailContext<'_>) -> GuardrailOutcome {
        self.run(ctx, |g, ctx| g.before_step(ctx))
    }

    pub fn check_after(&self, ctx: &GuardrailContext<'_>) -> GuardrailOutcome {
        self.run(ctx, |g, ctx| g.after_step(ctx))
    }

    fn run(
        &self,
        ctx: &GuardrailContext<'_>,
        hook: impl Fn(&dyn Guardrail, &GuardrailContext<'_>) -> GuardrailResult,
    ) -> GuardrailOutcome {
        let mut outcome = GuardrailOutcome::default();
        for guardrail in self.ordered(ctx.config) {
            match hook(guardrail.as_ref(), ctx) {
                GuardrailResult::Allowed => {}
                GuardrailResult::Warning(message) => outcome.warnings.push(message),
                GuardrailResult::Blocked(block) => {
                    tracing::warn!(
                        episode_id = %ctx.episode.id,
                        guardrail = %block.guardrail,
                        reason = %block.reason,
                        force_phase = ?block.force_phase,
                        "guardrail fired"
                    );
                    outcome.block = Some(block);
                    break;
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builders for guardrail unit tests.

    use chrono::Utc;
    use uuid::Uuid;

    use crate::domain::models::{
        ActionDescriptor, Budget, DecisionPacket, Episode, Evaluation, OutcomeClass, Phase,
        Prediction, Step, StepOutcome,
    };

    pub fn episode(phase: Phase) -> Episode {
        let mut episode = Episode::new(
            "session",
            "goal",
            "criterion",
            Budget {
                max_steps: 100,
                max_seconds: 3600,
            },
            Utc::now(),
        );
        episode.phase = phase;
        episode
    }

    pub fn packet(tool: &str, target: Option<&str>) -> DecisionPacket {
        let mut action = ActionDescriptor::new(tool);
        action.target = target.map(str::to_string);
        DecisionPacket::new(
            "do the thing",
            action,
            Prediction::new("it works", OutcomeClass::Success),
            0.6,
        )
    }

    pub struct StepSpec<'a> {
        pub tool: &'a str,
        pub target: Option<&'a str>,
        pub outcome: OutcomeClass,
        pub state_changed: bool,
        pub new_information: bool,
        pub validated: bool,
        pub error: Option<&'a str>,
        pub confidence_after: f64,
    }

    impl Default for StepSpec<'_> {
        fn default() -> Self {
            Self {
                tool: "Read",
                target: None,
                outcome: OutcomeClass::Success,
                state_changed: false,
                new_information: true,
                validated: false,
                error: None,
                confidence_after: 0.6,
            }
        }
    }

    pub fn completed(episode_id: Uuid, sequence: u32, spec: StepSpec<'_>) -> Step {
        let now = Utc::now();
        let mut step = Step::new(
            episode_id,
            sequence,
            Phase::Execute,
            packet(spec.tool, spec.target),
            now,
            now,
        );
        let evaluation = Evaluation::compare(OutcomeClass::Success, spec.outcome);
        step.complete(
            StepOutcome {
                observed: format!("step {sequence}"),
                outcome: spec.outcome,
                evaluation,
                surprise: OutcomeClass::Success.distance(spec.outcome),
                lesson: "lesson".into(),
                confidence_after: spec.confidence_after,
                validation_method: None,
                validated: spec.validated,
                state_changed: spec.state_changed,
                new_information: spec.new_information,
                error_signature: spec.error.map(crate::domain::models::step::error_signature),
                evidence_ids: vec![],
                unblocked: false,
                termination: None,
                completion_event_id: None,
            },
            now,
        )
        .unwrap();
        step
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::domain::models::{Phase, Remediation};

    struct AlwaysBlocks(&'static str);

    impl Guardrail for AlwaysBlocks {
        fn name(&self) -> &str {
            self.0
        }

        fn before_step(&self, _ctx: &GuardrailContext<'_>) -> GuardrailResult {
            GuardrailResult::Blocked(GuardrailBlock::new(self.0, "no", Remediation::Replan))
        }
    }

    struct Warns;

    impl Guardrail for Warns {
        fn name(&self) -> &str {
            "team:warns"
        }

        fn before_step(&self, _ctx: &GuardrailContext<'_>) -> GuardrailResult {
            GuardrailResult::Warning("careful".into())
        }
    }

    fn check(engine: &GuardrailEngine, config: &GuardrailConfig) -> GuardrailOutcome {
        let episode = episode(Phase::Execute);
        let packet = packet("Read", None);
        let advice = AdviceResponse::default();
        let ctx = GuardrailContext {
            episode: &episode,
            steps: &[],
            proposed: Some(&packet),
            advice: &advice,
            policies: &[],
            config,
            binding_threshold: 0.75,
        };
        engine.check_before(&ctx)
    }

    #[test]
    fn test_builtin_names_match_default_order() {
        let engine = GuardrailEngine::with_builtins();
        assert_eq!(
            engine.names(),
            crate::domain::models::DEFAULT_GUARDRAIL_ORDER
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_first_block_wins_in_configured_order() {
        let mut engine = GuardrailEngine::empty();
        engine.register(Arc::new(Warns));
        engine.register(Arc::new(AlwaysBlocks("team:a")));
        engine.register(Arc::new(AlwaysBlocks("team:b")));

        let mut config = GuardrailConfig {
            order: vec!["team:b".into(), "team:a".into()],
            ..Default::default()
        };
        let outcome = check(&engine, &config);
        assert_eq!(outcome.block.unwrap().guardrail, "team:b");
        // Unnamed guardrails run last, so the warning never got a turn.
        assert!(outcome.warnings.is_empty());

        config.disabled = vec!["team:b".into()];
        assert_eq!(check(&engine, &config).block.unwrap().guardrail, "team:a");

        config.order = vec!["team:warns".into()];
        config.disabled = vec!["team:a".into(), "team:b".into()];
        let outcome = check(&engine, &config);
        assert!(outcome.block.is_none());
        assert_eq!(outcome.warnings, vec!["careful".to_string()]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut engine = GuardrailEngine::empty();
        engine.register(Arc::new(AlwaysBlocks("team:a")));
        engine.register(Arc::new(AlwaysBlocks("team:a")));
        assert_eq!(engine.names().len(), 1);
    }
}
