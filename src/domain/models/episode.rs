//! Episode domain model.
//!
//! An episode is a bounded unit of work. It is mutated only by the governor,
//! closed exactly once, and immutable after closure apart from its completion
//! record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::evidence::EvidenceRef;
use super::phase::Phase;
use crate::domain::errors::{DomainError, DomainResult};

/// Resource budget of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub max_steps: u32,
    pub max_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Open,
    Closed,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// Reached CONSOLIDATE
    Succeeded,
    /// Reached HALT, by request or cancellation
    Aborted,
}

/// What caused a phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionTrigger {
    /// Phase-completion signal from the action layer
    Explicit,
    Guardrail { name: String },
    Budget,
    Storage,
    Cancellation,
    Approval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
    pub trigger: TransitionTrigger,
    /// Steps taken when the transition happened
    pub at_step: u32,
    pub at: DateTime<Utc>,
}

/// Append-only record written when the episode closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub outcome: TerminalOutcome,
    pub summary: String,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    /// Host session this episode belongs to
    pub session_id: String,
    pub goal: String,
    pub success_criterion: String,
    pub constraints: Vec<String>,
    pub budget: Budget,
    pub phase: Phase,
    pub phase_history: Vec<PhaseTransition>,
    pub status: EpisodeStatus,
    pub steps_taken: u32,
    /// Step currently between begin and complete
    pub active_step: Option<Uuid>,
    /// Targets frozen by the diff-thrash watcher
    pub frozen_targets: BTreeSet<String>,
    pub evidence_refs: Vec<EvidenceRef>,
    /// Set when canonical storage could not be written
    pub unpersisted: bool,
    pub completion: Option<CompletionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(
        session_id: impl Into<String>,
        goal: impl Into<String>,
        success_criterion: impl Into<String>,
        budget: Budget,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            goal: goal.into(),
            success_criterion: success_criterion.into(),
            constraints: Vec::new(),
            budget,
            phase: Phase::Explore,
            phase_history: Vec::new(),
            status: EpisodeStatus::Open,
            steps_taken: 0,
            active_step: None,
            frozen_targets: BTreeSet::new(),
            evidence_refs: Vec::new(),
            unpersisted: false,
            completion: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == EpisodeStatus::Open
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_seconds().max(0) as u64
    }

    /// Reason the budget is exhausted, if it is.
    pub fn budget_exhausted(&self, now: DateTime<Utc>) -> Option<String> {
        if self.steps_taken >= self.budget.max_steps {
            return Some(format!(
                "{} of {} steps used",
                self.steps_taken, self.budget.max_steps
            ));
        }
        let elapsed = self.elapsed_secs(now);
        if elapsed >= self.budget.max_seconds {
            return Some(format!(
                "{elapsed}s of {}s wall-clock budget used",
                self.budget.max_seconds
            ));
        }
        None
    }

    /// Fraction of the tighter budget dimension already used.
    pub fn budget_ratio(&self, now: DateTime<Utc>) -> f64 {
        let steps = f64::from(self.steps_taken) / f64::from(self.budget.max_steps.max(1));
        let secs = self.elapsed_secs(now) as f64 / self.budget.max_seconds.max(1) as f64;
        steps.max(secs)
    }

    /// Steps taken when the current phase was entered.
    pub fn phase_entered_at_step(&self) -> u32 {
        self.phase_history.last().map_or(0, |t| t.at_step)
    }

    /// Explicit transition, validated against the transition table.
    pub fn transition(
        &mut self,
        to: Phase,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !self.is_open() {
            return Err(DomainError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
                reason: "episode is closed".to_string(),
            });
        }
        if !self.phase.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
                reason: "not in the transition table".to_string(),
            });
        }
        self.record_transition(to, reason.into(), TransitionTrigger::Explicit, now);
        Ok(())
    }

    /// Forced transition. Bypasses the table but never leaves a terminal phase.
    /// Returns whether the phase changed.
    pub fn force_phase(
        &mut self,
        to: Phase,
        reason: impl Into<String>,
        trigger: TransitionTrigger,
        now: DateTime<Utc>,
    ) -> bool {
        if self.phase.is_terminal() || self.phase == to {
            return false;
        }
        self.record_transition(to, reason.into(), trigger, now);
        true
    }

    fn record_transition(
        &mut self,
        to: Phase,
        reason: String,
        trigger: TransitionTrigger,
        now: DateTime<Utc>,
    ) {
        self.phase_history.push(PhaseTransition {
            from: self.phase,
            to,
            reason,
            trigger,
            at_step: self.steps_taken,
            at: now,
        });
        self.phase = to;
        self.updated_at = now;
    }

    pub fn freeze_target(&mut self, target: impl Into<String>) {
        self.frozen_targets.insert(target.into());
    }

    pub fn release_target(&mut self, target: &str) -> bool {
        self.frozen_targets.remove(target)
    }

    pub fn is_frozen(&self, target: &str) -> bool {
        self.frozen_targets.contains(target)
    }

    /// Extend the budget after external approval and return to PLAN.
    pub fn approve_escalation(
        &mut self,
        extra_steps: u32,
        extra_seconds: u64,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.phase != Phase::Escalate {
            return Err(DomainError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: Phase::Plan.to_string(),
                reason: "episode is not awaiting escalation approval".to_string(),
            });
        }
        self.budget.max_steps = self.budget.max_steps.saturating_add(extra_steps);
        self.budget.max_seconds = self.budget.max_seconds.saturating_add(extra_seconds);
        self.record_transition(
            Phase::Plan,
            format!("escalation approved: +{extra_steps} steps, +{extra_seconds}s"),
            TransitionTrigger::Approval,
            now,
        );
        Ok(())
    }

    /// Close the episode. Closing twice is an error.
    pub fn close(
        &mut self,
        outcome: TerminalOutcome,
        summary: impl Into<String>,
        trigger: TransitionTrigger,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !self.is_open() {
            return Err(DomainError::InvalidStateTransition {
                from: EpisodeStatus::Closed.as_str().to_string(),
                to: EpisodeStatus::Closed.as_str().to_string(),
                reason: format!("episode {} is already closed", self.id),
            });
        }
        let terminal = match outcome {
            TerminalOutcome::Succeeded => Phase::Consolidate,
            TerminalOutcome::Aborted => Phase::Halt,
        };
        let summary = summary.into();
        if self.phase != terminal && !self.phase.is_terminal() {
            self.record_transition(terminal, summary.clone(), trigger, now);
        }
        self.status = EpisodeStatus::Closed;
        self.active_step = None;
        self.completion = Some(CompletionRecord {
            outcome,
            summary,
            closed_at: now,
        });
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn episode(max_steps: u32) -> Episode {
        Episode::new(
            "s1",
            "goal",
            "tests pass",
            Budget {
                max_steps,
                max_seconds: 60,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_explicit_transition_follows_table() {
        let mut ep = episode(5);
        let now = Utc::now();
        assert!(ep.transition(Phase::Execute, "skip", now).is_err());
        ep.transition(Phase::Plan, "explored", now).unwrap();
        ep.transition(Phase::Execute, "planned", now).unwrap();
        assert_eq!(ep.phase, Phase::Execute);
        assert_eq!(ep.phase_history.len(), 2);
    }

    #[test]
    fn test_forced_transition_never_leaves_terminal() {
        let mut ep = episode(5);
        let now = Utc::now();
        assert!(ep.force_phase(Phase::Diagnose, "repeat", TransitionTrigger::Budget, now));
        ep.close(TerminalOutcome::Aborted, "stop", TransitionTrigger::Cancellation, now)
            .unwrap();
        assert_eq!(ep.phase, Phase::Halt);
        assert!(!ep.force_phase(Phase::Plan, "nope", TransitionTrigger::Budget, now));
        assert!(ep.close(TerminalOutcome::Aborted, "again", TransitionTrigger::Explicit, now).is_err());
    }

    #[test]
    fn test_budget_exhaustion_and_approval() {
        let mut ep = episode(3);
        let now = ep.created_at;
        ep.steps_taken = 3;
        assert!(ep.budget_exhausted(now).is_some());
        assert!(ep.approve_escalation(2, 0, now).is_err());
        ep.force_phase(Phase::Escalate, "budget", TransitionTrigger::Budget, now);
        ep.approve_escalation(2, 0, now).unwrap();
        assert_eq!(ep.phase, Phase::Plan);
        assert!(ep.budget_exhausted(now).is_none());
        assert!(ep.budget_exhausted(now + Duration::seconds(61)).is_some());
    }
}
