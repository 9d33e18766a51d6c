//! Episode governor: the step/episode state machine.
//!
//! Every action passes through `begin_step` (budget, phase allow-list,
//! retrieval, guardrails) and `complete_step` (evidence, evaluation, surprise,
//! lesson, confidence, importance gate, watchers). Work on one episode is
//! serialized by a per-episode mutex; independent episodes proceed
//! concurrently.
//!
//! Live episodes are held in memory and written through to the episode
//! repository with exponential backoff. When storage stays unreachable the
//! episode is flagged `unpersisted`, forced to ESCALATE and retried by
//! [`Governor::flush_pending`]; the in-memory outcome is never dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, GovernanceError, GovernanceResult};
use crate::domain::models::insight::text_fingerprint;
use crate::domain::models::step::{error_signature, synthesize_lesson, truncate_chars};
use crate::domain::models::{
    ActionCategory, AdviceResponse, AdviceSource, Budget, Config, DecisionPacket, Episode,
    Evaluation, EvidenceInput, GuardrailBlock, ImportanceSignals, Insight, InsightKind,
    Observation, OutcomeClass, Phase, PrecisionMode, Step, StepOutcome, TerminalOutcome,
    Termination, TransitionTrigger,
};
use crate::domain::ports::{
    DistillationRepository, EmbeddingProvider, EpisodeRepository, EvidenceRepository,
    InsightRepository, PolicyRepository, TriggerRuleRepository, VectorStore,
};
use crate::services::distillation::{DistillationEngine, DistillationReport};
use crate::services::embedding_index::{EmbeddingIndex, KIND_INSIGHT};
use crate::services::event_bus::{GovernanceEventBus, GovernancePayload};
use crate::services::evidence_store::EvidenceStore;
use crate::services::guardrails::{Guardrail, GuardrailContext, GuardrailEngine};
use crate::services::importance_gate::ImportanceGate;
use crate::services::policy_service::PolicyService;
use crate::services::retrieval::RetrievalEngine;
use crate::services::trigger_rules::TriggerRuleEngine;

const MAX_LESSON_CHARS: usize = 240;
const MAX_STEP_TIMEOUT_SECS: u64 = 365 * 24 * 3600;
const TIMEOUT_MESSAGE: &str = "step timed out";

/// Stores and providers the governor is built from.
pub struct GovernorStores {
    pub episodes: Arc<dyn EpisodeRepository>,
    pub insights: Arc<dyn InsightRepository>,
    pub distillations: Arc<dyn DistillationRepository>,
    pub evidence: Arc<dyn EvidenceRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub triggers: Arc<dyn TriggerRuleRepository>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

/// Result of a successful `begin_step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepHandle {
    pub step: Step,
    pub advice: AdviceResponse,
    /// Non-blocking guardrail output, budget and degradation notices
    pub warnings: Vec<String>,
    /// The step already existed for this source event
    pub replayed: bool,
}

/// Result of completing a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Step,
    pub insight_id: Uuid,
    pub importance: f64,
    pub durable: bool,
    /// Watcher that forced a transition after this step
    pub watcher: Option<GuardrailBlock>,
    /// Phase after the watchers ran
    pub phase: Phase,
    pub persisted: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseReport {
    pub episode: Episode,
    pub distillation: Option<DistillationReport>,
    pub persisted: bool,
}

struct LiveEpisode {
    episode: Episode,
    steps: Vec<Step>,
    /// Snapshot taken when the episode was opened or loaded
    config: Arc<Config>,
    /// Steps written since the last successful persist
    dirty: BTreeSet<Uuid>,
    unsaved_insights: Vec<Insight>,
}

type LiveHandle = Arc<Mutex<LiveEpisode>>;

pub struct Governor {
    episodes: Arc<dyn EpisodeRepository>,
    insights: Arc<dyn InsightRepository>,
    index: Arc<EmbeddingIndex>,
    evidence: Arc<EvidenceStore>,
    triggers: Arc<TriggerRuleEngine>,
    retrieval: Arc<RetrievalEngine>,
    policies: Arc<PolicyService>,
    distillation: Arc<DistillationEngine>,
    bus: Arc<GovernanceEventBus>,
    guardrails: RwLock<GuardrailEngine>,
    config: StdRwLock<Arc<Config>>,
    live: StdMutex<HashMap<Uuid, LiveHandle>>,
    /// Open episode per session
    sessions: StdMutex<HashMap<String, Uuid>>,
    /// Episodes whose last write failed
    pending: StdMutex<HashSet<Uuid>>,
    /// Closed episodes whose distillation failed
    undistilled: StdMutex<HashSet<Uuid>>,
}

impl Governor {
    pub fn new(stores: GovernorStores, config: Config, bus: Arc<GovernanceEventBus>) -> Self {
        let index = Arc::new(EmbeddingIndex::new(stores.embedder, stores.vectors));
        let triggers = Arc::new(TriggerRuleEngine::new(stores.triggers));
        let policies = Arc::new(PolicyService::new(stores.policies));
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::clone(&triggers),
            Arc::clone(&index),
            Arc::clone(&stores.insights),
            Arc::clone(&stores.distillations),
        ));
        let distillation = Arc::new(DistillationEngine::new(
            stores.distillations,
            Arc::clone(&stores.insights),
            Arc::clone(&index),
            Arc::clone(&triggers),
            Arc::clone(&policies),
            Arc::clone(&bus),
        ));
        Self {
            episodes: stores.episodes,
            insights: stores.insights,
            index,
            evidence: Arc::new(EvidenceStore::new(stores.evidence)),
            triggers,
            retrieval,
            policies,
            distillation,
            bus,
            guardrails: RwLock::new(GuardrailEngine::with_builtins()),
            config: StdRwLock::new(Arc::new(config)),
            live: StdMutex::new(HashMap::new()),
            sessions: StdMutex::new(HashMap::new()),
            pending: StdMutex::new(HashSet::new()),
            undistilled: StdMutex::new(HashSet::new()),
        }
    }

    /// Load stored trigger rules into the matcher.
    pub async fn load_rules(&self) -> DomainResult<usize> {
        self.triggers.reload().await
    }

    // ------------------------------------------------------------------
    // Episode lifecycle
    // ------------------------------------------------------------------

    /// Open an episode. The budget defaults to the configured one.
    pub async fn open_episode(
        &self,
        session_id: &str,
        goal: &str,
        success_criterion: &str,
        constraints: Vec<String>,
        budget: Option<Budget>,
    ) -> GovernanceResult<Episode> {
        if goal.trim().is_empty() {
            return Err(DomainError::ValidationFailed("goal must not be empty".into()).into());
        }
        let config = self.config_snapshot();
        let budget = budget.unwrap_or(Budget {
            max_steps: config.budget.max_steps,
            max_seconds: config.budget.max_seconds,
        });
        if budget.max_steps == 0 || budget.max_seconds == 0 {
            return Err(DomainError::ValidationFailed("budget must allow at least one step".into()).into());
        }
        let episode = Episode::new(session_id, goal, success_criterion, budget, Utc::now())
            .with_constraints(constraints);
        let id = episode.id;

        let handle = Arc::new(Mutex::new(LiveEpisode {
            episode,
            steps: Vec::new(),
            config,
            dirty: BTreeSet::new(),
            unsaved_insights: Vec::new(),
        }));
        lock(&self.live).insert(id, Arc::clone(&handle));
        lock(&self.sessions).insert(session_id.to_string(), id);

        let mut guard = handle.lock().await;
        let live = &mut *guard;
        self.persist(live).await;
        self.bus.publish(
            Some(id),
            GovernancePayload::EpisodeOpened {
                session_id: session_id.to_string(),
                goal: goal.to_string(),
            },
        );
        tracing::info!(episode_id = %id, session_id, goal, "episode opened");
        Ok(live.episode.clone())
    }

    /// Open episode for a host session, if any.
    pub async fn open_episode_for_session(&self, session_id: &str) -> DomainResult<Option<Uuid>> {
        let cached = lock(&self.sessions).get(session_id).copied();
        if let Some(id) = cached {
            return Ok(Some(id));
        }
        let found = self.episodes.find_open_by_session(session_id).await?;
        Ok(found.map(|e| e.id))
    }

    /// Explicit phase-completion signal. A terminal target closes the episode.
    pub async fn transition(
        &self,
        episode_id: Uuid,
        to: Phase,
        reason: &str,
    ) -> GovernanceResult<Phase> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        if !live.episode.is_open() {
            return Err(GovernanceError::EpisodeClosed(episode_id));
        }
        let from = live.episode.phase;
        if !from.can_transition_to(to) {
            return Err(GovernanceError::InvalidTransition { from, to });
        }
        match to {
            Phase::Consolidate => {
                self.close_locked(live, TerminalOutcome::Succeeded, reason, TransitionTrigger::Explicit)
                    .await?;
            }
            Phase::Halt => {
                self.close_locked(live, TerminalOutcome::Aborted, reason, TransitionTrigger::Explicit)
                    .await?;
            }
            _ => {
                if let Some(active) = live.episode.active_step {
                    return Err(GovernanceError::StepInProgress(active));
                }
                live.episode
                    .transition(to, reason, Utc::now())
                    .map_err(|_| GovernanceError::InvalidTransition { from, to })?;
                self.publish_phase_change(live, from, reason);
                self.persist(live).await;
            }
        }
        Ok(live.episode.phase)
    }

    /// Extend the budget of an escalated episode and return it to PLAN.
    pub async fn approve_escalation(
        &self,
        episode_id: Uuid,
        extra_steps: u32,
        extra_seconds: u64,
    ) -> GovernanceResult<Episode> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        if !live.episode.is_open() {
            return Err(GovernanceError::EpisodeClosed(episode_id));
        }
        let from = live.episode.phase;
        live.episode
            .approve_escalation(extra_steps, extra_seconds, Utc::now())
            .map_err(|_| GovernanceError::InvalidTransition {
                from,
                to: Phase::Plan,
            })?;
        tracing::info!(%episode_id, extra_steps, extra_seconds, "escalation approved");
        self.publish_phase_change(live, from, "escalation approved");
        self.persist(live).await;
        Ok(live.episode.clone())
    }

    /// Unfreeze a target frozen by the diff-thrash watcher.
    pub async fn release_target(&self, episode_id: Uuid, target: &str) -> GovernanceResult<bool> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        if !live.episode.is_open() {
            return Err(GovernanceError::EpisodeClosed(episode_id));
        }
        let released = live.episode.release_target(target);
        if released {
            live.episode.updated_at = Utc::now();
            tracing::info!(%episode_id, target, "target released");
            self.persist(live).await;
        }
        Ok(released)
    }

    /// Close an episode and distill it. A failed distillation is not
    /// returned; the episode is queued and retried by `flush_pending`.
    pub async fn close_episode(
        &self,
        episode_id: Uuid,
        outcome: TerminalOutcome,
        summary: &str,
    ) -> GovernanceResult<CloseReport> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        self.close_locked(&mut guard, outcome, summary, TransitionTrigger::Explicit)
            .await
    }

    /// Cancel an episode: an in-flight step is terminated as partial and the
    /// episode moves to HALT.
    pub async fn abort_episode(&self, episode_id: Uuid, reason: &str) -> GovernanceResult<CloseReport> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        if !live.episode.is_open() {
            return Err(GovernanceError::EpisodeClosed(episode_id));
        }
        if let Some(active) = live.episode.active_step {
            if let Some(idx) = live.steps.iter().position(|s| s.id == active) {
                let observation = Observation::partial(format!("cancelled: {reason}"));
                self.finish_step(
                    live,
                    idx,
                    observation,
                    OutcomeClass::Partial,
                    Some(Termination::Cancelled),
                    Utc::now(),
                )
                .await?;
            }
        }
        self.close_locked(live, TerminalOutcome::Aborted, reason, TransitionTrigger::Cancellation)
            .await
    }

    /// Abort every open episode. Used on shutdown.
    pub async fn abort_all(&self, reason: &str) -> usize {
        let mut ids: BTreeSet<Uuid> = lock(&self.sessions).values().copied().collect();
        match self.episodes.list_episodes(true).await {
            Ok(stored) => ids.extend(stored.into_iter().map(|e| e.id)),
            Err(e) => tracing::warn!(error = %e, "could not list open episodes for abort"),
        }
        let mut aborted = 0;
        for id in ids {
            match self.abort_episode(id, reason).await {
                Ok(_) => aborted += 1,
                Err(GovernanceError::EpisodeClosed(_) | GovernanceError::EpisodeNotFound(_)) => {}
                Err(e) => tracing::warn!(episode_id = %id, error = %e, "abort failed"),
            }
        }
        if aborted > 0 {
            tracing::info!(aborted, reason, "open episodes aborted");
        }
        aborted
    }

    async fn close_locked(
        &self,
        live: &mut LiveEpisode,
        outcome: TerminalOutcome,
        summary: &str,
        trigger: TransitionTrigger,
    ) -> GovernanceResult<CloseReport> {
        let episode_id = live.episode.id;
        if !live.episode.is_open() {
            return Err(GovernanceError::EpisodeClosed(episode_id));
        }
        if let Some(active) = live.episode.active_step {
            return Err(GovernanceError::StepInProgress(active));
        }
        let from = live.episode.phase;
        if outcome == TerminalOutcome::Succeeded
            && from != Phase::Consolidate
            && !from.can_transition_to(Phase::Consolidate)
        {
            return Err(GovernanceError::InvalidTransition {
                from,
                to: Phase::Consolidate,
            });
        }

        live.episode.close(outcome, summary, trigger, Utc::now())?;
        if live.episode.phase != from {
            self.publish_phase_change(live, from, summary);
        }
        self.bus
            .publish(Some(episode_id), GovernancePayload::EpisodeClosed { outcome });
        tracing::info!(
            %episode_id,
            outcome = ?outcome,
            steps = live.episode.steps_taken,
            "episode closed"
        );
        let persisted = self.persist(live).await;

        let distillation = match self
            .distillation
            .distill(&live.episode, &live.steps, &live.config)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(%episode_id, error = %e, "distillation failed; queued for retry");
                lock(&self.undistilled).insert(episode_id);
                None
            }
        };

        {
            let mut sessions = lock(&self.sessions);
            if sessions.get(&live.episode.session_id) == Some(&episode_id) {
                sessions.remove(&live.episode.session_id);
            }
        }
        if persisted {
            lock(&self.live).remove(&episode_id);
        }
        Ok(CloseReport {
            episode: live.episode.clone(),
            distillation,
            persisted,
        })
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// Gate a proposed action. On success the step is open until completed.
    pub async fn begin_step(
        &self,
        episode_id: Uuid,
        packet: DecisionPacket,
        source_event_id: Option<String>,
    ) -> GovernanceResult<StepHandle> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        let now = Utc::now();

        if !live.episode.is_open() {
            return Err(GovernanceError::EpisodeClosed(episode_id));
        }
        if let Some(event_id) = source_event_id.as_deref() {
            if let Some(step) = live
                .steps
                .iter()
                .find(|s| s.source_event_id.as_deref() == Some(event_id))
            {
                tracing::debug!(%episode_id, step_id = %step.id, event_id, "replayed step start");
                return Ok(StepHandle {
                    step: step.clone(),
                    advice: AdviceResponse::default(),
                    warnings: Vec::new(),
                    replayed: true,
                });
            }
        }
        if let Some(active) = live.episode.active_step {
            return Err(GovernanceError::StepInProgress(active));
        }

        if let Some(detail) = live.episode.budget_exhausted(now) {
            self.force(
                live,
                Phase::Escalate,
                &format!("budget exhausted: {detail}"),
                TransitionTrigger::Budget,
                now,
            );
            tracing::error!(%episode_id, %detail, "budget exhausted");
            self.bus.publish(
                Some(episode_id),
                GovernancePayload::BudgetExhausted {
                    detail: detail.clone(),
                },
            );
            self.persist(live).await;
            return Err(GovernanceError::BudgetExhausted { episode_id, detail });
        }

        let phase = live.episode.phase;
        let category = packet.action.effective_category();
        if !phase.permits(category) {
            let required = Phase::required_for(category).unwrap_or(Phase::Plan);
            tracing::warn!(
                %episode_id,
                %phase,
                category = category.as_str(),
                %required,
                "phase violation"
            );
            self.bus.publish(
                Some(episode_id),
                GovernancePayload::PhaseViolation { phase, required },
            );
            return Err(GovernanceError::PhaseViolation {
                phase,
                category,
                required,
            });
        }
        packet.validate()?;

        let mut warnings = Vec::new();
        let advice = self
            .advice_for(&packet, &live.config, now, &mut warnings)
            .await;
        let policies = self.policies.active().await?;

        let verdict = {
            let engine = self.guardrails.read().await;
            let ctx = GuardrailContext {
                episode: &live.episode,
                steps: &live.steps,
                proposed: Some(&packet),
                advice: &advice,
                policies: &policies,
                config: &live.config.guardrails,
                binding_threshold: live.config.retrieval.memory_binding_threshold,
            };
            engine.check_before(&ctx)
        };
        if let Some(block) = verdict.block {
            if self.apply_block(live, &block, now) {
                self.persist(live).await;
            }
            self.bus.publish(
                Some(episode_id),
                GovernancePayload::StepBlocked {
                    block: block.clone(),
                },
            );
            return Err(GovernanceError::GuardrailBlocked(block));
        }
        warnings.extend(verdict.warnings);

        live.episode.steps_taken += 1;
        let sequence = live.episode.steps_taken;
        let ratio = live.episode.budget_ratio(now);
        if ratio >= live.config.budget.warn_ratio {
            warnings.push(format!("{:.0}% of the episode budget is used", ratio * 100.0));
            self.bus
                .publish(Some(episode_id), GovernancePayload::BudgetWarning { ratio });
        }

        let timeout_secs = live.config.budget.step_timeout_secs.min(MAX_STEP_TIMEOUT_SECS);
        let deadline = now + chrono::Duration::seconds(timeout_secs as i64);
        let mut step = Step::new(episode_id, sequence, phase, packet, now, deadline);
        step.source_event_id = source_event_id;
        live.episode.active_step = Some(step.id);
        live.episode.updated_at = now;
        live.dirty.insert(step.id);
        live.steps.push(step.clone());

        if !self.persist(live).await {
            warnings.push(storage_warning(episode_id));
        }

        let fired: Vec<Uuid> = advice
            .items
            .iter()
            .filter(|i| i.source == AdviceSource::Trigger)
            .map(|i| i.id)
            .collect();
        self.triggers.record_fired(&fired).await;

        self.bus.publish(
            Some(episode_id),
            GovernancePayload::StepBegan {
                step_id: step.id,
                sequence,
                phase,
            },
        );
        tracing::info!(
            %episode_id,
            step_id = %step.id,
            sequence,
            %phase,
            category = category.as_str(),
            advice = advice.items.len(),
            "step began"
        );
        Ok(StepHandle {
            step,
            advice,
            warnings,
            replayed: false,
        })
    }

    /// Record the observed result of a step.
    pub async fn complete_step(
        &self,
        episode_id: Uuid,
        step_id: Uuid,
        observation: Observation,
    ) -> GovernanceResult<StepReport> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        let idx = live
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(GovernanceError::StepNotFound(step_id))?;
        if live.steps[idx].is_completed() {
            return Err(GovernanceError::StepAlreadyCompleted(step_id));
        }
        if observation.summary.trim().is_empty() {
            return Err(GovernanceError::EvaluationMissing {
                step_id,
                missing: "observed result".to_string(),
            });
        }
        let Some(observed) = observation.outcome else {
            return Err(GovernanceError::EvaluationMissing {
                step_id,
                missing: "observed outcome class".to_string(),
            });
        };
        self.finish_step(live, idx, observation, observed, None, Utc::now())
            .await
    }

    /// Run `action` under a timeout and complete the step either way.
    /// A timeout completes the step as a failure.
    pub async fn run_action<F>(
        &self,
        episode_id: Uuid,
        step_id: Uuid,
        action: F,
        timeout: Duration,
    ) -> GovernanceResult<StepReport>
    where
        F: Future<Output = Observation>,
    {
        match tokio::time::timeout(timeout, action).await {
            Ok(observation) => self.complete_step(episode_id, step_id, observation).await,
            Err(_) => {
                tracing::warn!(%episode_id, %step_id, ?timeout, "action timed out");
                self.time_out_step(episode_id, step_id).await
            }
        }
    }

    /// Complete an in-flight step with a synthetic timeout failure.
    pub async fn time_out_step(&self, episode_id: Uuid, step_id: Uuid) -> GovernanceResult<StepReport> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        let idx = live
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(GovernanceError::StepNotFound(step_id))?;
        if live.steps[idx].is_completed() {
            return Err(GovernanceError::StepAlreadyCompleted(step_id));
        }
        let observation = Observation::failure(TIMEOUT_MESSAGE, TIMEOUT_MESSAGE);
        self.finish_step(
            live,
            idx,
            observation,
            OutcomeClass::Failure,
            Some(Termination::TimedOut),
            Utc::now(),
        )
        .await
    }

    /// Time out every in-flight step past its deadline.
    pub async fn timeout_overdue_steps(&self, now: DateTime<Utc>) -> DomainResult<usize> {
        let mut candidates: Vec<(Uuid, Uuid)> = Vec::new();
        let handles: Vec<LiveHandle> = lock(&self.live).values().cloned().collect();
        for handle in handles {
            let live = handle.lock().await;
            if let Some(active) = live.episode.active_step {
                if live.steps.iter().any(|s| s.id == active && s.is_overdue(now)) {
                    candidates.push((live.episode.id, active));
                }
            }
        }
        for episode in self.episodes.list_episodes(true).await? {
            let Some(active) = episode.active_step else {
                continue;
            };
            if candidates.iter().any(|(e, _)| *e == episode.id) {
                continue;
            }
            if let Some(step) = self.episodes.get_step(active).await? {
                if step.is_overdue(now) {
                    candidates.push((episode.id, active));
                }
            }
        }

        let mut timed_out = 0;
        for (episode_id, step_id) in candidates {
            match self.time_out_step(episode_id, step_id).await {
                Ok(_) => timed_out += 1,
                Err(GovernanceError::StepAlreadyCompleted(_)) => {}
                Err(e) => tracing::warn!(%episode_id, %step_id, error = %e, "could not time out step"),
            }
        }
        Ok(timed_out)
    }

    async fn finish_step(
        &self,
        live: &mut LiveEpisode,
        idx: usize,
        observation: Observation,
        observed: OutcomeClass,
        termination: Option<Termination>,
        now: DateTime<Utc>,
    ) -> GovernanceResult<StepReport> {
        let episode_id = live.episode.id;
        let config = Arc::clone(&live.config);
        let mut warnings = Vec::new();

        let (step_id, sequence, packet) = {
            let step = &live.steps[idx];
            (step.id, step.sequence, step.packet.clone())
        };
        let category = packet.action.effective_category();
        let target = packet.action.target.clone();

        let inputs: Vec<EvidenceInput> = observation
            .evidence
            .into_iter()
            .map(|mut input| {
                if input.target.is_none() {
                    input.target.clone_from(&target);
                }
                input
            })
            .collect();
        let attached_evidence = !inputs.is_empty();
        let refs = match self
            .evidence
            .record(
                episode_id,
                step_id,
                sequence,
                inputs,
                &config.evidence.retention_hours,
                now,
            )
            .await
        {
            Ok(refs) => refs,
            Err(e) => {
                tracing::warn!(%episode_id, %step_id, error = %e, "evidence not recorded");
                warnings.push(format!("evidence was not recorded: {e}"));
                Vec::new()
            }
        };

        let evaluation = match termination {
            Some(Termination::TimedOut) => Evaluation::Fail,
            Some(Termination::Cancelled) => Evaluation::Partial,
            None => Evaluation::compare(packet.prediction.expected, observed),
        };
        let surprise = packet.prediction.expected.distance(observed);
        let alpha = config.learning.confidence_alpha;
        let confidence_after = (packet.confidence
            + alpha * (evaluation.confidence_target() - packet.confidence))
            .clamp(0.0, 1.0);

        let lesson = match observation.lesson.as_deref().map(str::trim) {
            Some(l) if !l.is_empty() => truncate_chars(l, MAX_LESSON_CHARS),
            _ => synthesize_lesson(&packet, &observation.summary, evaluation),
        };
        let validated = observed == OutcomeClass::Success
            && (category == ActionCategory::Verify || observation.validation_method.is_some());

        let earlier: Vec<&Step> = live
            .steps
            .iter()
            .filter(|s| s.id != step_id && s.is_completed())
            .collect();
        let summary = observation.summary.trim();
        let new_information = attached_evidence
            || !earlier.iter().any(|s| {
                s.outcome
                    .as_ref()
                    .is_some_and(|o| o.observed.trim() == summary)
            });
        let error_signature = match termination {
            Some(Termination::TimedOut) => Some(error_signature(TIMEOUT_MESSAGE)),
            _ => observation
                .error
                .as_deref()
                .filter(|e| !e.trim().is_empty())
                .map(error_signature),
        };
        let unblocked = observation.unblocked
            || (observed == OutcomeClass::Success
                && target.is_some()
                && earlier
                    .iter()
                    .rev()
                    .find(|s| s.target() == target.as_deref())
                    .and_then(|s| s.outcome.as_ref())
                    .is_some_and(|o| o.outcome == OutcomeClass::Failure));

        let outcome = StepOutcome {
            observed: observation.summary.clone(),
            outcome: observed,
            evaluation,
            surprise,
            lesson: lesson.clone(),
            confidence_after,
            validation_method: observation.validation_method.clone(),
            validated,
            state_changed: observation.state_changed,
            new_information,
            error_signature,
            evidence_ids: refs.iter().map(|r| r.evidence_id).collect(),
            unblocked,
            termination,
            completion_event_id: observation.event_id.clone(),
        };
        live.steps[idx].complete(outcome, now)?;
        if live.episode.active_step == Some(step_id) {
            live.episode.active_step = None;
        }
        live.episode.evidence_refs.extend(refs);
        live.episode.updated_at = now;
        live.dirty.insert(step_id);

        // Importance gate
        let gate = ImportanceGate::new(config.gate.clone());
        let novelty = match self.index.nearest_similarity(&lesson).await {
            Ok(similarity) => 1.0 - similarity,
            Err(e) => {
                tracing::debug!(error = %e, "novelty unavailable");
                0.5
            }
        };
        let occurrences = match self.insights.count_fingerprint(&text_fingerprint(&lesson)).await {
            Ok(n) => n.saturating_add(1),
            Err(e) => {
                tracing::debug!(error = %e, "recurrence count unavailable");
                1
            }
        };
        let signals = ImportanceSignals {
            impact: if unblocked { 1.0 } else { 0.0 },
            novelty,
            surprise,
            recurrence: gate.recurrence_signal(occurrences),
            irreversibility: gate.irreversibility_signal(&packet.action),
        }
        .clamped();
        let decision = gate.evaluate(&signals, now);
        let insight = Insight::new(
            Some(episode_id),
            InsightKind::StepLesson {
                step_id,
                evaluation,
                lesson,
            },
            signals,
            decision.importance,
            decision.retention,
            now,
        )?;
        let insight_id = insight.id;
        live.unsaved_insights.push(insight);

        // Watchers
        let watcher = {
            let engine = self.guardrails.read().await;
            let advice = AdviceResponse::default();
            let ctx = GuardrailContext {
                episode: &live.episode,
                steps: &live.steps,
                proposed: None,
                advice: &advice,
                policies: &[],
                config: &config.guardrails,
                binding_threshold: config.retrieval.memory_binding_threshold,
            };
            engine.check_after(&ctx)
        };
        warnings.extend(watcher.warnings);
        if let Some(block) = &watcher.block {
            self.apply_block(live, block, now);
        }

        self.bus.publish(
            Some(episode_id),
            GovernancePayload::StepCompleted {
                step_id,
                evaluation,
                surprise,
                importance: decision.importance,
                durable: decision.is_durable(),
            },
        );
        tracing::info!(
            %episode_id,
            %step_id,
            evaluation = evaluation.as_str(),
            surprise,
            importance = decision.importance,
            durable = decision.is_durable(),
            termination = ?termination,
            "step completed"
        );

        let persisted = self.persist(live).await;
        if !persisted {
            warnings.push(storage_warning(episode_id));
        }
        Ok(StepReport {
            step: live.steps[idx].clone(),
            insight_id,
            importance: decision.importance,
            durable: decision.is_durable(),
            watcher: watcher.block,
            phase: live.episode.phase,
            persisted,
            warnings,
        })
    }

    // ------------------------------------------------------------------
    // Insights and advice
    // ------------------------------------------------------------------

    /// Record a free-form note against an episode, scored by the gate.
    pub async fn add_note(&self, episode_id: Uuid, text: &str) -> GovernanceResult<Insight> {
        let handle = self.live(episode_id).await?;
        let mut guard = handle.lock().await;
        let live = &mut *guard;
        if !live.episode.is_open() {
            return Err(GovernanceError::EpisodeClosed(episode_id));
        }
        let now = Utc::now();
        let gate = ImportanceGate::new(live.config.gate.clone());
        let novelty = self
            .index
            .nearest_similarity(text)
            .await
            .map_or(0.5, |s| 1.0 - s);
        let signals = ImportanceSignals {
            novelty,
            ..ImportanceSignals::default()
        }
        .clamped();
        let decision = gate.evaluate(&signals, now);
        let insight = Insight::new(
            Some(episode_id),
            InsightKind::Note {
                text: text.trim().to_string(),
            },
            signals,
            decision.importance,
            decision.retention,
            now,
        )?;
        live.unsaved_insights.push(insight.clone());
        self.persist(live).await;
        Ok(insight)
    }

    /// Re-run the gate with new signals. A durable insight is never demoted;
    /// an ephemeral one may be promoted and indexed.
    pub async fn rescore(&self, insight_id: Uuid, signals: ImportanceSignals) -> DomainResult<Insight> {
        let mut insight = self
            .insights
            .get(insight_id)
            .await?
            .ok_or(DomainError::InsightNotFound(insight_id))?;
        let now = Utc::now();
        let gate = ImportanceGate::new(self.config_snapshot().gate.clone());
        let decision = gate.evaluate(&signals, now);
        let promoted = !insight.retention.is_durable() && decision.is_durable();

        insight.signals = signals.clamped();
        insight.importance = decision.importance;
        if !insight.retention.is_durable() {
            insight.retention = decision.retention;
        }
        insight.updated_at = now;
        self.insights.update(&insight).await?;
        if promoted {
            tracing::info!(%insight_id, importance = decision.importance, "insight promoted to durable");
            self.index.index(insight.id, KIND_INSIGHT, insight.text()).await?;
        }
        Ok(insight)
    }

    /// Delete ephemeral insights past their expiry and drop any index entries.
    pub async fn expire_insights(&self, now: DateTime<Utc>) -> DomainResult<usize> {
        let expired = self.insights.delete_expired(now).await?;
        for id in &expired {
            if let Err(e) = self.index.remove(*id).await {
                tracing::debug!(insight_id = %id, error = %e, "index entry not removed");
            }
        }
        Ok(expired.len())
    }

    /// Ranked advice using the current configuration.
    pub async fn advise(
        &self,
        query: &str,
        limit: Option<usize>,
        mode: Option<PrecisionMode>,
    ) -> DomainResult<AdviceResponse> {
        let config = self.config_snapshot();
        let limit = limit.unwrap_or(config.retrieval.default_limit);
        self.retrieval
            .advise(query, limit, mode, &config.retrieval, Utc::now())
            .await
    }

    async fn advice_for(
        &self,
        packet: &DecisionPacket,
        config: &Config,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> AdviceResponse {
        let query = format!("{} {}", packet.intent.trim(), packet.action.query_text());
        let advice = match self
            .retrieval
            .advise(&query, config.retrieval.default_limit, None, &config.retrieval, now)
            .await
        {
            Ok(advice) => advice,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed; continuing without advice");
                AdviceResponse {
                    items: Vec::new(),
                    degraded: true,
                }
            }
        };
        if advice.degraded {
            let err = GovernanceError::RetrievalUnavailable("semantic recall degraded".into());
            warnings.push(format!("{err}; {}", err.remediation()));
        }
        advice
    }

    // ------------------------------------------------------------------
    // Configuration and extension
    // ------------------------------------------------------------------

    /// Swap the configuration. Open episodes keep their snapshot.
    pub fn reload_config(&self, config: Config) {
        *self
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        tracing::info!("configuration reloaded");
    }

    pub fn config_snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Add a guardrail. It runs after the built-ins unless `guardrails.order`
    /// names it.
    pub async fn register_guardrail(&self, guardrail: Arc<dyn Guardrail>) {
        self.guardrails.write().await.register(guardrail);
    }

    pub async fn guardrail_names(&self) -> Vec<String> {
        self.guardrails.read().await.names()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn episode(&self, episode_id: Uuid) -> GovernanceResult<Episode> {
        let handle = self.live(episode_id).await?;
        let live = handle.lock().await;
        Ok(live.episode.clone())
    }

    pub async fn steps(&self, episode_id: Uuid) -> GovernanceResult<Vec<Step>> {
        let handle = self.live(episode_id).await?;
        let live = handle.lock().await;
        Ok(live.steps.clone())
    }

    pub async fn list_episodes(&self, open_only: bool) -> DomainResult<Vec<Episode>> {
        self.episodes.list_episodes(open_only).await
    }

    pub fn bus(&self) -> &Arc<GovernanceEventBus> {
        &self.bus
    }

    pub fn policies(&self) -> &Arc<PolicyService> {
        &self.policies
    }

    pub fn triggers(&self) -> &Arc<TriggerRuleEngine> {
        &self.triggers
    }

    pub fn distillation(&self) -> &Arc<DistillationEngine> {
        &self.distillation
    }

    pub fn evidence(&self) -> &Arc<EvidenceStore> {
        &self.evidence
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Closed episodes still waiting for a successful distillation.
    pub fn undistilled_count(&self) -> usize {
        lock(&self.undistilled).len()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Retry every episode whose last write failed, then every closed
    /// episode whose distillation failed. Returns how many recovered.
    pub async fn flush_pending(&self) -> usize {
        let ids: Vec<Uuid> = lock(&self.pending).iter().copied().collect();
        let mut recovered = 0;
        for id in ids {
            let cached = lock(&self.live).get(&id).cloned();
            let Some(handle) = cached else {
                lock(&self.pending).remove(&id);
                continue;
            };
            let mut guard = handle.lock().await;
            if self.persist(&mut guard).await {
                recovered += 1;
                if !guard.episode.is_open() && !lock(&self.undistilled).contains(&id) {
                    lock(&self.live).remove(&id);
                }
            }
        }
        recovered + self.retry_distillations().await
    }

    async fn retry_distillations(&self) -> usize {
        let ids: Vec<Uuid> = lock(&self.undistilled).iter().copied().collect();
        let mut recovered = 0;
        for id in ids {
            let handle = match self.live(id).await {
                Ok(handle) => handle,
                Err(GovernanceError::EpisodeNotFound(_)) => {
                    tracing::warn!(episode_id = %id, "undistilled episode no longer stored");
                    lock(&self.undistilled).remove(&id);
                    continue;
                }
                Err(e) => {
                    tracing::debug!(episode_id = %id, error = %e, "undistilled episode unavailable");
                    continue;
                }
            };
            let guard = handle.lock().await;
            match self
                .distillation
                .distill(&guard.episode, &guard.steps, &guard.config)
                .await
            {
                Ok(report) => {
                    recovered += 1;
                    lock(&self.undistilled).remove(&id);
                    if !lock(&self.pending).contains(&id) {
                        lock(&self.live).remove(&id);
                    }
                    tracing::info!(
                        episode_id = %id,
                        created = report.created.len(),
                        merged = report.merged,
                        "distillation recovered"
                    );
                }
                Err(e) => tracing::debug!(episode_id = %id, error = %e, "distillation still failing"),
            }
        }
        recovered
    }

    async fn live(&self, episode_id: Uuid) -> GovernanceResult<LiveHandle> {
        let cached = lock(&self.live).get(&episode_id).cloned();
        if let Some(handle) = cached {
            return Ok(handle);
        }
        let episode = self
            .episodes
            .get_episode(episode_id)
            .await?
            .ok_or(GovernanceError::EpisodeNotFound(episode_id))?;
        let steps = self.episodes.list_steps(episode_id).await?;
        let handle = Arc::new(Mutex::new(LiveEpisode {
            episode,
            steps,
            config: self.config_snapshot(),
            dirty: BTreeSet::new(),
            unsaved_insights: Vec::new(),
        }));
        let mut map = lock(&self.live);
        Ok(Arc::clone(map.entry(episode_id).or_insert(handle)))
    }

    /// Write the episode, its changed steps and unsaved insights. Returns
    /// false when storage stayed unreachable; the episode is then flagged,
    /// escalated and queued for `flush_pending`.
    async fn persist(&self, live: &mut LiveEpisode) -> bool {
        let episode_id = live.episode.id;
        let was_unpersisted = live.episode.unpersisted;
        live.episode.unpersisted = false;

        match self.write_with_retry(live).await {
            Ok(()) => {
                live.dirty.clear();
                for insight in live.unsaved_insights.drain(..) {
                    if insight.retention.is_durable() {
                        if let Err(e) = self.index.index(insight.id, KIND_INSIGHT, insight.text()).await {
                            tracing::warn!(insight_id = %insight.id, error = %e, "insight not indexed");
                        }
                    }
                }
                let was_pending = lock(&self.pending).remove(&episode_id);
                if was_unpersisted || was_pending {
                    tracing::info!(%episode_id, "episode persisted after storage recovery");
                    self.bus
                        .publish(Some(episode_id), GovernancePayload::PersistenceRecovered);
                }
                true
            }
            Err(e) => {
                live.episode.unpersisted = true;
                let first_failure = lock(&self.pending).insert(episode_id);
                if live.episode.is_open() {
                    self.force(
                        live,
                        Phase::Escalate,
                        &format!("canonical storage unavailable: {e}"),
                        TransitionTrigger::Storage,
                        Utc::now(),
                    );
                }
                if first_failure {
                    tracing::error!(%episode_id, error = %e, "canonical storage write failed; episode held in memory");
                    self.bus.publish(
                        Some(episode_id),
                        GovernancePayload::PersistenceDegraded {
                            reason: e.to_string(),
                        },
                    );
                } else {
                    tracing::debug!(%episode_id, error = %e, "storage still unavailable");
                }
                false
            }
        }
    }

    async fn write_with_retry(&self, live: &LiveEpisode) -> DomainResult<()> {
        let settings = &live.config.persistence;
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(settings.initial_backoff_ms.max(1)))
            .with_max_elapsed_time(Some(Duration::from_millis(settings.max_elapsed_ms)))
            .build();
        let this = self;
        backoff::future::retry(policy, || async move {
            this.write_once(live).await.map_err(|e| match e {
                DomainError::DatabaseError(_) | DomainError::ConcurrencyConflict { .. } => {
                    tracing::debug!(error = %e, "retrying storage write");
                    backoff::Error::transient(e)
                }
                other => backoff::Error::permanent(other),
            })
        })
        .await
    }

    async fn write_once(&self, live: &LiveEpisode) -> DomainResult<()> {
        self.episodes.upsert_episode(&live.episode).await?;
        for step in live.steps.iter().filter(|s| live.dirty.contains(&s.id)) {
            self.episodes.upsert_step(step).await?;
        }
        for insight in &live.unsaved_insights {
            if self.insights.get(insight.id).await?.is_some() {
                self.insights.update(insight).await?;
            } else {
                self.insights.insert(insight).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Apply a guardrail's forced phase and freeze. Returns whether the
    /// episode changed.
    fn apply_block(&self, live: &mut LiveEpisode, block: &GuardrailBlock, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if let Some(target) = &block.freeze_target {
            if !live.episode.is_frozen(target) {
                live.episode.freeze_target(target.clone());
                live.episode.updated_at = now;
                changed = true;
            }
        }
        if let Some(phase) = block.force_phase {
            changed |= self.force(
                live,
                phase,
                &block.reason,
                TransitionTrigger::Guardrail {
                    name: block.guardrail.clone(),
                },
                now,
            );
        }
        changed
    }

    fn force(
        &self,
        live: &mut LiveEpisode,
        to: Phase,
        reason: &str,
        trigger: TransitionTrigger,
        now: DateTime<Utc>,
    ) -> bool {
        let from = live.episode.phase;
        let changed = live.episode.force_phase(to, reason, trigger, now);
        if changed {
            tracing::warn!(episode_id = %live.episode.id, %from, %to, reason, "phase forced");
            self.publish_phase_change(live, from, reason);
        }
        changed
    }

    fn publish_phase_change(&self, live: &LiveEpisode, from: Phase, reason: &str) {
        self.bus.publish(
            Some(live.episode.id),
            GovernancePayload::PhaseChanged {
                from,
                to: live.episode.phase,
                reason: reason.to_string(),
            },
        );
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn storage_warning(episode_id: Uuid) -> String {
    let err = GovernanceError::StorageWriteFailure {
        episode_id,
        reason: "retries exhausted".to_string(),
    };
    format!("{err}; {}", err.remediation())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::adapters::embeddings::HashingEmbeddingProvider;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteDistillationRepository, SqliteEpisodeRepository,
        SqliteEvidenceRepository, SqliteInsightRepository, SqlitePolicyRepository,
        SqliteTriggerRuleRepository, SqliteVectorStore,
    };
    use sqlx::SqlitePool;

    /// Governor over an in-memory database with the hashing embedder.
    pub async fn governor_with_pool(config: Config) -> (Governor, SqlitePool) {
        let pool = create_migrated_test_pool().await.unwrap();
        let stores = GovernorStores {
            episodes: Arc::new(SqliteEpisodeRepository::new(pool.clone())),
            insights: Arc::new(SqliteInsightRepository::new(pool.clone())),
            distillations: Arc::new(SqliteDistillationRepository::new(pool.clone())),
            evidence: Arc::new(SqliteEvidenceRepository::new(pool.clone())),
            policies: Arc::new(SqlitePolicyRepository::new(pool.clone())),
            triggers: Arc::new(SqliteTriggerRuleRepository::new(pool.clone())),
            vectors: Arc::new(SqliteVectorStore::new(pool.clone())),
            embedder: Arc::new(HashingEmbeddingProvider::new(256).unwrap()),
        };
        let governor = Governor::new(stores, config, Arc::new(GovernanceEventBus::default()));
        (governor, pool)
    }
}
