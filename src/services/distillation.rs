//! Distillation engine.
//!
//! Runs once per closed episode. Steps with high surprise or an explicit
//! lesson become candidates; each candidate either reinforces or contradicts
//! an existing distillation it overlaps with, or is accepted as a new one if
//! it scores high enough. Distillations that gain enough confidence are
//! promoted to trigger rules, and policy-type distillations are proposed as
//! learned policies.
//!
//! Re-running an episode is a no-op: runs are recorded per episode and new
//! distillations are keyed by a statement + provenance fingerprint.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::step::synthesize_lesson;
use crate::domain::models::{
    ActionCategory, Config, DistillationCandidate, DistillationConfig, DistillationType, Distillation,
    Episode, GateWeights, ImportanceSignals, Insight, InsightKind, OutcomeClass, OutcomeDirection,
    Retention, Step,
};
use crate::domain::ports::{DistillationRepository, InsightRepository};
use crate::services::embedding_index::{EmbeddingIndex, KIND_DISTILLED_RULE};
use crate::services::event_bus::{GovernanceEventBus, GovernancePayload};
use crate::services::keyed_lock::KeyedLocks;
use crate::services::policy_service::PolicyService;
use crate::services::trigger_rules::TriggerRuleEngine;

/// What one distillation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistillationReport {
    pub episode_id: Uuid,
    /// The episode had already been distilled
    pub already_distilled: bool,
    pub candidates: usize,
    pub created: Vec<Uuid>,
    pub merged: usize,
    pub contradicted: usize,
    pub rejected: usize,
    pub promoted: Vec<Uuid>,
}

enum Merge {
    Corroborated,
    Contradicted,
    /// Every source step is already in the rule's provenance
    AlreadyApplied,
    None,
}

pub struct DistillationEngine {
    distillations: Arc<dyn DistillationRepository>,
    insights: Arc<dyn InsightRepository>,
    index: Arc<EmbeddingIndex>,
    triggers: Arc<TriggerRuleEngine>,
    policies: Arc<PolicyService>,
    bus: Arc<GovernanceEventBus>,
    locks: KeyedLocks<Uuid>,
}

impl DistillationEngine {
    pub fn new(
        distillations: Arc<dyn DistillationRepository>,
        insights: Arc<dyn InsightRepository>,
        index: Arc<EmbeddingIndex>,
        triggers: Arc<TriggerRuleEngine>,
        policies: Arc<PolicyService>,
        bus: Arc<GovernanceEventBus>,
    ) -> Self {
        Self {
            distillations,
            insights,
            index,
            triggers,
            policies,
            bus,
            locks: KeyedLocks::new(),
        }
    }

    /// Distill a closed episode.
    pub async fn distill(
        &self,
        episode: &Episode,
        steps: &[Step],
        config: &Config,
    ) -> DomainResult<DistillationReport> {
        let mut report = DistillationReport {
            episode_id: episode.id,
            ..Default::default()
        };
        if episode.is_open() {
            return Err(DomainError::ValidationFailed(format!(
                "episode {} must be closed before distillation",
                episode.id
            )));
        }
        if self.distillations.has_run(episode.id).await? {
            tracing::debug!(episode_id = %episode.id, "episode already distilled");
            report.already_distilled = true;
            return Ok(report);
        }

        let settings = &config.distillation;
        let candidates = extract_candidates(episode, steps, settings);
        report.candidates = candidates.len();
        let now = Utc::now();

        for mut candidate in candidates {
            if self
                .distillations
                .find_by_fingerprint(&candidate.fingerprint())
                .await?
                .is_some()
            {
                continue;
            }

            match self.merge(&candidate, settings, now, &mut report).await? {
                Merge::Corroborated => {
                    report.merged += 1;
                    continue;
                }
                Merge::Contradicted => {
                    report.contradicted += 1;
                    continue;
                }
                Merge::AlreadyApplied => continue,
                Merge::None => {}
            }

            candidate.novelty = self.novelty(&candidate.statement).await;
            let score = acceptance_score(&candidate, &config.gate.weights);
            if score < settings.acceptance_threshold {
                tracing::debug!(
                    statement = %candidate.statement,
                    score,
                    "distillation candidate rejected"
                );
                report.rejected += 1;
                continue;
            }

            let mut distillation = Distillation::from_candidate(&candidate, score, now);
            self.distillations.insert(&distillation).await?;
            self.index_rule(&distillation, now).await?;
            report.created.push(distillation.id);
            tracing::info!(
                distillation_id = %distillation.id,
                kind = distillation.kind.as_str(),
                confidence = distillation.confidence,
                "distillation created"
            );

            if distillation.kind == DistillationType::Policy {
                if let Some(policy) = self.policies.propose_from_distillation(&distillation).await? {
                    self.bus.publish(
                        Some(episode.id),
                        GovernancePayload::PolicyProposed {
                            policy_id: policy.id,
                            statement: policy.statement,
                        },
                    );
                }
            }
            if self.maybe_promote(&mut distillation, settings).await? {
                report.promoted.push(distillation.id);
            }
        }

        self.distillations
            .record_run(episode.id, u32::try_from(report.candidates).unwrap_or(u32::MAX))
            .await?;
        self.bus.publish(
            Some(episode.id),
            GovernancePayload::DistillationCompleted {
                created: report.created.len(),
                merged: report.merged,
                contradicted: report.contradicted,
            },
        );
        tracing::info!(
            episode_id = %episode.id,
            candidates = report.candidates,
            created = report.created.len(),
            merged = report.merged,
            contradicted = report.contradicted,
            "episode distilled"
        );
        Ok(report)
    }

    /// Active distillations at or above `min_confidence`, highest first.
    pub async fn feed(&self, min_confidence: f64) -> DomainResult<Vec<Distillation>> {
        self.distillations.list(min_confidence, false).await
    }

    /// Merge into the closest existing distillation when it overlaps enough.
    async fn merge(
        &self,
        candidate: &DistillationCandidate,
        settings: &DistillationConfig,
        now: DateTime<Utc>,
        report: &mut DistillationReport,
    ) -> DomainResult<Merge> {
        let hits = match self
            .index
            .search(&candidate.statement, 1, settings.merge_similarity, Some(KIND_DISTILLED_RULE))
            .await
        {
            Ok(hits) => hits,
            Err(DomainError::EmbeddingUnavailable(reason)) => {
                tracing::warn!(%reason, "overlap search unavailable; treating candidate as new");
                return Ok(Merge::None);
            }
            Err(e) => return Err(e),
        };
        let Some(hit) = hits.first() else {
            return Ok(Merge::None);
        };
        let Some(insight) = self.insights.get(hit.id).await? else {
            return Ok(Merge::None);
        };
        let InsightKind::DistilledRule { distillation_id, .. } = insight.kind else {
            return Ok(Merge::None);
        };

        let _guard = self.locks.lock(&distillation_id).await;
        let Some(mut existing) = self.distillations.get(distillation_id).await? else {
            return Ok(Merge::None);
        };
        if !existing.is_active() {
            return Ok(Merge::None);
        }
        // A partially applied run is being retried.
        if !candidate.provenance.is_empty()
            && candidate.provenance.iter().all(|id| existing.provenance.contains(id))
        {
            tracing::debug!(distillation_id = %existing.id, "candidate already merged");
            return Ok(Merge::AlreadyApplied);
        }

        let merge = if existing.direction == candidate.direction {
            existing.corroborate(&candidate.provenance, settings.blend_rate, now);
            Merge::Corroborated
        } else {
            existing.contradict(
                &candidate.provenance,
                settings.blend_rate,
                settings.supersede_below,
                now,
            );
            Merge::Contradicted
        };
        if !existing.source_episodes.contains(&candidate.episode_id) {
            existing.source_episodes.push(candidate.episode_id);
        }
        self.distillations.update(&existing).await?;
        tracing::info!(
            distillation_id = %existing.id,
            similarity = hit.similarity,
            confidence = existing.confidence,
            validations = existing.validation_count,
            contradictions = existing.contradiction_count,
            "distillation reinforced"
        );

        match merge {
            Merge::Corroborated => {
                if self.maybe_promote(&mut existing, settings).await? {
                    report.promoted.push(existing.id);
                }
            }
            Merge::Contradicted if !existing.is_active() => {
                tracing::warn!(distillation_id = %existing.id, "distillation superseded");
                self.triggers.disable_for_distillation(existing.id).await?;
            }
            _ => {}
        }
        Ok(merge)
    }

    async fn maybe_promote(
        &self,
        distillation: &mut Distillation,
        settings: &DistillationConfig,
    ) -> DomainResult<bool> {
        if distillation.promoted_rule_id.is_some()
            || !distillation.is_active()
            || distillation.trigger_tags.is_empty()
            || distillation.confidence < settings.promote_confidence
        {
            return Ok(false);
        }
        let rule = self.triggers.promote(distillation).await?;
        distillation.promoted_rule_id = Some(rule.id);
        distillation.updated_at = Utc::now();
        self.distillations.update(distillation).await?;
        self.bus.publish(
            None,
            GovernancePayload::RulePromoted {
                distillation_id: distillation.id,
                rule_id: rule.id,
                statement: distillation.statement.clone(),
                confidence: distillation.confidence,
            },
        );
        tracing::info!(
            distillation_id = %distillation.id,
            rule_id = %rule.id,
            "distillation promoted to trigger rule"
        );
        Ok(true)
    }

    /// Store the durable insight that makes a distillation retrievable.
    async fn index_rule(&self, distillation: &Distillation, now: DateTime<Utc>) -> DomainResult<()> {
        let insight = Insight::new(
            None,
            InsightKind::DistilledRule {
                distillation_id: distillation.id,
                statement: distillation.statement.clone(),
            },
            ImportanceSignals::default(),
            distillation.confidence,
            Retention::Durable,
            now,
        )?;
        self.insights.insert(&insight).await?;
        if let Err(e) = self
            .index
            .index(insight.id, KIND_DISTILLED_RULE, &distillation.statement)
            .await
        {
            tracing::warn!(distillation_id = %distillation.id, error = %e, "distillation not indexed");
        }
        Ok(())
    }

    async fn novelty(&self, statement: &str) -> f64 {
        match self
            .index
            .search(statement, 1, 0.0, Some(KIND_DISTILLED_RULE))
            .await
        {
            Ok(hits) => 1.0 - hits.first().map_or(0.0, |h| h.similarity.clamp(0.0, 1.0)),
            Err(_) => 0.5,
        }
    }
}

/// Weighted score over the gate's signal families; generalizability takes
/// the recurrence slot.
pub fn acceptance_score(candidate: &DistillationCandidate, weights: &GateWeights) -> f64 {
    let total = weights.impact + weights.novelty + weights.surprise + weights.recurrence;
    if total <= 0.0 {
        return 0.0;
    }
    let raw = weights.impact * candidate.impact
        + weights.novelty * candidate.novelty
        + weights.surprise * candidate.surprise
        + weights.recurrence * candidate.generalizability;
    (raw / total).clamp(0.0, 1.0)
}

/// Whether the stored lesson came from the caller rather than synthesis.
fn has_explicit_lesson(step: &Step) -> bool {
    step.outcome.as_ref().is_some_and(|o| {
        o.lesson != synthesize_lesson(&step.packet, &o.observed, o.evaluation)
    })
}

/// Candidates from an episode's completed steps.
pub fn extract_candidates(
    episode: &Episode,
    steps: &[Step],
    settings: &DistillationConfig,
) -> Vec<DistillationCandidate> {
    let mut out = Vec::new();
    for step in steps {
        let Some(outcome) = &step.outcome else {
            continue;
        };
        if outcome.termination.is_some() {
            continue;
        }
        let explicit = has_explicit_lesson(step);
        if outcome.surprise < settings.candidate_surprise && !explicit {
            continue;
        }

        let direction = if outcome.outcome == OutcomeClass::Success {
            OutcomeDirection::Positive
        } else {
            OutcomeDirection::Negative
        };
        let category = step.category();
        let kind = classify(&outcome.lesson, outcome.error_signature.is_some(), direction, category, outcome.validated);

        let recurs = steps.iter().filter(|s| s.id != step.id).any(|s| {
            s.target().is_some() && s.target() == step.target()
                || s.outcome.as_ref().is_some_and(|o| {
                    o.error_signature.is_some() && o.error_signature == outcome.error_signature
                })
        });
        let trigger_tags = trigger_tags(step);
        let generalizability = (0.5_f64
            + if trigger_tags.is_empty() { 0.0 } else { 0.25 }
            + if recurs { 0.25 } else { 0.0 })
        .min(1.0);

        let impact = if outcome.unblocked {
            1.0
        } else if explicit {
            0.5
        } else {
            0.0
        };

        out.push(DistillationCandidate {
            episode_id: episode.id,
            statement: outcome.lesson.trim().to_string(),
            kind,
            direction,
            domain_tags: domain_tags(step),
            trigger_tags,
            provenance: vec![step.id],
            impact,
            novelty: 0.0,
            generalizability,
            surprise: outcome.surprise,
        });
    }
    out
}

fn classify(
    lesson: &str,
    errored: bool,
    direction: OutcomeDirection,
    category: ActionCategory,
    validated: bool,
) -> DistillationType {
    let lower = lesson.trim_start().to_lowercase();
    if lower.starts_with("always ") || lower.starts_with("never ") {
        DistillationType::Policy
    } else if errored {
        DistillationType::SharpEdge
    } else if direction == OutcomeDirection::Negative && category.is_mutating() {
        DistillationType::AntiPattern
    } else if validated {
        DistillationType::Playbook
    } else {
        DistillationType::Heuristic
    }
}

/// File stem of the target, plus the program of a shell command.
fn trigger_tags(step: &Step) -> Vec<String> {
    let mut tags = BTreeSet::new();
    if let Some(stem) = step
        .target()
        .and_then(|t| std::path::Path::new(t).file_stem())
        .and_then(|s| s.to_str())
        .filter(|s| s.len() >= 3)
    {
        tags.insert(stem.to_lowercase());
    }
    if let Some(program) = step
        .packet
        .action
        .command
        .as_deref()
        .and_then(|c| c.split_whitespace().next())
    {
        tags.insert(program.to_lowercase());
    }
    tags.into_iter().collect()
}

fn domain_tags(step: &Step) -> Vec<String> {
    let mut tags = vec![step.category().as_str().to_string()];
    if let Some(ext) = step
        .target()
        .and_then(|t| std::path::Path::new(t).extension())
        .and_then(|e| e.to_str())
    {
        tags.push(ext.to_lowercase());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        ActionDescriptor, Budget, DecisionPacket, Evaluation, Phase, Prediction, StepOutcome,
        TerminalOutcome, TransitionTrigger,
    };

    fn step(episode: &Episode, sequence: u32, outcome: OutcomeClass, lesson: Option<&str>) -> Step {
        let now = Utc::now();
        let packet = DecisionPacket::new(
            "update the auth token cache",
            ActionDescriptor::new("Edit").with_target("src/auth.rs"),
            Prediction::new("tests pass", OutcomeClass::Success),
            0.8,
        );
        let mut step = Step::new(episode.id, sequence, Phase::Execute, packet, now, now);
        let evaluation = Evaluation::compare(OutcomeClass::Success, outcome);
        let synthesized = synthesize_lesson(&step.packet, "tests failed", evaluation);
        step.complete(
            StepOutcome {
                observed: "tests failed".into(),
                outcome,
                evaluation,
                surprise: OutcomeClass::Success.distance(outcome),
                lesson: lesson.map_or(synthesized, str::to_string),
                confidence_after: 0.6,
                validation_method: None,
                validated: false,
                state_changed: true,
                new_information: true,
                error_signature: None,
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

    fn closed_episode() -> Episode {
        let now = Utc::now();
        let mut episode = Episode::new(
            "s",
            "goal",
            "done",
            Budget {
                max_steps: 10,
                max_seconds: 600,
            },
            now,
        );
        episode
            .close(TerminalOutcome::Aborted, "stop", TransitionTrigger::Explicit, now)
            .unwrap();
        episode
    }

    #[test]
    fn test_candidates_need_surprise_or_lesson() {
        let episode = closed_episode();
        let steps = vec![
            step(&episode, 1, OutcomeClass::Success, None),
            step(&episode, 2, OutcomeClass::Failure, None),
            step(&episode, 3, OutcomeClass::Success, Some("Never cache tokens across tenants")),
        ];
        let candidates = extract_candidates(&episode, &steps, &DistillationConfig::default());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].direction, OutcomeDirection::Negative);
        assert_eq!(candidates[0].kind, DistillationType::AntiPattern);
        assert_eq!(candidates[0].trigger_tags, vec!["auth".to_string()]);
        assert_eq!(candidates[1].kind, DistillationType::Policy);
        assert!((candidates[1].impact - 0.5).abs() < f64::EPSILON);
        // Tagged and recurring on the same target: capped at 1.0.
        assert!((candidates[0].generalizability - 1.0).abs() < f64::EPSILON);

        let lone = vec![step(&episode, 1, OutcomeClass::Failure, None)];
        let single = extract_candidates(&episode, &lone, &DistillationConfig::default());
        assert!((single[0].generalizability - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_acceptance_score_is_normalized() {
        let episode = closed_episode();
        let steps = vec![step(&episode, 1, OutcomeClass::Failure, None)];
        let mut candidate = extract_candidates(&episode, &steps, &DistillationConfig::default())
            .remove(0);
        candidate.novelty = 1.0;
        let score = acceptance_score(&candidate, &GateWeights::default());
        assert!((0.0..=1.0).contains(&score));
        assert!(score >= DistillationConfig::default().acceptance_threshold);

        candidate.surprise = 0.0;
        candidate.novelty = 0.0;
        assert!(acceptance_score(&candidate, &GateWeights::default()) < 0.45);
    }

    mod engine {
        use super::*;
        use crate::adapters::embeddings::HashingEmbeddingProvider;
        use crate::adapters::sqlite::{
            create_migrated_test_pool, SqliteDistillationRepository, SqliteInsightRepository,
            SqlitePolicyRepository, SqliteTriggerRuleRepository, SqliteVectorStore,
        };
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Fixture {
            engine: DistillationEngine,
            triggers: Arc<TriggerRuleEngine>,
            policies: Arc<PolicyService>,
        }

        /// Distillation store whose inserts fail while `failing` is set.
        struct FlakyDistillations {
            inner: SqliteDistillationRepository,
            failing: AtomicBool,
        }

        #[async_trait::async_trait]
        impl DistillationRepository for FlakyDistillations {
            async fn insert(&self, distillation: &Distillation) -> DomainResult<()> {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(DomainError::DatabaseError("disk I/O error".into()));
                }
                self.inner.insert(distillation).await
            }
            async fn update(&self, distillation: &Distillation) -> DomainResult<()> {
                self.inner.update(distillation).await
            }
            async fn get(&self, id: Uuid) -> DomainResult<Option<Distillation>> {
                self.inner.get(id).await
            }
            async fn find_by_fingerprint(&self, fingerprint: &str) -> DomainResult<Option<Distillation>> {
                self.inner.find_by_fingerprint(fingerprint).await
            }
            async fn list(
                &self,
                min_confidence: f64,
                include_superseded: bool,
            ) -> DomainResult<Vec<Distillation>> {
                self.inner.list(min_confidence, include_superseded).await
            }
            async fn record_run(&self, episode_id: Uuid, candidates: u32) -> DomainResult<bool> {
                self.inner.record_run(episode_id, candidates).await
            }
            async fn has_run(&self, episode_id: Uuid) -> DomainResult<bool> {
                self.inner.has_run(episode_id).await
            }
        }

        async fn fixture() -> Fixture {
            let pool = create_migrated_test_pool().await.unwrap();
            fixture_over(Arc::new(SqliteDistillationRepository::new(pool.clone())), pool).await
        }

        async fn fixture_over(
            distillations: Arc<dyn DistillationRepository>,
            pool: sqlx::SqlitePool,
        ) -> Fixture {
            let index = Arc::new(EmbeddingIndex::new(
                Arc::new(HashingEmbeddingProvider::new(256).unwrap()),
                Arc::new(SqliteVectorStore::new(pool.clone())),
            ));
            let triggers = Arc::new(TriggerRuleEngine::new(Arc::new(
                SqliteTriggerRuleRepository::new(pool.clone()),
            )));
            let policies = Arc::new(PolicyService::new(Arc::new(SqlitePolicyRepository::new(
                pool.clone(),
            ))));
            let engine = DistillationEngine::new(
                distillations,
                Arc::new(SqliteInsightRepository::new(pool)),
                index,
                Arc::clone(&triggers),
                Arc::clone(&policies),
                Arc::new(GovernanceEventBus::default()),
            );
            Fixture {
                engine,
                triggers,
                policies,
            }
        }

        #[tokio::test]
        async fn test_rerun_is_a_noop() {
            let f = fixture().await;
            let episode = closed_episode();
            let steps = vec![step(&episode, 1, OutcomeClass::Failure, None)];
            let config = Config::default();

            let first = f.engine.distill(&episode, &steps, &config).await.unwrap();
            assert_eq!(first.created.len(), 1);
            let second = f.engine.distill(&episode, &steps, &config).await.unwrap();
            assert!(second.already_distilled);
            assert!(second.created.is_empty());
            assert_eq!(f.engine.feed(0.0).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_open_episode_rejected() {
            let f = fixture().await;
            let episode = Episode::new(
                "s",
                "goal",
                "done",
                Budget {
                    max_steps: 5,
                    max_seconds: 60,
                },
                Utc::now(),
            );
            let result = f.engine.distill(&episode, &[], &Config::default()).await;
            assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
        }

        #[tokio::test]
        async fn test_recurring_lesson_corroborates_then_promotes() {
            let f = fixture().await;
            let config = Config::default();

            let first = closed_episode();
            let report = f
                .engine
                .distill(&first, &[step(&first, 1, OutcomeClass::Failure, None)], &config)
                .await
                .unwrap();
            assert_eq!(report.created.len(), 1);
            assert!(report.promoted.is_empty());

            let second = closed_episode();
            let report = f
                .engine
                .distill(&second, &[step(&second, 1, OutcomeClass::Failure, None)], &config)
                .await
                .unwrap();
            assert_eq!(report.merged, 1);
            assert!(report.created.is_empty());
            assert_eq!(report.promoted.len(), 1);

            let feed = f.engine.feed(0.0).await.unwrap();
            assert_eq!(feed.len(), 1);
            assert_eq!(feed[0].validation_count, 1);
            assert_eq!(feed[0].source_episodes.len(), 2);
            assert!(feed[0].promoted_rule_id.is_some());
            assert_eq!(f.triggers.match_query("touching auth.rs again").await.len(), 1);
        }

        #[tokio::test]
        async fn test_retry_after_partial_run_does_not_merge_twice() {
            let pool = create_migrated_test_pool().await.unwrap();
            let store = Arc::new(FlakyDistillations {
                inner: SqliteDistillationRepository::new(pool.clone()),
                failing: AtomicBool::new(false),
            });
            let f = fixture_over(store.clone(), pool).await;
            let config = Config::default();

            let first = closed_episode();
            f.engine
                .distill(&first, &[step(&first, 1, OutcomeClass::Failure, None)], &config)
                .await
                .unwrap();

            let second = closed_episode();
            let lesson = "Regenerate the schema before running migrations";
            let steps = vec![
                step(&second, 1, OutcomeClass::Failure, None),
                step(&second, 2, OutcomeClass::Failure, Some(lesson)),
            ];
            store.failing.store(true, Ordering::SeqCst);
            let failed = f.engine.distill(&second, &steps, &config).await;
            assert!(matches!(failed, Err(DomainError::DatabaseError(_))));
            assert!(!store.has_run(second.id).await.unwrap());

            store.failing.store(false, Ordering::SeqCst);
            let report = f.engine.distill(&second, &steps, &config).await.unwrap();
            assert_eq!(report.merged, 0);
            assert_eq!(report.created.len(), 1);
            assert!(store.has_run(second.id).await.unwrap());

            let feed = f.engine.feed(0.0).await.unwrap();
            assert_eq!(feed.len(), 2);
            let recurring = feed.iter().find(|d| d.statement != lesson).unwrap();
            assert_eq!(recurring.validation_count, 1);
            assert!(feed.iter().any(|d| d.statement == lesson));
        }

        #[tokio::test]
        async fn test_opposite_outcome_contradicts() {
            let f = fixture().await;
            let config = Config::default();
            let lesson = "Clearing the token cache fixes stale sessions";

            let first = closed_episode();
            f.engine
                .distill(&first, &[step(&first, 1, OutcomeClass::Failure, Some(lesson))], &config)
                .await
                .unwrap();
            let second = closed_episode();
            let report = f
                .engine
                .distill(&second, &[step(&second, 1, OutcomeClass::Success, Some(lesson))], &config)
                .await
                .unwrap();
            assert_eq!(report.contradicted, 1);
            let feed = f.engine.feed(0.0).await.unwrap();
            assert_eq!(feed[0].contradiction_count, 1);
        }

        #[tokio::test]
        async fn test_policy_lessons_become_proposed_policies() {
            let f = fixture().await;
            let episode = closed_episode();
            let steps = vec![step(
                &episode,
                1,
                OutcomeClass::Failure,
                Some("Never edit generated protobuf files by hand"),
            )];
            let report = f
                .engine
                .distill(&episode, &steps, &Config::default())
                .await
                .unwrap();
            assert_eq!(report.created.len(), 1);
            let proposed = f
                .policies
                .list(Some(crate::domain::models::PolicyStatus::Proposed))
                .await
                .unwrap();
            assert_eq!(proposed.len(), 1);
        }
    }
}
