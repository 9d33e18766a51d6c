//! End-to-end governance scenarios over the SQLite stores.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use praxis::adapters::sqlite::{
    create_migrated_test_pool, SqliteDistillationRepository, SqliteEpisodeRepository,
};
use praxis::domain::errors::{DomainError, DomainResult};
use praxis::domain::models::{
    ActionCategory, Budget, Config, Distillation, Episode, Observation, Phase, Priority,
    Remediation, Step, TerminalOutcome,
};
use praxis::domain::ports::{DistillationRepository, EpisodeRepository};
use praxis::services::{GovernancePayload, TriggerRule};
use praxis::GovernanceError;
use uuid::Uuid;

use common::{bash, edit, read, setup, setup_with};

async fn into_execute(gov: &praxis::Governor, episode_id: Uuid) {
    gov.transition(episode_id, Phase::Plan, "explored").await.unwrap();
    gov.transition(episode_id, Phase::Execute, "planned").await.unwrap();
}

#[tokio::test]
async fn test_budget_exhaustion_escalates_until_approved() {
    let env = setup().await;
    let gov = &env.governor;
    let episode = gov
        .open_episode(
            "s1",
            "map the config loader",
            "loader documented",
            vec![],
            Some(Budget {
                max_steps: 2,
                max_seconds: 3600,
            }),
        )
        .await
        .unwrap();

    for (i, target) in ["a.rs", "b.rs"].iter().enumerate() {
        let handle = gov.begin_step(episode.id, read(target), None).await.unwrap();
        if i == 1 {
            assert!(handle.warnings.iter().any(|w| w.contains("budget")));
        }
        gov.complete_step(episode.id, handle.step.id, Observation::success(format!("{target} read")))
            .await
            .unwrap();
    }

    let exhausted = gov.begin_step(episode.id, read("c.rs"), None).await;
    assert!(matches!(exhausted, Err(GovernanceError::BudgetExhausted { .. })));
    let escalated = gov.episode(episode.id).await.unwrap();
    assert_eq!(escalated.phase, Phase::Escalate);
    assert_eq!(escalated.steps_taken, 2);

    let approved = gov.approve_escalation(episode.id, 3, 0).await.unwrap();
    assert_eq!(approved.phase, Phase::Plan);
    assert_eq!(approved.budget.max_steps, 5);

    let handle = gov.begin_step(episode.id, read("c.rs"), None).await.unwrap();
    assert_eq!(handle.step.sequence, 3);
}

#[tokio::test]
async fn test_mutation_outside_execute_is_a_phase_violation() {
    let env = setup().await;
    let gov = &env.governor;
    let episode = gov
        .open_episode("s1", "fix the parser", "tests pass", vec![], None)
        .await
        .unwrap();

    let result = gov.begin_step(episode.id, edit("src/parser.rs"), None).await;
    match result {
        Err(GovernanceError::PhaseViolation {
            phase,
            category,
            required,
        }) => {
            assert_eq!(phase, Phase::Explore);
            assert_eq!(category, ActionCategory::Mutate);
            assert_eq!(required, Phase::Execute);
        }
        other => panic!("expected a phase violation, got {other:?}"),
    }

    let unchanged = gov.episode(episode.id).await.unwrap();
    assert_eq!(unchanged.steps_taken, 0);
    assert_eq!(unchanged.phase, Phase::Explore);
    assert!(unchanged.active_step.is_none());
}

#[tokio::test]
async fn test_trigger_advice_must_be_cited() {
    let env = setup().await;
    let gov = &env.governor;
    let rule = gov
        .triggers()
        .add_rule(TriggerRule::new(
            "auth-cache",
            "auth",
            "clear the token cache before touching auth",
            Priority::High,
        ))
        .await
        .unwrap();
    let episode = gov
        .open_episode("s1", "fix login", "login works", vec![], None)
        .await
        .unwrap();

    let blocked = gov.begin_step(episode.id, read("src/auth.rs"), None).await;
    match blocked {
        Err(GovernanceError::GuardrailBlocked(block)) => {
            assert_eq!(block.guardrail, "memory-binding");
            assert!(block.force_phase.is_none());
            match block.remediation {
                Remediation::CiteMemory { ids } => assert!(ids.contains(&rule.id)),
                other => panic!("unexpected remediation {other:?}"),
            }
        }
        other => panic!("expected a memory-binding block, got {other:?}"),
    }

    let handle = gov
        .begin_step(episode.id, read("src/auth.rs").citing(vec![rule.id]), None)
        .await
        .unwrap();
    assert!(handle.advice.ids().contains(&rule.id));
    assert!(handle.step.packet.memory_cited());
}

#[tokio::test]
async fn test_diff_thrash_freezes_target_until_released() {
    let env = setup().await;
    let gov = &env.governor;
    let mut events = gov.bus().subscribe();
    let episode = gov
        .open_episode("s1", "tidy lib", "lib compiles", vec![], None)
        .await
        .unwrap();
    into_execute(gov, episode.id).await;

    let mut last = None;
    for i in 1..=3 {
        let handle = gov.begin_step(episode.id, edit("src/lib.rs"), None).await.unwrap();
        let report = gov
            .complete_step(
                episode.id,
                handle.step.id,
                Observation::success(format!("edit {i} applied")).with_state_change(),
            )
            .await
            .unwrap();
        last = Some(report);
    }
    let report = last.unwrap();
    let watcher = report.watcher.expect("diff-thrash should fire on the third edit");
    assert_eq!(watcher.guardrail, "diff-thrash");
    assert_eq!(report.phase, Phase::Simplify);
    assert!(gov.episode(episode.id).await.unwrap().is_frozen("src/lib.rs"));

    gov.transition(episode.id, Phase::Execute, "simplified").await.unwrap();
    let frozen = gov.begin_step(episode.id, edit("src/lib.rs"), None).await;
    assert!(matches!(
        frozen,
        Err(GovernanceError::GuardrailBlocked(ref b)) if b.guardrail == "diff-thrash"
    ));

    assert!(gov.release_target(episode.id, "src/lib.rs").await.unwrap());
    gov.begin_step(episode.id, edit("src/lib.rs"), None).await.unwrap();

    let mut forced = false;
    while let Ok(event) = events.try_recv() {
        if let GovernancePayload::PhaseChanged { to: Phase::Simplify, .. } = event.payload {
            forced = true;
        }
    }
    assert!(forced, "a forced SIMPLIFY transition should be published");
}

#[tokio::test]
async fn test_repeated_error_forces_diagnose() {
    let env = setup().await;
    let gov = &env.governor;
    let episode = gov
        .open_episode("s1", "start the server", "server answers", vec![], None)
        .await
        .unwrap();
    into_execute(gov, episode.id).await;

    let error = "error[E0425]: cannot find value `port` in this scope";
    let first = gov.begin_step(episode.id, bash("cargo run"), None).await.unwrap();
    let report = gov
        .complete_step(episode.id, first.step.id, Observation::failure("run failed", error))
        .await
        .unwrap();
    assert!(report.watcher.is_none());
    assert_eq!(report.phase, Phase::Execute);

    let second = gov.begin_step(episode.id, bash("cargo run"), None).await.unwrap();
    let report = gov
        .complete_step(
            episode.id,
            second.step.id,
            Observation::failure("run failed again", error),
        )
        .await
        .unwrap();
    assert_eq!(report.watcher.map(|b| b.guardrail).as_deref(), Some("repeat-error"));
    assert_eq!(report.phase, Phase::Diagnose);

    let steps = gov.steps(episode.id).await.unwrap();
    assert_eq!(
        steps[0].outcome.as_ref().and_then(|o| o.error_signature.clone()),
        steps[1].outcome.as_ref().and_then(|o| o.error_signature.clone()),
    );
}

#[tokio::test]
async fn test_distilled_rule_binds_the_next_episode() {
    let env = setup().await;
    let gov = &env.governor;
    let first = gov
        .open_episode("s1", "read the auth module", "auth understood", vec![], None)
        .await
        .unwrap();
    let handle = gov.begin_step(first.id, read("src/auth.rs"), None).await.unwrap();
    let report = gov
        .complete_step(
            first.id,
            handle.step.id,
            Observation::failure("permission denied reading auth.rs", "EACCES: permission denied")
                .with_lesson("auth.rs is root-owned; read the fixture copy instead"),
        )
        .await
        .unwrap();
    let outcome = report.step.outcome.unwrap();
    assert!((outcome.surprise - 1.0).abs() < 1e-9);

    let closed = gov
        .close_episode(first.id, TerminalOutcome::Aborted, "gave up")
        .await
        .unwrap();
    assert!(closed.persisted);
    let distilled = closed.distillation.expect("distillation should run on close");
    assert_eq!(distilled.created.len(), 1);
    assert_eq!(distilled.promoted, distilled.created);

    let rules = gov.distillation().feed(0.0).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].statement, "auth.rs is root-owned; read the fixture copy instead");
    assert!(rules[0].promoted_rule_id.is_some());

    let second = gov
        .open_episode("s2", "patch the auth module", "auth patched", vec![], None)
        .await
        .unwrap();
    let ids = match gov.begin_step(second.id, read("src/auth.rs"), None).await {
        Err(GovernanceError::GuardrailBlocked(block)) => match block.remediation {
            Remediation::CiteMemory { ids } => ids,
            other => panic!("unexpected remediation {other:?}"),
        },
        other => panic!("expected the distilled rule to bind, got {other:?}"),
    };
    assert!(ids.contains(&rules[0].promoted_rule_id.unwrap()));

    gov.begin_step(second.id, read("src/auth.rs").citing(ids), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_closing_twice_is_rejected_and_distills_once() {
    let env = setup().await;
    let gov = &env.governor;
    let episode = gov
        .open_episode("s1", "goal", "done", vec![], None)
        .await
        .unwrap();
    gov.close_episode(episode.id, TerminalOutcome::Aborted, "stop")
        .await
        .unwrap();
    let again = gov
        .close_episode(episode.id, TerminalOutcome::Aborted, "stop")
        .await;
    assert!(matches!(again, Err(GovernanceError::EpisodeClosed(_))));
    assert!(gov.list_episodes(true).await.unwrap().is_empty());
}

/// Episode store that can be switched into a failing state.
struct FlakyEpisodes {
    inner: SqliteEpisodeRepository,
    failing: AtomicBool,
}

impl FlakyEpisodes {
    fn check(&self) -> DomainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DomainError::DatabaseError("database is locked".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EpisodeRepository for FlakyEpisodes {
    async fn upsert_episode(&self, episode: &Episode) -> DomainResult<()> {
        self.check()?;
        self.inner.upsert_episode(episode).await
    }

    async fn get_episode(&self, id: Uuid) -> DomainResult<Option<Episode>> {
        self.inner.get_episode(id).await
    }

    async fn find_open_by_session(&self, session_id: &str) -> DomainResult<Option<Episode>> {
        self.inner.find_open_by_session(session_id).await
    }

    async fn list_episodes(&self, open_only: bool) -> DomainResult<Vec<Episode>> {
        self.inner.list_episodes(open_only).await
    }

    async fn upsert_step(&self, step: &Step) -> DomainResult<()> {
        self.check()?;
        self.inner.upsert_step(step).await
    }

    async fn get_step(&self, id: Uuid) -> DomainResult<Option<Step>> {
        self.inner.get_step(id).await
    }

    async fn list_steps(&self, episode_id: Uuid) -> DomainResult<Vec<Step>> {
        self.inner.list_steps(episode_id).await
    }

    async fn find_step_by_source_event(&self, event_id: &str) -> DomainResult<Option<Step>> {
        self.inner.find_step_by_source_event(event_id).await
    }
}

#[tokio::test]
async fn test_storage_outage_escalates_and_recovers() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(FlakyEpisodes {
        inner: SqliteEpisodeRepository::new(pool.clone()),
        failing: AtomicBool::new(false),
    });
    let mut config = Config::default();
    config.persistence.initial_backoff_ms = 1;
    config.persistence.max_elapsed_ms = 20;
    let gov = common::governor_over(&pool, Arc::clone(&store) as Arc<dyn EpisodeRepository>, config);
    let mut events = gov.bus().subscribe();

    let episode = gov
        .open_episode("s1", "goal", "done", vec![], None)
        .await
        .unwrap();
    store.failing.store(true, Ordering::SeqCst);

    let handle = gov.begin_step(episode.id, read("a.rs"), None).await.unwrap();
    assert!(handle
        .warnings
        .iter()
        .any(|w| w.contains("Canonical storage write failed")));
    assert_eq!(gov.pending_count(), 1);
    let held = gov.episode(episode.id).await.unwrap();
    assert!(held.unpersisted);
    assert_eq!(held.phase, Phase::Escalate);

    // Nothing recovers while storage is still down.
    assert_eq!(gov.flush_pending().await, 0);

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(gov.flush_pending().await, 1);
    assert_eq!(gov.pending_count(), 0);

    let stored = store.get_episode(episode.id).await.unwrap().unwrap();
    assert!(!stored.unpersisted);
    assert_eq!(stored.phase, Phase::Escalate);
    assert_eq!(store.list_steps(episode.id).await.unwrap().len(), 1);

    let mut degraded = 0;
    let mut recovered = 0;
    while let Ok(event) = events.try_recv() {
        match event.payload {
            GovernancePayload::PersistenceDegraded { .. } => degraded += 1,
            GovernancePayload::PersistenceRecovered => recovered += 1,
            _ => {}
        }
    }
    assert_eq!(degraded, 1);
    assert_eq!(recovered, 1);
}

#[tokio::test]
async fn test_disabled_guardrail_does_not_block() {
    let mut config = Config::default();
    config.guardrails.disabled = vec!["memory-binding".to_string()];
    let env = setup_with(config).await;
    let gov = &env.governor;
    gov.triggers()
        .add_rule(TriggerRule::new("auth", "auth", "mind the cache", Priority::Normal))
        .await
        .unwrap();
    let episode = gov
        .open_episode("s1", "goal", "done", vec![], None)
        .await
        .unwrap();
    let handle = gov.begin_step(episode.id, read("src/auth.rs"), None).await.unwrap();
    assert!(!handle.advice.is_empty());
}

/// Distillation store that can be switched into a failing state.
struct FlakyDistillations {
    inner: SqliteDistillationRepository,
    failing: AtomicBool,
}

impl FlakyDistillations {
    fn check(&self) -> DomainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DomainError::DatabaseError("disk I/O error".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistillationRepository for FlakyDistillations {
    async fn insert(&self, distillation: &Distillation) -> DomainResult<()> {
        self.check()?;
        self.inner.insert(distillation).await
    }

    async fn update(&self, distillation: &Distillation) -> DomainResult<()> {
        self.check()?;
        self.inner.update(distillation).await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Distillation>> {
        self.inner.get(id).await
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> DomainResult<Option<Distillation>> {
        self.inner.find_by_fingerprint(fingerprint).await
    }

    async fn list(&self, min_confidence: f64, include_superseded: bool) -> DomainResult<Vec<Distillation>> {
        self.inner.list(min_confidence, include_superseded).await
    }

    async fn record_run(&self, episode_id: Uuid, candidates: u32) -> DomainResult<bool> {
        self.check()?;
        self.inner.record_run(episode_id, candidates).await
    }

    async fn has_run(&self, episode_id: Uuid) -> DomainResult<bool> {
        self.check()?;
        self.inner.has_run(episode_id).await
    }
}

#[tokio::test]
async fn test_failed_distillation_is_retried_by_flush() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(FlakyDistillations {
        inner: SqliteDistillationRepository::new(pool.clone()),
        failing: AtomicBool::new(false),
    });
    let gov = common::governor_with_stores(
        &pool,
        Arc::new(SqliteEpisodeRepository::new(pool.clone())),
        Arc::clone(&store) as Arc<dyn DistillationRepository>,
        Config::default(),
    );

    let episode = gov
        .open_episode("s1", "read the auth module", "auth understood", vec![], None)
        .await
        .unwrap();
    let handle = gov.begin_step(episode.id, read("src/auth.rs"), None).await.unwrap();
    gov.complete_step(
        episode.id,
        handle.step.id,
        Observation::failure("permission denied reading auth.rs", "EACCES: permission denied")
            .with_lesson("auth.rs is root-owned; read the fixture copy instead"),
    )
    .await
    .unwrap();

    store.failing.store(true, Ordering::SeqCst);
    let closed = gov
        .close_episode(episode.id, TerminalOutcome::Aborted, "gave up")
        .await
        .unwrap();
    assert!(closed.persisted);
    assert!(closed.distillation.is_none());
    assert_eq!(gov.undistilled_count(), 1);

    // Still down: nothing recovers and the episode stays queued.
    assert_eq!(gov.flush_pending().await, 0);
    assert_eq!(gov.undistilled_count(), 1);

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(gov.flush_pending().await, 1);
    assert_eq!(gov.undistilled_count(), 0);
    assert!(store.has_run(episode.id).await.unwrap());

    let rules = gov.distillation().feed(0.0).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].statement, "auth.rs is root-owned; read the fixture copy instead");
}
