//! Evidence capture, retention and the evidence-before-modification rule.

mod common;

use chrono::{Duration, Utc};
use praxis::domain::models::{
    DiagnosticKind, EvidenceInput, EvidenceKind, Observation, Phase, Remediation,
};
use praxis::GovernanceError;

use common::{bash, edit, read, setup};

#[tokio::test]
async fn test_evidence_is_scrubbed_and_swept_by_retention() {
    let env = setup().await;
    let gov = &env.governor;
    let episode = gov
        .open_episode("s1", "inspect env", "env understood", vec![], None)
        .await
        .unwrap();
    let handle = gov.begin_step(episode.id, read(".env"), None).await.unwrap();
    let observation = Observation::success("env read")
        .with_evidence(EvidenceInput::new(
            EvidenceKind::ToolOutput,
            "OPENAI_API_KEY=sk-abcdefghijklmnopqrstuvwx",
        ))
        .with_evidence(EvidenceInput::new(EvidenceKind::UserFlagged, "keep this one"));
    let report = gov
        .complete_step(episode.id, handle.step.id, observation)
        .await
        .unwrap();
    assert_eq!(report.step.outcome.as_ref().unwrap().evidence_ids.len(), 2);

    let stored = gov.evidence().for_step(handle.step.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    let tool_output = stored
        .iter()
        .find(|e| e.kind == EvidenceKind::ToolOutput)
        .unwrap();
    assert!(!tool_output.content.contains("sk-abcdefghijklmnopqrstuvwx"));
    assert_eq!(tool_output.target.as_deref(), Some(".env"));
    assert!(tool_output.expires_at.is_some());

    let refs = gov.episode(episode.id).await.unwrap().evidence_refs;
    assert_eq!(refs.len(), 2);

    let swept = gov
        .evidence()
        .sweep(Utc::now() + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(swept.deleted, 1);
    let remaining = gov.evidence().for_step(handle.step.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, EvidenceKind::UserFlagged);
}

#[tokio::test]
async fn test_failed_edits_require_diagnostic_evidence() {
    let env = setup().await;
    let gov = &env.governor;
    let episode = gov
        .open_episode("s1", "fix the insert", "insert works", vec![], None)
        .await
        .unwrap();
    gov.transition(episode.id, Phase::Plan, "explored").await.unwrap();
    gov.transition(episode.id, Phase::Execute, "planned").await.unwrap();

    for error in ["constraint violated on users", "syntax error near VALUES"] {
        let handle = gov.begin_step(episode.id, edit("src/db.rs"), None).await.unwrap();
        gov.complete_step(
            episode.id,
            handle.step.id,
            Observation::failure("edit broke the insert", error),
        )
        .await
        .unwrap();
    }

    match gov.begin_step(episode.id, edit("src/db.rs"), None).await {
        Err(GovernanceError::GuardrailBlocked(block)) => {
            assert_eq!(block.guardrail, "evidence-before-modification");
            assert!(matches!(
                block.remediation,
                Remediation::RecordDiagnosticEvidence { ref target } if target == "src/db.rs"
            ));
        }
        other => panic!("expected evidence-before-modification, got {other:?}"),
    }

    let check = gov
        .begin_step(episode.id, bash("cargo test db::insert"), None)
        .await
        .unwrap();
    gov.complete_step(
        episode.id,
        check.step.id,
        Observation::success("reproduced: duplicate email").with_evidence(
            EvidenceInput::new(EvidenceKind::TestResult, "db::insert failed: UNIQUE constraint users.email")
                .diagnostic(DiagnosticKind::Reproduction)
                .for_target("src/db.rs"),
        ),
    )
    .await
    .unwrap();

    gov.begin_step(episode.id, edit("src/db.rs"), None)
        .await
        .unwrap();
}
