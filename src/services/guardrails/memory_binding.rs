//! Memory binding: relevant memory surfaced by retrieval must be cited, or
//! explicitly reviewed and declared irrelevant.

use std::collections::HashSet;

use uuid::Uuid;

use super::{Guardrail, GuardrailContext, GuardrailResult};
use crate::domain::models::{GuardrailBlock, MemoryAcknowledgement, Remediation};

pub const NAME: &str = "memory-binding";

pub struct MemoryBinding;

impl Guardrail for MemoryBinding {
    fn name(&self) -> &str {
        NAME
    }

    fn before_step(&self, ctx: &GuardrailContext<'_>) -> GuardrailResult {
        let Some(packet) = ctx.proposed else {
            return GuardrailResult::Allowed;
        };
        let relevant: Vec<Uuid> = ctx.relevant_memory().iter().map(|i| i.id).collect();
        if relevant.is_empty() {
            return GuardrailResult::Allowed;
        }

        let acknowledged = match &packet.memory {
            MemoryAcknowledgement::Cited { ids } => ids.iter().any(|id| relevant.contains(id)),
            MemoryAcknowledgement::NoneRelevant { reviewed } => {
                let reviewed: HashSet<&Uuid> = reviewed.iter().collect();
                relevant.iter().all(|id| reviewed.contains(id))
            }
            MemoryAcknowledgement::None => false,
        };
        if acknowledged {
            return GuardrailResult::Allowed;
        }

        GuardrailResult::Blocked(GuardrailBlock::new(
            NAME,
            format!("{} relevant memories were surfaced but not acknowledged", relevant.len()),
            Remediation::CiteMemory { ids: relevant },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AdviceItem, AdviceResponse, AdviceSource, DecisionPacket, GuardrailConfig, Phase, Priority,
    };
    use crate::services::guardrails::testing::{episode, packet};

    fn item(source: AdviceSource, similarity: f64) -> AdviceItem {
        AdviceItem {
            id: Uuid::new_v4(),
            text: "advice".into(),
            source,
            priority: Priority::Normal,
            score: 0.8,
            similarity,
            distillation_id: None,
        }
    }

    fn check(advice: &AdviceResponse, proposed: &DecisionPacket) -> GuardrailResult {
        let episode = episode(Phase::Explore);
        let config = GuardrailConfig::default();
        MemoryBinding.before_step(&GuardrailContext {
            episode: &episode,
            steps: &[],
            proposed: Some(proposed),
            advice,
            policies: &[],
            config: &config,
            binding_threshold: 0.75,
        })
    }

    #[test]
    fn test_uncited_relevant_memory_blocks() {
        let trigger = item(AdviceSource::Trigger, 1.0);
        let close = item(AdviceSource::Semantic, 0.82);
        let advice = AdviceResponse {
            items: vec![trigger.clone(), close.clone()],
            degraded: false,
        };

        match check(&advice, &packet("Read", None)) {
            GuardrailResult::Blocked(block) => assert_eq!(
                block.remediation,
                Remediation::CiteMemory {
                    ids: vec![trigger.id, close.id]
                }
            ),
            other => panic!("expected block, got {other:?}"),
        }
        assert!(check(&advice, &packet("Read", None).citing(vec![close.id])).is_allowed());
        assert!(check(&advice, &packet("Read", None).citing(vec![Uuid::new_v4()])).is_blocked());
        assert!(check(
            &advice,
            &packet("Read", None).declaring_none_relevant(vec![trigger.id])
        )
        .is_blocked());
        assert!(check(
            &advice,
            &packet("Read", None).declaring_none_relevant(vec![trigger.id, close.id])
        )
        .is_allowed());
    }

    #[test]
    fn test_weak_semantic_matches_need_no_citation() {
        let advice = AdviceResponse {
            items: vec![item(AdviceSource::Semantic, 0.5)],
            degraded: false,
        };
        assert!(check(&advice, &packet("Read", None)).is_allowed());
    }
}
