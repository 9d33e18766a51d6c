//! Retrieval / fusion engine.
//!
//! Merges trigger-rule matches and embedding-similarity matches into one
//! ranked advice list. Read-only over its stores; safe to call concurrently.
//!
//! Fusion score = similarity·w_sim + recency·w_rec + effectiveness·w_out +
//! priority boost. Trigger matches count as similarity 1.0 and never rank
//! below a semantic match of the same priority tier.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AdviceItem, AdviceResponse, AdviceSource, InsightKind, PrecisionMode, Priority,
    RetrievalConfig,
};
use crate::domain::ports::{DistillationRepository, InsightRepository};
use crate::services::embedding_index::EmbeddingIndex;
use crate::services::trigger_rules::TriggerRuleEngine;

/// Exponential decay with the configured half-life, 1.0 for "just now".
pub fn recency(last: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = ((now - last).num_seconds().max(0) as f64) / 86_400.0;
    if half_life_days <= 0.0 {
        return 0.0;
    }
    0.5_f64.powf(age_days / half_life_days)
}

fn fusion(config: &RetrievalConfig, similarity: f64, recency: f64, effectiveness: f64, priority: Priority) -> f64 {
    similarity * config.weights.similarity
        + recency * config.weights.recency
        + effectiveness * config.weights.outcome
        + priority.boost()
}

fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

struct Candidate {
    item: AdviceItem,
    rank_key: f64,
}

pub struct RetrievalEngine {
    triggers: Arc<TriggerRuleEngine>,
    index: Arc<EmbeddingIndex>,
    insights: Arc<dyn InsightRepository>,
    distillations: Arc<dyn DistillationRepository>,
}

impl RetrievalEngine {
    pub fn new(
        triggers: Arc<TriggerRuleEngine>,
        index: Arc<EmbeddingIndex>,
        insights: Arc<dyn InsightRepository>,
        distillations: Arc<dyn DistillationRepository>,
    ) -> Self {
        Self {
            triggers,
            index,
            insights,
            distillations,
        }
    }

    /// Ranked advice for `query`. Embedding failures degrade to trigger-only
    /// advice with `degraded` set; storage failures are returned.
    pub async fn advise(
        &self,
        query: &str,
        limit: usize,
        mode: Option<PrecisionMode>,
        config: &RetrievalConfig,
        now: DateTime<Utc>,
    ) -> DomainResult<AdviceResponse> {
        let mode = mode.unwrap_or(config.precision_mode);
        let mut candidates = self.trigger_candidates(query, config, now).await?;

        let mut degraded = false;
        let semantic = match self.semantic_candidates(query, mode, config, now).await {
            Ok(found) => found,
            Err(DomainError::EmbeddingUnavailable(reason)) => {
                tracing::warn!(%reason, "semantic retrieval unavailable; using trigger rules only");
                degraded = true;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        // Triggers rank at least as high as the best semantic hit in their tier.
        let mut best_semantic: BTreeMap<Priority, f64> = BTreeMap::new();
        for c in &semantic {
            let best = best_semantic.entry(c.item.priority).or_insert(f64::MIN);
            *best = best.max(c.rank_key);
        }
        for c in &mut candidates {
            if let Some(best) = best_semantic.get(&c.item.priority) {
                c.rank_key = c.rank_key.max(*best);
            }
            c.item.score = c.rank_key;
        }

        let trigger_distillations: HashSet<Uuid> = candidates
            .iter()
            .filter_map(|c| c.item.distillation_id)
            .collect();
        candidates.extend(semantic.into_iter().filter(|c| {
            c.item
                .distillation_id
                .map_or(true, |id| !trigger_distillations.contains(&id))
        }));

        candidates.sort_by(|a, b| {
            b.rank_key
                .total_cmp(&a.rank_key)
                .then_with(|| source_order(a.item.source).cmp(&source_order(b.item.source)))
        });

        let mut items: Vec<AdviceItem> = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut seen_text = HashSet::new();
        let mut seen_tokens: Vec<HashSet<String>> = Vec::new();
        for c in candidates {
            if items.len() >= limit {
                break;
            }
            if !seen_ids.insert(c.item.id) || !seen_text.insert(normalize(&c.item.text)) {
                continue;
            }
            let tokens = token_set(&c.item.text);
            if seen_tokens
                .iter()
                .any(|t| jaccard(t, &tokens) >= config.diversity_threshold)
            {
                tracing::debug!(id = %c.item.id, "suppressed near-duplicate advice");
                continue;
            }
            seen_tokens.push(tokens);
            items.push(c.item);
        }

        tracing::debug!(
            query,
            returned = items.len(),
            degraded,
            mode = ?mode,
            "advice ranked"
        );
        Ok(AdviceResponse { items, degraded })
    }

    async fn trigger_candidates(
        &self,
        query: &str,
        config: &RetrievalConfig,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Candidate>> {
        let mut out = Vec::new();
        for matched in self.triggers.match_query(query).await {
            let rule = matched.rule;
            let (effectiveness, reinforced) = match rule.distillation_id {
                Some(id) => match self.distillations.get(id).await? {
                    Some(d) if !d.is_active() => continue,
                    Some(d) => (d.effectiveness(), d.last_reinforced_at),
                    None => (0.5, rule.updated_at),
                },
                None => (0.5, rule.updated_at),
            };
            let score = fusion(
                config,
                1.0,
                recency(reinforced, now, config.recency_half_life_days),
                effectiveness,
                rule.priority,
            );
            out.push(Candidate {
                item: AdviceItem {
                    id: rule.id,
                    text: rule.advice,
                    source: AdviceSource::Trigger,
                    priority: rule.priority,
                    score,
                    similarity: 1.0,
                    distillation_id: rule.distillation_id,
                },
                rank_key: score,
            });
        }
        Ok(out)
    }

    async fn semantic_candidates(
        &self,
        query: &str,
        mode: PrecisionMode,
        config: &RetrievalConfig,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Candidate>> {
        let floor = (config.min_similarity + mode.offset()).clamp(0.0, 1.0);
        let hits = self.index.search(query, config.top_k, floor, None).await?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(insight) = self.insights.get(hit.id).await? else {
                continue;
            };
            if insight.is_expired_at(now) {
                continue;
            }
            let (effectiveness, reinforced, distillation_id, priority) = match &insight.kind {
                InsightKind::DistilledRule { distillation_id, .. } => {
                    match self.distillations.get(*distillation_id).await? {
                        Some(d) if d.is_active() => (
                            d.effectiveness(),
                            d.last_reinforced_at,
                            Some(d.id),
                            Priority::Normal,
                        ),
                        _ => continue,
                    }
                }
                _ => (0.5, insight.updated_at, None, Priority::Normal),
            };
            let score = fusion(
                config,
                hit.similarity,
                recency(reinforced, now, config.recency_half_life_days),
                effectiveness,
                priority,
            );
            out.push(Candidate {
                item: AdviceItem {
                    id: insight.id,
                    text: insight.text().to_string(),
                    source: AdviceSource::Semantic,
                    priority,
                    score,
                    similarity: hit.similarity,
                    distillation_id,
                },
                rank_key: score,
            });
        }
        Ok(out)
    }
}

const fn source_order(source: AdviceSource) -> u8 {
    match source {
        AdviceSource::Trigger => 0,
        AdviceSource::Semantic => 1,
    }
}
