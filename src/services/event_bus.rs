//! Governance event bus.
//!
//! Broadcasts what the governor decides (blocks, forced transitions,
//! completions, promotions) to any number of consumers: the external context
//! sync writer, dashboards, tests. Every event carries a monotonically
//! increasing sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{Evaluation, GuardrailBlock, Phase, TerminalOutcome};

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GovernancePayload {
    EpisodeOpened {
        session_id: String,
        goal: String,
    },
    StepBegan {
        step_id: Uuid,
        sequence: u32,
        phase: Phase,
    },
    StepBlocked {
        block: GuardrailBlock,
    },
    PhaseViolation {
        phase: Phase,
        required: Phase,
    },
    StepCompleted {
        step_id: Uuid,
        evaluation: Evaluation,
        surprise: f64,
        importance: f64,
        durable: bool,
    },
    PhaseChanged {
        from: Phase,
        to: Phase,
        reason: String,
    },
    BudgetExhausted {
        detail: String,
    },
    BudgetWarning {
        ratio: f64,
    },
    EpisodeClosed {
        outcome: TerminalOutcome,
    },
    DistillationCompleted {
        created: usize,
        merged: usize,
        contradicted: usize,
    },
    RulePromoted {
        distillation_id: Uuid,
        rule_id: Uuid,
        statement: String,
        confidence: f64,
    },
    PolicyProposed {
        policy_id: Uuid,
        statement: String,
    },
    PersistenceDegraded {
        reason: String,
    },
    PersistenceRecovered,
}

impl GovernancePayload {
    fn severity(&self) -> EventSeverity {
        match self {
            Self::StepBlocked { .. }
            | Self::PhaseViolation { .. }
            | Self::BudgetWarning { .. } => EventSeverity::Warning,
            Self::BudgetExhausted { .. } | Self::PersistenceDegraded { .. } => EventSeverity::Error,
            Self::StepBegan { .. } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceEvent {
    pub id: Uuid,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub episode_id: Option<Uuid>,
    pub payload: GovernancePayload,
}

/// Broadcast bus for governance events.
pub struct GovernanceEventBus {
    sender: broadcast::Sender<GovernanceEvent>,
    sequence: AtomicU64,
}

impl Default for GovernanceEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl GovernanceEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event and return the sequence number it was assigned.
    pub fn publish(&self, episode_id: Option<Uuid>, payload: GovernancePayload) -> SequenceNumber {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        let event = GovernanceEvent {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            severity: payload.severity(),
            episode_id,
            payload,
        };
        // No subscribers is fine.
        let _ = self.sender.send(event);
        sequence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }

    /// Next sequence number to be assigned.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let bus = GovernanceEventBus::default();
        let mut rx = bus.subscribe();

        let first = bus.publish(None, GovernancePayload::PersistenceRecovered);
        let second = bus.publish(
            None,
            GovernancePayload::BudgetExhausted {
                detail: "3 of 3".into(),
            },
        );
        assert!(second > first);
        assert_eq!(bus.current_sequence().0, 2);

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.sequence, first);
        assert_eq!(b.severity, EventSeverity::Error);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = GovernanceEventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(None, GovernancePayload::PersistenceRecovered);
    }
}
