//! Praxis - action governance for autonomous coding agents
//!
//! Praxis sits between an agent and its tools. Every action is wrapped in a
//! step that declares a falsifiable prediction, passes a guardrail chain and
//! is scored against what actually happened. Surprising outcomes become
//! insights; closed episodes are distilled into reusable rules that are fed
//! back as advice before the next action.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, port traits and errors
//! - **Adapters** (`adapters`): SQLite stores and embedding providers
//! - **Service Layer** (`services`): governor, guardrails, retrieval, distillation
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::{
    Config, DecisionPacket, Episode, Insight, Observation, Phase, Policy, Step, TerminalOutcome,
};
pub use domain::{DomainError, DomainResult, GovernanceError, GovernanceResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{EventWorker, Governor, GovernorStores, MaintenanceDaemon};
