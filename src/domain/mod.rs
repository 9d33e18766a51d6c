//! Domain layer for the Praxis governance core
//!
//! Pure models, port traits and the error taxonomy. Nothing here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, GovernanceError, GovernanceResult};
