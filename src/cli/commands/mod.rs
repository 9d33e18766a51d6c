//! CLI command implementations.

pub mod advise;
pub mod episodes;
pub mod ingest;
pub mod init;
pub mod policy;
pub mod rules;
pub mod run;
pub mod sweep;
pub mod trigger;
