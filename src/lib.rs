//! caseknow server library
//!
//! Retrieval fusion over full-text, vector and graph backends, a rerank
//! provider chain, and a bounded answer workflow with event streaming.

pub mod agent;
pub mod case_store;
pub mod config;
pub mod indexing;
pub mod metrics;
pub mod search;
pub mod server;
pub mod sources;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types for convenience
pub use case_store::{CaseStore, SqliteCaseStore};
pub use server::{make_app, run_server, RequestsLoggingLevel};
