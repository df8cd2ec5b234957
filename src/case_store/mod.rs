//! Tenant-scoped document store for case records.
//!
//! The retrieval engine only reads from this store (fallback scans and
//! reindexing); authoring and approval live elsewhere.

mod models;
mod store;
mod trait_def;

pub use models::{CaseFilters, CaseRecord, CaseStatus};
pub use store::SqliteCaseStore;
pub use trait_def::CaseStore;
