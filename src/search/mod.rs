//! Case search: multi-source fusion, reranking and pagination.

pub mod fusion;
mod models;
pub mod orchestrator;
pub mod rerank;

pub use fusion::{FusionEngine, FusionSettings};
pub use models::{combined_score, Candidate, SearchPage, SearchQuery, SourceTag};
pub use orchestrator::{
    paginate, RankedResults, SearchError, SearchOrchestrator, SearchSettings, RESULT_WINDOW,
};
pub use rerank::{RerankChain, RerankOutcome, RerankProvider};
