//! Search pipeline: validate, fuse, cap, rerank, paginate.

use super::fusion::FusionEngine;
use super::models::{Candidate, SearchPage, SearchQuery};
use super::rerank::RerankChain;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("Page must be at least 1")]
    InvalidPage,

    #[error("Page size must be between 1 and {max}, got {got}")]
    InvalidPageSize { got: usize, max: usize },

    #[error("Tenant id must not be empty")]
    MissingTenant,
}

/// Upper bound for both the candidate window and the page size.
pub const RESULT_WINDOW: usize = 100;

#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Fused candidates beyond this are dropped before reranking.
    pub candidate_cap: usize,
    pub max_page_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            candidate_cap: RESULT_WINDOW,
            max_page_size: RESULT_WINDOW,
        }
    }
}

/// The fused and reranked result set before pagination.
#[derive(Debug, Clone)]
pub struct RankedResults {
    pub candidates: Vec<Candidate>,
    pub reranked_by: &'static str,
}

pub struct SearchOrchestrator {
    fusion: FusionEngine,
    rerank: RerankChain,
    settings: SearchSettings,
}

impl SearchOrchestrator {
    pub fn new(fusion: FusionEngine, rerank: RerankChain, settings: SearchSettings) -> Self {
        Self {
            fusion,
            rerank,
            settings,
        }
    }

    pub fn validate(&self, query: &SearchQuery) -> Result<(), SearchError> {
        if query.tenant_id.trim().is_empty() {
            return Err(SearchError::MissingTenant);
        }
        if query.page < 1 {
            return Err(SearchError::InvalidPage);
        }
        if query.page_size < 1 || query.page_size > self.settings.max_page_size {
            return Err(SearchError::InvalidPageSize {
                got: query.page_size,
                max: self.settings.max_page_size,
            });
        }
        Ok(())
    }

    /// Full ranked list for the query, capped and reranked, ignoring paging.
    pub async fn ranked(&self, query: &SearchQuery) -> RankedResults {
        let mut fused = self.fusion.fuse(query).await;
        if fused.len() > self.settings.candidate_cap {
            debug!(
                dropped = fused.len() - self.settings.candidate_cap,
                "Capping fused candidates"
            );
            fused.truncate(self.settings.candidate_cap);
        }

        let outcome = self
            .rerank
            .rerank(&query.text, &fused, self.settings.candidate_cap)
            .await;
        RankedResults {
            candidates: outcome.candidates,
            reranked_by: outcome.provider,
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        self.validate(query)?;
        let ranked = self.ranked(query).await;
        Ok(paginate(
            ranked.candidates,
            query.page,
            query.page_size,
            ranked.reranked_by,
        ))
    }
}

/// Slice one page out of a ranked list. `page` and `page_size` are 1-based
/// and already validated.
pub fn paginate(
    ranked: Vec<Candidate>,
    page: usize,
    page_size: usize,
    reranked_by: &'static str,
) -> SearchPage {
    let total = ranked.len();
    let page_size = page_size.max(1);
    let total_pages = total.div_ceil(page_size);
    let start = page.saturating_sub(1).saturating_mul(page_size);

    let items = ranked.into_iter().skip(start).take(page_size).collect();
    SearchPage {
        items,
        total,
        page,
        page_size,
        total_pages,
        reranked_by,
    }
}
