//! Retrieval source adapters.
//!
//! Each adapter answers "given a query and tenant scope, return scored
//! candidates" and fails independently of the others. Adapters that can also
//! receive published cases implement [`CaseIndexer`].

mod elasticsearch;
mod embedding;
mod graph;
mod vector;

pub use elasticsearch::{ElasticsearchSettings, ElasticsearchSource};
pub use embedding::{EmbeddingError, EmbeddingProvider, OpenAIEmbeddings};
pub use graph::{GraphSettings, GraphSource, RelatedCase};
pub use vector::{VectorSettings, VectorSource};

use crate::case_store::CaseRecord;
use crate::search::{SearchQuery, SourceTag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a retrieval source can report. The fusion engine never surfaces
/// these; they only degrade the source's contribution to empty.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::InvalidResponse(e.to_string())
        } else {
            SourceError::Connection(e.to_string())
        }
    }
}

/// A scored case returned by one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHit {
    pub case_id: String,
    pub title: String,
    pub content: String,
    pub score: f64,
}

impl SourceHit {
    pub fn new(
        case_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            title: title.into(),
            content: content.into(),
            score,
        }
    }
}

/// A retrieval backend queried by the fusion engine.
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    /// Which score slot this source fills.
    fn tag(&self) -> SourceTag;

    /// Disabled sources are skipped without being queried.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Search within the query's tenant scope and filters.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError>;
}

/// A retrieval backend that accepts published cases.
#[async_trait]
pub trait CaseIndexer: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace a case in the backend.
    async fn index_case(&self, case: &CaseRecord) -> Result<(), SourceError>;

    /// Remove a case from the backend.
    async fn remove_case(&self, tenant_id: &str, case_id: &str) -> Result<(), SourceError>;
}

/// Scale hit scores into [0, 1] by the largest score in the batch.
///
/// Backends like BM25 or tag counts report unbounded scores; fusion weights
/// assume comparable ranges.
pub(crate) fn normalize_scores(hits: &mut [SourceHit]) {
    let max = hits.iter().map(|h| h.score).fold(0.0_f64, f64::max);
    if max > 0.0 {
        for hit in hits.iter_mut() {
            hit.score /= max;
        }
    }
}

/// Document key unique across tenants.
pub(crate) fn scoped_key(tenant_id: &str, case_id: &str) -> String {
    format!("{}:{}", tenant_id, case_id)
}

/// Escape a value for inclusion in a double-quoted filter expression.
pub(crate) fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_scores() {
        let mut hits = vec![
            SourceHit::new("a", "A", "", 8.0),
            SourceHit::new("b", "B", "", 2.0),
        ];
        normalize_scores(&mut hits);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 0.25);

        let mut zeros = vec![SourceHit::new("a", "A", "", 0.0)];
        normalize_scores(&mut zeros);
        assert_eq!(zeros[0].score, 0.0);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("t1"), "\"t1\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }
}
