//! Candidate and query types shared by fusion, reranking and pagination.

use crate::case_store::CaseFilters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies which retrieval path produced a score.
///
/// The declaration order is the adapter priority used to break ties during
/// fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    FullText,
    Vector,
    Graph,
    Fallback,
}

impl SourceTag {
    /// Weight of this source in the combined score.
    pub fn weight(&self) -> f64 {
        match self {
            SourceTag::FullText => 0.4,
            SourceTag::Vector => 0.4,
            SourceTag::Graph => 0.2,
            SourceTag::Fallback => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::FullText => "full_text",
            SourceTag::Vector => "vector",
            SourceTag::Graph => "graph",
            SourceTag::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted sum of per-source raw scores. Absent sources contribute 0.
pub fn combined_score(scores: &BTreeMap<SourceTag, f64>) -> f64 {
    scores.iter().map(|(tag, score)| tag.weight() * score).sum()
}

/// A case annotated with relevance scores during a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub case_id: String,
    pub title: String,
    pub content: String,
    /// Raw score reported by each source that returned this case.
    pub scores: BTreeMap<SourceTag, f64>,
    pub combined_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    /// Name of the rerank provider that produced `rerank_score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_source: Option<String>,
    /// Sources that reported this case, in first-seen order.
    pub provenance: Vec<SourceTag>,
}

impl Candidate {
    /// Create a candidate seen by a single source.
    pub fn new(
        case_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        source: SourceTag,
        score: f64,
    ) -> Self {
        let mut scores = BTreeMap::new();
        scores.insert(source, score);
        let combined_score = combined_score(&scores);
        Self {
            case_id: case_id.into(),
            title: title.into(),
            content: content.into(),
            scores,
            combined_score,
            rerank_score: None,
            rerank_source: None,
            provenance: vec![source],
        }
    }

    /// Record another source's score for this case.
    ///
    /// Display payload is kept from whichever source saw the case first. If
    /// the same source reports the case twice, the higher score wins.
    pub fn record(&mut self, source: SourceTag, score: f64) {
        let entry = self.scores.entry(source).or_insert(score);
        if score > *entry {
            *entry = score;
        }
        if !self.provenance.contains(&source) {
            self.provenance.push(source);
        }
        self.combined_score = combined_score(&self.scores);
    }

    /// Score used for final ordering: rerank score when present.
    pub fn effective_score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.combined_score)
    }

    pub fn score_from(&self, source: SourceTag) -> Option<f64> {
        self.scores.get(&source).copied()
    }
}

/// A search request. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub tenant_id: String,
    #[serde(default)]
    pub filters: CaseFilters,
    pub page: usize,
    pub page_size: usize,
}

impl SearchQuery {
    /// First page of 20 results with no filters.
    pub fn new(text: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tenant_id: tenant_id.into(),
            filters: CaseFilters::default(),
            page: 1,
            page_size: 20,
        }
    }

    pub fn with_filters(mut self, filters: CaseFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub items: Vec<Candidate>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Rerank provider that ordered the full result set.
    pub reranked_by: &'static str,
}
