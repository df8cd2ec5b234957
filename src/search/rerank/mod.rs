//! Ordered fallback chain of rerank providers.
//!
//! Providers are tried one at a time in priority order. The first one that
//! returns a non-empty list wins; errors and empty lists fall through. The
//! lexical scorer at the end of the chain always answers for non-empty input.

mod cross_encoder;
mod dashscope;
mod lexical;

pub use cross_encoder::{CrossEncoderModel, CrossEncoderReranker};
#[cfg(feature = "local-rerank")]
pub use cross_encoder::FastEmbedCrossEncoder;
pub use dashscope::{DashScopeReranker, DashScopeSettings};
pub use lexical::LexicalReranker;

use super::models::Candidate;
use crate::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest content prefix sent to model-based rerankers.
const MAX_DOC_CONTENT_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Model error: {0}")]
    Model(String),
}

impl From<reqwest::Error> for RerankError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RerankError::Timeout
        } else if e.is_decode() {
            RerankError::InvalidResponse(e.to_string())
        } else {
            RerankError::Connection(e.to_string())
        }
    }
}

/// One scoring strategy in the chain.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Stable identifier written to `Candidate::rerank_source`.
    fn name(&self) -> &'static str;

    /// Unavailable providers are skipped without being called.
    fn is_available(&self) -> bool {
        true
    }

    /// Score and reorder `candidates`, returning at most `top_k`.
    ///
    /// An empty result means "skip to the next provider".
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<Candidate>, RerankError>;
}

/// Reranked candidates and the provider that ordered them.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<Candidate>,
    /// `"none"` only when the input was empty.
    pub provider: &'static str,
}

pub struct RerankChain {
    providers: Vec<Arc<dyn RerankProvider>>,
    terminal: LexicalReranker,
}

impl RerankChain {
    /// Build a chain trying `providers` in order before the lexical scorer.
    pub fn new(providers: Vec<Arc<dyn RerankProvider>>) -> Self {
        Self {
            providers,
            terminal: LexicalReranker,
        }
    }

    /// A chain with only the lexical scorer.
    pub fn lexical_only() -> Self {
        Self::new(Vec::new())
    }

    pub async fn rerank(&self, query: &str, candidates: &[Candidate], top_k: usize) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome {
                candidates: Vec::new(),
                provider: "none",
            };
        }
        let top_k = top_k.max(1);

        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }
            match provider.rerank(query, candidates, top_k).await {
                Ok(reranked) if !reranked.is_empty() => {
                    metrics::record_rerank(provider.name(), "ok");
                    debug!(provider = provider.name(), count = reranked.len(), "Reranked");
                    return RerankOutcome {
                        candidates: reranked,
                        provider: provider.name(),
                    };
                }
                Ok(_) => {
                    metrics::record_rerank(provider.name(), "empty");
                    info!(provider = provider.name(), "Rerank provider returned nothing, falling through");
                }
                Err(e) => {
                    metrics::record_rerank(provider.name(), "error");
                    warn!(provider = provider.name(), error = %e, "Rerank provider failed, falling through");
                }
            }
        }

        metrics::record_rerank(self.terminal.name(), "ok");
        RerankOutcome {
            candidates: self.terminal.rank(query, candidates, top_k),
            provider: self.terminal.name(),
        }
    }
}

/// Text sent to model-based rerankers: title plus a bounded content prefix.
pub(crate) fn document_text(candidate: &Candidate) -> String {
    let content: String = candidate.content.chars().take(MAX_DOC_CONTENT_CHARS).collect();
    match (candidate.title.is_empty(), content.is_empty()) {
        (false, false) => format!("{}\n{}", candidate.title, content),
        (true, _) => content,
        (false, true) => candidate.title.clone(),
    }
}

/// Attach provider scores to candidates by input index, sorted descending.
///
/// Out-of-range indices are ignored.
pub(crate) fn apply_scores(
    candidates: &[Candidate],
    scored: impl IntoIterator<Item = (usize, f64)>,
    provider: &'static str,
    top_k: usize,
) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = scored
        .into_iter()
        .filter_map(|(index, score)| {
            candidates.get(index).map(|c| {
                let mut c = c.clone();
                c.rerank_score = Some(score);
                c.rerank_source = Some(provider.to_string());
                c
            })
        })
        .collect();
    out.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
    out.truncate(top_k);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SourceTag;
    use crate::test_support::{ScriptedRerank, ScriptedReranker};

    fn provider(reranker: &Arc<ScriptedReranker>) -> Arc<dyn RerankProvider> {
        reranker.clone()
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("1", "Other Topic", "nothing here", SourceTag::Vector, 0.5),
            Candidate::new("2", "Billing Issue", "refund steps", SourceTag::Vector, 0.4),
        ]
    }

    #[tokio::test]
    async fn test_empty_input_reports_none() {
        let chain = RerankChain::lexical_only();
        let outcome = chain.rerank("billing", &[], 10).await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.provider, "none");
    }

    #[tokio::test]
    async fn test_lexical_terminal_when_others_disabled() {
        let remote = Arc::new(ScriptedReranker::new("remote", ScriptedRerank::Reverse).unavailable());
        let chain = RerankChain::new(vec![provider(&remote)]);

        let outcome = chain.rerank("billing issue", &candidates(), 10).await;
        assert_eq!(outcome.provider, "lexical");
        assert_eq!(outcome.candidates[0].title, "Billing Issue");
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_non_empty_provider_wins() {
        let failing = Arc::new(ScriptedReranker::new("remote", ScriptedRerank::Fail));
        let empty = Arc::new(ScriptedReranker::new("local", ScriptedRerank::Empty));
        let reverse = Arc::new(ScriptedReranker::new("third", ScriptedRerank::Reverse));
        let never = Arc::new(ScriptedReranker::new("fourth", ScriptedRerank::Reverse));
        let chain = RerankChain::new(vec![
            provider(&failing),
            provider(&empty),
            provider(&reverse),
            provider(&never),
        ]);

        let outcome = chain.rerank("q", &candidates(), 10).await;
        assert_eq!(outcome.provider, "third");
        assert_eq!(outcome.candidates[0].case_id, "2");
        assert_eq!(failing.calls(), 1);
        assert_eq!(empty.calls(), 1);
        assert_eq!(reverse.calls(), 1);
        assert_eq!(never.calls(), 0);
    }

    #[tokio::test]
    async fn test_chain_never_empty_for_non_empty_input() {
        let chain = RerankChain::new(vec![
            provider(&Arc::new(ScriptedReranker::new("a", ScriptedRerank::Fail))),
            provider(&Arc::new(ScriptedReranker::new("b", ScriptedRerank::Empty))),
        ]);
        for query in ["", "   ", "zzz", "billing"] {
            let outcome = chain.rerank(query, &candidates(), 0).await;
            assert!(!outcome.candidates.is_empty());
            assert_eq!(outcome.provider, "lexical");
        }
    }

    #[test]
    fn test_document_text() {
        let mut c = Candidate::new("1", "Title", "x".repeat(600), SourceTag::FullText, 0.0);
        assert_eq!(document_text(&c).len(), "Title\n".len() + 500);
        c.content.clear();
        assert_eq!(document_text(&c), "Title");
        c.title.clear();
        c.content = "body".to_string();
        assert_eq!(document_text(&c), "body");
    }

    #[test]
    fn test_apply_scores_ignores_bad_indices() {
        let out = apply_scores(&candidates(), vec![(1, 0.9), (7, 1.0), (0, 0.2)], "remote", 10);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].case_id, "2");
        assert_eq!(out[0].rerank_source.as_deref(), Some("remote"));
    }
}
