//! Local cross-encoder reranking.
//!
//! Model inference is CPU-bound and runs on the blocking pool. Raw logits are
//! squashed through a sigmoid so scores land in [0, 1].

use super::{apply_scores, document_text, RerankError, RerankProvider};
use crate::search::models::Candidate;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A query/document pair scorer.
pub trait CrossEncoderModel: Send + Sync {
    /// One raw relevance logit per document, in input order.
    fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>>;
}

pub struct CrossEncoderReranker {
    model: Option<Arc<dyn CrossEncoderModel>>,
}

impl CrossEncoderReranker {
    pub fn new(model: Arc<dyn CrossEncoderModel>) -> Self {
        Self { model: Some(model) }
    }

    /// A reranker whose model could not be loaded; always skipped.
    pub fn unavailable() -> Self {
        Self { model: None }
    }
}

fn sigmoid(x: f32) -> f64 {
    1.0 / (1.0 + (-(x as f64)).exp())
}

#[async_trait]
impl RerankProvider for CrossEncoderReranker {
    fn name(&self) -> &'static str {
        "cross_encoder"
    }

    fn is_available(&self) -> bool {
        self.model.is_some()
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<Candidate>, RerankError> {
        let Some(model) = self.model.clone() else {
            return Ok(Vec::new());
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<String> = candidates.iter().map(document_text).collect();
        let query_owned = query.to_string();
        let logits = tokio::task::spawn_blocking(move || model.score(&query_owned, &documents))
            .await
            .map_err(|e| RerankError::Model(format!("Scoring task failed: {}", e)))?
            .map_err(|e| RerankError::Model(e.to_string()))?;

        if logits.len() != candidates.len() {
            return Err(RerankError::InvalidResponse(format!(
                "Expected {} scores, got {}",
                candidates.len(),
                logits.len()
            )));
        }

        debug!(count = logits.len(), "Cross-encoder scored candidates");
        Ok(apply_scores(
            candidates,
            logits.into_iter().map(sigmoid).enumerate(),
            self.name(),
            top_k,
        ))
    }
}

#[cfg(feature = "local-rerank")]
mod fastembed_model {
    use super::CrossEncoderModel;
    use anyhow::{anyhow, bail, Result};
    use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
    use std::sync::Mutex;

    /// Cross-encoder backed by a fastembed ONNX reranker.
    pub struct FastEmbedCrossEncoder {
        model: Mutex<TextRerank>,
    }

    impl FastEmbedCrossEncoder {
        /// Load (downloading on first use) one of the supported BGE rerankers.
        pub fn load(model_name: &str) -> Result<Self> {
            let model = match model_name {
                "bge-reranker-base" => RerankerModel::BGERerankerBase,
                "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
                other => bail!("Unsupported local rerank model: {}", other),
            };
            let model = TextRerank::try_new(RerankInitOptions::new(model))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl CrossEncoderModel for FastEmbedCrossEncoder {
        fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow!("Rerank model lock poisoned"))?;
            let results = model.rerank(query.to_string(), documents.to_vec(), false, None)?;

            let mut scores = vec![0.0_f32; documents.len()];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.score;
                }
            }
            Ok(scores)
        }
    }
}

#[cfg(feature = "local-rerank")]
pub use fastembed_model::FastEmbedCrossEncoder;
