//! DashScope hosted rerank API.
//!
//! Two request shapes exist: `qwen3-rerank` is served on the
//! OpenAI-compatible endpoint, every other model on the native text-rerank
//! service.

use super::{apply_scores, document_text, RerankError, RerankProvider};
use crate::search::models::Candidate;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const COMPATIBLE_URL: &str = "https://dashscope.aliyuncs.com/compatible-api/v1/reranks";
const TEXT_RERANK_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/rerank/text-rerank/text-rerank";
const COMPATIBLE_MODEL: &str = "qwen3-rerank";
const INSTRUCT: &str =
    "Given a web search query, retrieve relevant passages that answer the query.";

#[derive(Debug, Clone)]
pub struct DashScopeSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    /// Overrides the model-derived endpoint. Used to point at a proxy.
    pub endpoint: Option<String>,
}

impl Default for DashScopeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: "gte-rerank-v2".to_string(),
            timeout: Duration::from_secs(30),
            endpoint: None,
        }
    }
}

pub struct DashScopeReranker {
    client: Client,
    settings: DashScopeSettings,
}

impl DashScopeReranker {
    pub fn new(settings: DashScopeSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    fn url(&self) -> &str {
        match &self.settings.endpoint {
            Some(endpoint) => endpoint.as_str(),
            None if self.settings.model == COMPATIBLE_MODEL => COMPATIBLE_URL,
            None => TEXT_RERANK_URL,
        }
    }
}

pub(crate) fn build_payload(model: &str, query: &str, documents: &[String], top_n: usize) -> Value {
    if model == COMPATIBLE_MODEL {
        json!({
            "model": model,
            "query": query,
            "documents": documents,
            "top_n": top_n,
            "instruct": INSTRUCT,
        })
    } else {
        json!({
            "model": model,
            "input": {
                "query": query,
                "documents": documents,
            },
            "parameters": {
                "return_documents": false,
                "top_n": top_n,
            }
        })
    }
}

#[async_trait]
impl RerankProvider for DashScopeReranker {
    fn name(&self) -> &'static str {
        "dashscope"
    }

    fn is_available(&self) -> bool {
        self.settings.enabled && self.settings.api_key.is_some()
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<Candidate>, RerankError> {
        let Some(api_key) = &self.settings.api_key else {
            return Ok(Vec::new());
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<String> = candidates.iter().map(document_text).collect();
        let top_n = top_k.min(documents.len());
        let payload = build_payload(&self.settings.model, query, &documents, top_n);

        let response = self
            .client
            .post(self.url())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&payload)
            .timeout(self.settings.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RerankError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: DashScopeResponse = response.json().await?;
        let results = parsed.into_results();
        debug!(
            model = %self.settings.model,
            documents = documents.len(),
            returned = results.len(),
            "DashScope rerank finished"
        );

        Ok(apply_scores(
            candidates,
            results.into_iter().map(|r| (r.index, r.relevance_score)),
            self.name(),
            top_k,
        ))
    }
}

/// Native responses nest results under `output`, compatible ones do not.
#[derive(Debug, Deserialize)]
struct DashScopeResponse {
    #[serde(default)]
    output: Option<DashScopeOutput>,
    #[serde(default)]
    results: Option<Vec<DashScopeResult>>,
}

impl DashScopeResponse {
    fn into_results(self) -> Vec<DashScopeResult> {
        self.output
            .map(|o| o.results)
            .or(self.results)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct DashScopeOutput {
    #[serde(default)]
    results: Vec<DashScopeResult>,
}

#[derive(Debug, Deserialize)]
struct DashScopeResult {
    index: usize,
    relevance_score: f64,
}
