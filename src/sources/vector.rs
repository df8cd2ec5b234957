//! Milvus vector similarity source, spoken over the Milvus v2 REST API.

use super::{
    quote, scoped_key, CaseIndexer, EmbeddingProvider, RetrievalSource, SourceError, SourceHit,
};
use crate::case_store::CaseRecord;
use crate::search::{SearchQuery, SourceTag};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const MAX_TITLE_CHARS: usize = 500;
const MAX_CONTENT_CHARS: usize = 8000;

#[derive(Debug, Clone)]
pub struct VectorSettings {
    pub enabled: bool,
    pub url: String,
    pub collection: String,
    pub token: Option<String>,
    pub top_k: usize,
    pub timeout: Duration,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:19530".to_string(),
            collection: "cases".to_string(),
            token: None,
            top_k: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Cosine-similarity search over case embeddings.
pub struct VectorSource {
    client: Client,
    settings: VectorSettings,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl VectorSource {
    pub fn new(settings: VectorSettings, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            client: Client::new(),
            settings,
            embeddings,
        }
    }

    async fn call(&self, endpoint: &str, body: &Value) -> Result<MilvusResponse, SourceError> {
        let url = format!(
            "{}/v2/vectordb/entities/{}",
            self.settings.url.trim_end_matches('/'),
            endpoint
        );

        let mut req_builder = self
            .client
            .post(&url)
            .json(body)
            .timeout(self.settings.timeout);
        if let Some(token) = &self.settings.token {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = req_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        // Milvus reports failures with HTTP 200 and a non-zero code.
        let parsed: MilvusResponse = response.json().await?;
        if parsed.code != 0 {
            return Err(SourceError::Api {
                status: parsed.code as u16,
                message: parsed.message.unwrap_or_default(),
            });
        }
        Ok(parsed)
    }
}

/// Boolean filter expression restricting hits to the query's scope.
pub(crate) fn filter_expression(query: &SearchQuery) -> String {
    let mut expr = format!("tenant_id == {}", quote(&query.tenant_id));
    if let Some(case_type) = &query.filters.case_type {
        expr.push_str(&format!(" && case_type == {}", quote(case_type)));
    }
    if let Some(category_id) = &query.filters.category_id {
        expr.push_str(&format!(" && category_id == {}", quote(category_id)));
    }
    expr
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn embedding_text(case: &CaseRecord) -> String {
    format!("{}\n{}", case.title, case.content)
}

#[async_trait]
impl RetrievalSource for VectorSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Vector
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError> {
        let vector = self.embeddings.embed(&query.text).await?;

        let body = json!({
            "collectionName": self.settings.collection,
            "data": [vector],
            "annsField": "embedding",
            "limit": self.settings.top_k,
            "filter": filter_expression(query),
            "outputFields": ["case_id", "title", "content"],
            "searchParams": {"metricType": "COSINE"}
        });

        let response = self.call("search", &body).await?;
        let hits: Vec<SourceHit> = response
            .data
            .into_iter()
            .filter_map(|row| serde_json::from_value::<MilvusHit>(row).ok())
            .map(|hit| SourceHit {
                case_id: hit.case_id,
                title: hit.title,
                content: hit.content,
                // COSINE distance in Milvus is already a similarity in [-1, 1].
                score: hit.distance.max(0.0),
            })
            .collect();

        debug!(count = hits.len(), "Milvus returned hits");
        Ok(hits)
    }
}

#[async_trait]
impl CaseIndexer for VectorSource {
    fn name(&self) -> &str {
        "milvus"
    }

    async fn index_case(&self, case: &CaseRecord) -> Result<(), SourceError> {
        let vector = self.embeddings.embed(&embedding_text(case)).await?;
        let body = json!({
            "collectionName": self.settings.collection,
            "data": [{
                "id": scoped_key(&case.tenant_id, &case.id),
                "case_id": case.id,
                "tenant_id": case.tenant_id,
                "title": truncate_chars(&case.title, MAX_TITLE_CHARS),
                "content": truncate_chars(&case.content, MAX_CONTENT_CHARS),
                "case_type": case.case_type,
                "category_id": case.category_id.clone().unwrap_or_default(),
                "embedding": vector,
            }]
        });
        self.call("upsert", &body).await?;
        Ok(())
    }

    async fn remove_case(&self, tenant_id: &str, case_id: &str) -> Result<(), SourceError> {
        let body = json!({
            "collectionName": self.settings.collection,
            "filter": format!("id == {}", quote(&scoped_key(tenant_id, case_id))),
        });
        self.call("delete", &body).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MilvusResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MilvusHit {
    case_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    distance: f64,
}
