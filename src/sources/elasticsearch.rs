//! Elasticsearch full-text source.

use super::{normalize_scores, scoped_key, CaseIndexer, SourceError, SourceHit, RetrievalSource};
use crate::case_store::{CaseRecord, CaseStatus};
use crate::search::{SearchQuery, SourceTag};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ElasticsearchSettings {
    pub enabled: bool,
    pub url: String,
    pub index: String,
    pub top_k: usize,
    pub timeout: Duration,
}

impl Default for ElasticsearchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:9200".to_string(),
            index: "cases".to_string(),
            top_k: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Full-text search over an Elasticsearch index of published cases.
pub struct ElasticsearchSource {
    client: Client,
    settings: ElasticsearchSettings,
}

impl ElasticsearchSource {
    pub fn new(settings: ElasticsearchSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    fn index_url(&self) -> String {
        format!(
            "{}/{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.index
        )
    }
}

/// Build the bool query: tenant + published are hard constraints, title
/// matches count double.
pub(crate) fn build_search_body(query: &SearchQuery, top_k: usize) -> Value {
    let mut must = vec![
        json!({"term": {"tenant_id": query.tenant_id}}),
        json!({"term": {"status": CaseStatus::Published.as_str()}}),
    ];
    if let Some(case_type) = &query.filters.case_type {
        must.push(json!({"term": {"case_type": case_type}}));
    }
    if let Some(category_id) = &query.filters.category_id {
        must.push(json!({"term": {"category_id": category_id}}));
    }
    if !query.filters.tags.is_empty() {
        must.push(json!({"terms": {"tags": query.filters.tags}}));
    }

    let text = query.text.trim();
    json!({
        "query": {
            "bool": {
                "must": must,
                "should": [
                    {"match": {"title": {"query": text, "boost": 2.0}}},
                    {"match": {"content": {"query": text, "boost": 1.0}}}
                ],
                "minimum_should_match": if text.is_empty() { 0 } else { 1 }
            }
        },
        "size": top_k,
        "_source": ["case_id", "tenant_id", "title", "content"]
    })
}

fn parse_hits(response: EsSearchResponse) -> Vec<SourceHit> {
    response
        .hits
        .hits
        .into_iter()
        .map(|hit| SourceHit {
            case_id: hit.source.case_id,
            title: hit.source.title,
            content: hit.source.content,
            score: hit.score.unwrap_or(0.0),
        })
        .collect()
}

#[async_trait]
impl RetrievalSource for ElasticsearchSource {
    fn tag(&self) -> SourceTag {
        SourceTag::FullText
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError> {
        let url = format!("{}/_search", self.index_url());
        let body = build_search_body(query, self.settings.top_k);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.settings.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EsSearchResponse = response.json().await?;
        let mut hits = parse_hits(parsed);
        normalize_scores(&mut hits);

        debug!(count = hits.len(), "Elasticsearch returned hits");
        Ok(hits)
    }
}

#[async_trait]
impl CaseIndexer for ElasticsearchSource {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn index_case(&self, case: &CaseRecord) -> Result<(), SourceError> {
        let url = format!(
            "{}/_doc/{}",
            self.index_url(),
            scoped_key(&case.tenant_id, &case.id)
        );
        let doc = json!({
            "case_id": case.id,
            "tenant_id": case.tenant_id,
            "title": case.title,
            "content": case.content,
            "case_type": case.case_type,
            "category_id": case.category_id,
            "tags": case.tags,
            "status": case.status.as_str(),
        });

        let response = self
            .client
            .put(&url)
            .json(&doc)
            .timeout(self.settings.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn remove_case(&self, tenant_id: &str, case_id: &str) -> Result<(), SourceError> {
        let url = format!("{}/_doc/{}", self.index_url(), scoped_key(tenant_id, case_id));
        let response = self
            .client
            .delete(&url)
            .timeout(self.settings.timeout)
            .send()
            .await?;

        // Deleting something that is already gone is fine.
        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

// Elasticsearch API types

#[derive(Debug, Deserialize)]
struct EsSearchResponse {
    hits: EsHits,
}

#[derive(Debug, Deserialize)]
struct EsHits {
    hits: Vec<EsHit>,
}

#[derive(Debug, Deserialize)]
struct EsHit {
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: EsCaseDoc,
}

#[derive(Debug, Deserialize)]
struct EsCaseDoc {
    case_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}
