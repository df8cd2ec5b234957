//! Neo4j relationship source, spoken over the transactional HTTP endpoint.
//!
//! Cases are nodes linked to `Tag` and `Category` nodes. A query matches cases
//! sharing tags with the query keywords, plus cases in the filtered category.

use super::{normalize_scores, CaseIndexer, RetrievalSource, SourceError, SourceHit};
use crate::case_store::CaseRecord;
use crate::search::{SearchQuery, SourceTag};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const TAG_SEARCH: &str = "\
MATCH (c:Case)-[:HAS_TAG]->(t:Tag)
WHERE t.name IN $tags AND c.tenant_id = $tenant_id
  AND ($case_type IS NULL OR c.case_type = $case_type)
  AND all(req IN $required_tags WHERE (c)-[:HAS_TAG]->(:Tag {name: req}))
WITH c, COUNT(t) AS tag_count
ORDER BY tag_count DESC
LIMIT $top_k
RETURN c.case_id, c.title, c.content, tag_count";

const CATEGORY_SEARCH: &str = "\
MATCH (c:Case)-[:BELONGS_TO]->(:Category {id: $category_id})
WHERE c.tenant_id = $tenant_id
  AND ($case_type IS NULL OR c.case_type = $case_type)
  AND all(req IN $required_tags WHERE (c)-[:HAS_TAG]->(:Tag {name: req}))
RETURN c.case_id, c.title, c.content, 1.0
LIMIT $top_k";

const RELATED_SEARCH: &str = "\
MATCH (c:Case {case_id: $case_id, tenant_id: $tenant_id})-[:HAS_TAG|BELONGS_TO]->(n)
MATCH (related:Case)-[:HAS_TAG|BELONGS_TO]->(n)
WHERE related.case_id <> $case_id AND related.tenant_id = $tenant_id
WITH related, COUNT(n) AS strength
ORDER BY strength DESC
LIMIT $top_k
RETURN related.case_id, related.title, related.content, strength";

const UPSERT_CASE: &str = "\
MERGE (c:Case {case_id: $case_id, tenant_id: $tenant_id})
SET c.title = $title, c.content = $content, c.case_type = $case_type, c.category_id = $category_id
WITH c
OPTIONAL MATCH (c)-[r:HAS_TAG|BELONGS_TO]->()
DELETE r";

const LINK_CATEGORY: &str = "\
MATCH (c:Case {case_id: $case_id, tenant_id: $tenant_id})
MERGE (cat:Category {id: $category_id})
MERGE (c)-[:BELONGS_TO]->(cat)";

const LINK_TAGS: &str = "\
MATCH (c:Case {case_id: $case_id, tenant_id: $tenant_id})
UNWIND $tags AS tag
MERGE (t:Tag {name: tag})
MERGE (c)-[:HAS_TAG]->(t)";

const DELETE_CASE: &str = "\
MATCH (c:Case {case_id: $case_id, tenant_id: $tenant_id})
DETACH DELETE c";

#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub enabled: bool,
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub top_k: usize,
    pub timeout: Duration,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            user: "neo4j".to_string(),
            password: None,
            top_k: 20,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A case linked to another through shared tags or category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedCase {
    pub case_id: String,
    pub title: String,
    /// Number of shared tag/category nodes.
    pub strength: f64,
}

pub struct GraphSource {
    client: Client,
    settings: GraphSettings,
}

impl GraphSource {
    pub fn new(settings: GraphSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    async fn run(&self, statements: Vec<Value>) -> Result<Vec<CypherResult>, SourceError> {
        let url = format!(
            "{}/db/{}/tx/commit",
            self.settings.url.trim_end_matches('/'),
            self.settings.database
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.settings.user, self.settings.password.as_ref())
            .json(&json!({ "statements": statements }))
            .timeout(self.settings.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: CypherResponse = response.json().await?;
        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(SourceError::InvalidResponse(format!(
                "{}: {}",
                err.code, err.message
            )));
        }
        Ok(parsed.results)
    }

    /// Cases sharing any of `tags`, scored by the number of shared tags.
    pub async fn search_by_tags(
        &self,
        tags: &[String],
        query: &SearchQuery,
    ) -> Result<Vec<SourceHit>, SourceError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let statement = json!({
            "statement": TAG_SEARCH,
            "parameters": {
                "tags": tags,
                "tenant_id": query.tenant_id,
                "case_type": query.filters.case_type,
                "required_tags": query.filters.tags,
                "top_k": self.settings.top_k,
            }
        });
        let results = self.run(vec![statement]).await?;
        Ok(rows_to_hits(results))
    }

    /// Cases in `category_id`, each scored 1.0.
    pub async fn search_by_category(
        &self,
        category_id: &str,
        query: &SearchQuery,
    ) -> Result<Vec<SourceHit>, SourceError> {
        let statement = json!({
            "statement": CATEGORY_SEARCH,
            "parameters": {
                "category_id": category_id,
                "tenant_id": query.tenant_id,
                "case_type": query.filters.case_type,
                "required_tags": query.filters.tags,
                "top_k": self.settings.top_k,
            }
        });
        let results = self.run(vec![statement]).await?;
        Ok(rows_to_hits(results))
    }

    /// Cases sharing tag or category nodes with `case_id`, strongest first.
    pub async fn search_related(
        &self,
        tenant_id: &str,
        case_id: &str,
        top_k: usize,
    ) -> Result<Vec<RelatedCase>, SourceError> {
        let statement = json!({
            "statement": RELATED_SEARCH,
            "parameters": {
                "case_id": case_id,
                "tenant_id": tenant_id,
                "top_k": top_k,
            }
        });
        let results = self.run(vec![statement]).await?;
        Ok(rows_to_hits(results)
            .into_iter()
            .map(|hit| RelatedCase {
                case_id: hit.case_id,
                title: hit.title,
                strength: hit.score,
            })
            .collect())
    }
}

/// Keywords matched against tag names: the query words plus any tag filters.
pub(crate) fn query_keywords(query: &SearchQuery) -> Vec<String> {
    let mut keywords: Vec<String> = query
        .text
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();
    for tag in &query.filters.tags {
        if !keywords.contains(tag) {
            keywords.push(tag.clone());
        }
    }
    keywords
}

/// Merge hit lists keeping the best score per case, in first-seen order.
fn merge_hits(lists: Vec<Vec<SourceHit>>) -> Vec<SourceHit> {
    let mut merged: Vec<SourceHit> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for hit in lists.into_iter().flatten() {
        match index.get(&hit.case_id) {
            Some(&i) => {
                if hit.score > merged[i].score {
                    merged[i].score = hit.score;
                }
            }
            None => {
                index.insert(hit.case_id.clone(), merged.len());
                merged.push(hit);
            }
        }
    }
    merged
}

fn rows_to_hits(results: Vec<CypherResult>) -> Vec<SourceHit> {
    results
        .into_iter()
        .flat_map(|r| r.data)
        .filter_map(|d| row_to_hit(&d.row))
        .collect()
}

fn row_to_hit(row: &[Value]) -> Option<SourceHit> {
    let case_id = row.first()?.as_str()?.to_string();
    let title = row.get(1).and_then(|v| v.as_str()).unwrap_or_default();
    let content = row.get(2).and_then(|v| v.as_str()).unwrap_or_default();
    let score = row.get(3).and_then(|v| v.as_f64()).unwrap_or(0.0);
    Some(SourceHit::new(case_id, title, content, score))
}

#[async_trait]
impl RetrievalSource for GraphSource {
    fn tag(&self) -> SourceTag {
        SourceTag::Graph
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError> {
        let keywords = query_keywords(query);
        let mut lists = vec![self.search_by_tags(&keywords, query).await?];
        if let Some(category_id) = &query.filters.category_id {
            lists.push(self.search_by_category(category_id, query).await?);
        }

        let mut hits = merge_hits(lists);
        normalize_scores(&mut hits);
        debug!(count = hits.len(), "Neo4j returned hits");
        Ok(hits)
    }
}

#[async_trait]
impl CaseIndexer for GraphSource {
    fn name(&self) -> &str {
        "neo4j"
    }

    async fn index_case(&self, case: &CaseRecord) -> Result<(), SourceError> {
        let key = json!({"case_id": case.id, "tenant_id": case.tenant_id});
        let mut statements = vec![json!({
            "statement": UPSERT_CASE,
            "parameters": {
                "case_id": case.id,
                "tenant_id": case.tenant_id,
                "title": case.title,
                "content": case.content,
                "case_type": case.case_type,
                "category_id": case.category_id.clone().unwrap_or_default(),
            }
        })];

        if let Some(category_id) = &case.category_id {
            let mut params = key.clone();
            params["category_id"] = json!(category_id);
            statements.push(json!({"statement": LINK_CATEGORY, "parameters": params}));
        }
        if !case.tags.is_empty() {
            let mut params = key;
            params["tags"] = json!(case.tags);
            statements.push(json!({"statement": LINK_TAGS, "parameters": params}));
        }

        self.run(statements).await?;
        Ok(())
    }

    async fn remove_case(&self, tenant_id: &str, case_id: &str) -> Result<(), SourceError> {
        let statement = json!({
            "statement": DELETE_CASE,
            "parameters": {"case_id": case_id, "tenant_id": tenant_id}
        });
        self.run(vec![statement]).await?;
        Ok(())
    }
}

// Neo4j HTTP API types

#[derive(Debug, Deserialize)]
struct CypherResponse {
    #[serde(default)]
    results: Vec<CypherResult>,
    #[serde(default)]
    errors: Vec<CypherError>,
}

#[derive(Debug, Deserialize)]
struct CypherResult {
    #[serde(default)]
    data: Vec<CypherRow>,
}

#[derive(Debug, Deserialize)]
struct CypherRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CypherError {
    code: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case_store::CaseFilters;

    #[test]
    fn test_query_keywords_include_tag_filters() {
        let query = SearchQuery::new("vpn timeout", "t1").with_filters(CaseFilters {
            tags: vec!["network".to_string(), "vpn".to_string()],
            ..Default::default()
        });
        assert_eq!(query_keywords(&query), vec!["vpn", "timeout", "network"]);
    }

    #[test]
    fn test_rows_to_hits() {
        let json = r#"{
            "results": [{"columns": ["c.case_id","c.title","c.content","tag_count"],
                         "data": [{"row": ["a", "A", null, 3]}, {"row": [null, "x", "y", 1]}]}],
            "errors": []
        }"#;
        let parsed: CypherResponse = serde_json::from_str(json).unwrap();
        let hits = rows_to_hits(parsed.results);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].case_id, "a");
        assert_eq!(hits[0].content, "");
        assert_eq!(hits[0].score, 3.0);
    }

    #[test]
    fn test_merge_hits_keeps_best() {
        let merged = merge_hits(vec![
            vec![SourceHit::new("a", "A", "", 2.0)],
            vec![
                SourceHit::new("b", "B", "", 1.0),
                SourceHit::new("a", "A", "", 1.0),
            ],
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].score, 2.0);
        assert_eq!(merged[1].case_id, "b");
    }
}
