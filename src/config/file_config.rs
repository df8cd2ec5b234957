use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,

    // Collaborators
    pub llm: Option<LlmConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub elasticsearch: Option<ElasticsearchConfig>,
    pub vector: Option<VectorConfig>,
    pub graph: Option<GraphConfig>,

    // Engine tuning
    pub fusion: Option<FusionConfig>,
    pub rerank: Option<RerankConfig>,
    pub search: Option<SearchConfig>,
    pub workflow: Option<WorkflowConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Shell command printing the API key (for rotating tokens)
    pub api_key_command: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub index: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct VectorConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub collection: Option<String>,
    pub token: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FusionConfig {
    /// Per-source wait before a source counts as failed
    pub source_timeout_ms: Option<u64>,
    pub fallback_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RerankConfig {
    pub remote_enabled: Option<bool>,
    pub remote_api_key: Option<String>,
    /// "gte-rerank-v2", "qwen3-rerank", ...
    pub remote_model: Option<String>,
    pub remote_timeout_secs: Option<u64>,
    pub remote_endpoint: Option<String>,
    pub local_enabled: Option<bool>,
    /// "bge-reranker-base" or "bge-reranker-v2-m3"
    pub local_model: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub candidate_cap: Option<usize>,
    pub max_page_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_cycles: Option<u32>,
    pub confidence_threshold: Option<f64>,
    pub retrieval_page_size: Option<usize>,
    pub chunk_size: Option<usize>,
    /// "passthrough" or "llm"
    pub rewriter: Option<String>,
    /// "heuristic" or "llm"
    pub evaluator: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
