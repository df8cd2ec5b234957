mod file_config;

pub use file_config::{
    ElasticsearchConfig, EmbeddingConfig, FileConfig, FusionConfig, GraphConfig, LlmConfig,
    RerankConfig, SearchConfig, VectorConfig, WorkflowConfig,
};

use crate::agent::llm::{ApiKeySource, CompletionOptions};
use crate::agent::{StreamSettings, WorkflowSettings};
use crate::search::rerank::DashScopeSettings;
use crate::search::{FusionSettings, SearchSettings, RESULT_WINDOW};
use crate::server::RequestsLoggingLevel;
use crate::sources::{ElasticsearchSettings, GraphSettings, VectorSettings};
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Collaborators
    pub llm: LlmSettings,
    pub embedding: Option<EmbeddingSettings>,
    pub elasticsearch: ElasticsearchSettings,
    pub vector: VectorSettings,
    pub graph: GraphSettings,

    // Engine tuning
    pub fusion: FusionSettings,
    pub rerank: RerankSettings,
    pub search: SearchSettings,
    pub workflow: WorkflowSettings,
    pub stream: StreamSettings,
    pub rewriter: RewriterKind,
    pub evaluator: EvaluatorKind,
}

/// Settings for the text generation service.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_command: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl LlmSettings {
    /// The key command wins over a static key.
    pub fn api_key_source(&self) -> ApiKeySource {
        match (&self.api_key_command, &self.api_key) {
            (Some(cmd), _) => ApiKeySource::Command(cmd.clone()),
            (None, Some(key)) => ApiKeySource::Static(key.clone()),
            (None, None) => ApiKeySource::None,
        }
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RerankSettings {
    pub remote: DashScopeSettings,
    pub local_enabled: bool,
    pub local_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RewriterKind {
    #[default]
    Passthrough,
    Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EvaluatorKind {
    #[default]
    Heuristic,
    Llm,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| anyhow!("db_path must be specified via --db-path or in config file"))?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let port = file.port.unwrap_or(cli.port);
        let logging_level = match file.logging_level {
            Some(s) => parse_logging_level(&s)
                .ok_or_else(|| anyhow!("Invalid logging_level: {}", s))?,
            None => cli.logging_level.clone(),
        };

        // LLM is the one mandatory collaborator
        let llm_file = file.llm.unwrap_or_default();
        let llm_defaults = CompletionOptions::default();
        let llm = LlmSettings {
            base_url: llm_file
                .base_url
                .or_else(|| cli.llm_base_url.clone())
                .ok_or_else(|| anyhow!("llm.base_url must be specified"))?,
            model: llm_file
                .model
                .or_else(|| cli.llm_model.clone())
                .ok_or_else(|| anyhow!("llm.model must be specified"))?,
            api_key: llm_file.api_key,
            api_key_command: llm_file.api_key_command,
            temperature: llm_file.temperature.unwrap_or(llm_defaults.temperature),
            max_tokens: llm_file
                .max_tokens
                .or(llm_defaults.max_tokens)
                .unwrap_or(1000),
            timeout_secs: llm_file
                .timeout_secs
                .unwrap_or(llm_defaults.timeout.as_secs()),
        };

        let embedding = match file.embedding {
            Some(emb) => Some(EmbeddingSettings {
                base_url: emb
                    .base_url
                    .ok_or_else(|| anyhow!("embedding.base_url must be specified"))?,
                model: emb
                    .model
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
                api_key: emb.api_key,
            }),
            None => None,
        };

        let es_file = file.elasticsearch.unwrap_or_default();
        let es_defaults = ElasticsearchSettings::default();
        let elasticsearch = ElasticsearchSettings {
            enabled: es_file.enabled.unwrap_or(false),
            url: require_url("elasticsearch", es_file.enabled, es_file.url)?
                .unwrap_or(es_defaults.url),
            index: es_file.index.unwrap_or(es_defaults.index),
            top_k: es_file.top_k.unwrap_or(es_defaults.top_k),
            timeout: es_defaults.timeout,
        };

        let vector_file = file.vector.unwrap_or_default();
        let vector_defaults = VectorSettings::default();
        let vector = VectorSettings {
            enabled: vector_file.enabled.unwrap_or(false),
            url: require_url("vector", vector_file.enabled, vector_file.url)?
                .unwrap_or(vector_defaults.url),
            collection: vector_file.collection.unwrap_or(vector_defaults.collection),
            token: vector_file.token,
            top_k: vector_file.top_k.unwrap_or(vector_defaults.top_k),
            timeout: vector_defaults.timeout,
        };
        if vector.enabled && embedding.is_none() {
            bail!("vector source is enabled but no [embedding] service is configured");
        }

        let graph_file = file.graph.unwrap_or_default();
        let graph_defaults = GraphSettings::default();
        let graph = GraphSettings {
            enabled: graph_file.enabled.unwrap_or(false),
            url: require_url("graph", graph_file.enabled, graph_file.url)?
                .unwrap_or(graph_defaults.url),
            database: graph_file.database.unwrap_or(graph_defaults.database),
            user: graph_file.user.unwrap_or(graph_defaults.user),
            password: graph_file.password,
            top_k: graph_file.top_k.unwrap_or(graph_defaults.top_k),
            timeout: graph_defaults.timeout,
        };

        let fusion_file = file.fusion.unwrap_or_default();
        let fusion_defaults = FusionSettings::default();
        let fusion = FusionSettings {
            source_timeout: fusion_file
                .source_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(fusion_defaults.source_timeout),
            fallback_limit: fusion_file
                .fallback_limit
                .unwrap_or(fusion_defaults.fallback_limit),
        };

        let rerank_file = file.rerank.unwrap_or_default();
        let remote_defaults = DashScopeSettings::default();
        let rerank = RerankSettings {
            remote: DashScopeSettings {
                enabled: rerank_file.remote_enabled.unwrap_or(false),
                api_key: rerank_file.remote_api_key,
                model: rerank_file.remote_model.unwrap_or(remote_defaults.model),
                timeout: rerank_file
                    .remote_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(remote_defaults.timeout),
                endpoint: rerank_file.remote_endpoint,
            },
            local_enabled: rerank_file.local_enabled.unwrap_or(false),
            local_model: rerank_file
                .local_model
                .unwrap_or_else(|| "bge-reranker-base".to_string()),
        };
        if rerank.remote.enabled && rerank.remote.api_key.is_none() {
            bail!("rerank.remote_enabled requires rerank.remote_api_key");
        }
        if rerank.local_enabled && !cfg!(feature = "local-rerank") {
            bail!("rerank.local_enabled requires building with the local-rerank feature");
        }

        let search_file = file.search.unwrap_or_default();
        let search_defaults = SearchSettings::default();
        let search = SearchSettings {
            candidate_cap: search_file
                .candidate_cap
                .unwrap_or(search_defaults.candidate_cap),
            max_page_size: search_file
                .max_page_size
                .unwrap_or(search_defaults.max_page_size),
        };
        if !(1..=RESULT_WINDOW).contains(&search.candidate_cap) {
            bail!(
                "search.candidate_cap must be between 1 and {}, got {}",
                RESULT_WINDOW,
                search.candidate_cap
            );
        }
        if !(1..=RESULT_WINDOW).contains(&search.max_page_size) {
            bail!(
                "search.max_page_size must be between 1 and {}, got {}",
                RESULT_WINDOW,
                search.max_page_size
            );
        }

        let workflow_file = file.workflow.unwrap_or_default();
        let workflow_defaults = WorkflowSettings::default();
        let workflow = WorkflowSettings {
            max_cycles: workflow_file
                .max_cycles
                .unwrap_or(workflow_defaults.max_cycles),
            confidence_threshold: workflow_file
                .confidence_threshold
                .unwrap_or(workflow_defaults.confidence_threshold),
            retrieval_page_size: workflow_file
                .retrieval_page_size
                .unwrap_or(workflow_defaults.retrieval_page_size),
            relations_per_doc: workflow_defaults.relations_per_doc,
        };
        if !(0.0..=1.0).contains(&workflow.confidence_threshold) {
            bail!(
                "workflow.confidence_threshold must be in [0, 1], got {}",
                workflow.confidence_threshold
            );
        }
        if workflow.retrieval_page_size == 0 || workflow.retrieval_page_size > search.max_page_size
        {
            bail!(
                "workflow.retrieval_page_size must be between 1 and {}",
                search.max_page_size
            );
        }

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            chunk_size: workflow_file
                .chunk_size
                .unwrap_or(stream_defaults.chunk_size)
                .max(1),
            channel_capacity: stream_defaults.channel_capacity,
        };

        let rewriter = match workflow_file.rewriter {
            Some(s) => RewriterKind::from_str(&s, true)
                .map_err(|_| anyhow!("Invalid workflow.rewriter: {}", s))?,
            None => RewriterKind::default(),
        };
        let evaluator = match workflow_file.evaluator {
            Some(s) => EvaluatorKind::from_str(&s, true)
                .map_err(|_| anyhow!("Invalid workflow.evaluator: {}", s))?,
            None => EvaluatorKind::default(),
        };

        Ok(Self {
            db_path,
            port,
            logging_level,
            llm,
            embedding,
            elasticsearch,
            vector,
            graph,
            fusion,
            rerank,
            search,
            workflow,
            stream,
            rewriter,
            evaluator,
        })
    }
}

/// An enabled source must name its URL explicitly.
fn require_url(section: &str, enabled: Option<bool>, url: Option<String>) -> Result<Option<String>> {
    if enabled.unwrap_or(false) && url.is_none() {
        bail!("{} is enabled but {}.url is not set", section, section);
    }
    Ok(url)
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with_llm(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_path: Some(dir.path().join("cases.db")),
            port: 3100,
            logging_level: RequestsLoggingLevel::Path,
            llm_base_url: Some("http://localhost:8000/v1".to_string()),
            llm_model: Some("qwen-plus".to_string()),
        }
    }

    fn parse(toml_str: &str) -> FileConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("HEADERS"),
            Some(RequestsLoggingLevel::Headers)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_llm(&temp_dir), None).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("cases.db"));
        assert_eq!(config.port, 3100);
        assert_eq!(config.llm.model, "qwen-plus");
        assert_eq!(config.llm.temperature, 0.7);
        assert_eq!(config.llm.max_tokens, 1000);
        assert!(matches!(config.llm.api_key_source(), ApiKeySource::None));
        assert!(config.embedding.is_none());
        assert!(!config.elasticsearch.enabled);
        assert_eq!(config.fusion.source_timeout, Duration::from_millis(3000));
        assert_eq!(config.search.candidate_cap, 100);
        assert_eq!(config.workflow.max_cycles, 3);
        assert_eq!(config.workflow.confidence_threshold, 0.7);
        assert_eq!(config.stream.chunk_size, 20);
        assert_eq!(config.rewriter, RewriterKind::Passthrough);
        assert_eq!(config.evaluator, EvaluatorKind::Heuristic);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let file = parse(&format!(
            r#"
            db_path = "{}"
            port = 4000
            logging_level = "none"

            [llm]
            model = "gpt-4o-mini"
            api_key = "static"
            api_key_command = "pass show llm"

            [elasticsearch]
            enabled = true
            url = "http://es:9200"

            [fusion]
            source_timeout_ms = 500

            [workflow]
            max_cycles = 5
            chunk_size = 8
            rewriter = "llm"
            evaluator = "LLM"
            "#,
            temp_dir.path().join("other.db").display()
        ));

        let config = AppConfig::resolve(&cli_with_llm(&temp_dir), Some(file)).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("other.db"));
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::None);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        // CLI value used when TOML doesn't specify
        assert_eq!(config.llm.base_url, "http://localhost:8000/v1");
        assert!(matches!(
            config.llm.api_key_source(),
            ApiKeySource::Command(cmd) if cmd == "pass show llm"
        ));
        assert!(config.elasticsearch.enabled);
        assert_eq!(config.elasticsearch.url, "http://es:9200");
        assert_eq!(config.elasticsearch.index, "cases");
        assert_eq!(config.fusion.source_timeout, Duration::from_millis(500));
        assert_eq!(config.workflow.max_cycles, 5);
        assert_eq!(config.stream.chunk_size, 8);
        assert_eq!(config.rewriter, RewriterKind::Llm);
        assert_eq!(config.evaluator, EvaluatorKind::Llm);
    }

    #[test]
    fn test_missing_mandatory_values() {
        let err = AppConfig::resolve(&CliConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("db_path must be specified"));

        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            llm_model: None,
            ..cli_with_llm(&temp_dir)
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("llm.model"));
    }

    #[test]
    fn test_nonexistent_db_directory_error() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/nonexistent/path/cases.db")),
            llm_base_url: Some("http://llm".to_string()),
            llm_model: Some("m".to_string()),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_inconsistent_sources_are_errors() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_with_llm(&temp_dir);

        let no_url = parse("[graph]\nenabled = true");
        let err = AppConfig::resolve(&cli, Some(no_url)).unwrap_err();
        assert!(err.to_string().contains("graph.url"));

        let no_embedding = parse("[vector]\nenabled = true\nurl = \"http://milvus:19530\"");
        let err = AppConfig::resolve(&cli, Some(no_embedding)).unwrap_err();
        assert!(err.to_string().contains("embedding"));

        let no_key = parse("[rerank]\nremote_enabled = true");
        assert!(AppConfig::resolve(&cli, Some(no_key)).is_err());

        let bad_threshold = parse("[workflow]\nconfidence_threshold = 1.5");
        assert!(AppConfig::resolve(&cli, Some(bad_threshold)).is_err());

        let bad_rewriter = parse("[workflow]\nrewriter = \"magic\"");
        assert!(AppConfig::resolve(&cli, Some(bad_rewriter)).is_err());
    }

    #[test]
    fn test_search_window_is_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_with_llm(&temp_dir);

        let wide_page = parse("[search]\nmax_page_size = 500");
        let err = AppConfig::resolve(&cli, Some(wide_page)).unwrap_err();
        assert!(err.to_string().contains("search.max_page_size"));

        let wide_cap = parse("[search]\ncandidate_cap = 101");
        let err = AppConfig::resolve(&cli, Some(wide_cap)).unwrap_err();
        assert!(err.to_string().contains("search.candidate_cap"));

        let zero = parse("[search]\nmax_page_size = 0");
        assert!(AppConfig::resolve(&cli, Some(zero)).is_err());

        let at_limit = parse("[search]\ncandidate_cap = 100\nmax_page_size = 100");
        let config = AppConfig::resolve(&cli, Some(at_limit)).unwrap();
        assert_eq!(config.search.max_page_size, 100);
        assert_eq!(config.search.candidate_cap, 100);
    }

    #[cfg(not(feature = "local-rerank"))]
    #[test]
    fn test_local_rerank_requires_feature() {
        let temp_dir = TempDir::new().unwrap();
        let file = parse("[rerank]\nlocal_enabled = true");
        let err = AppConfig::resolve(&cli_with_llm(&temp_dir), Some(file)).unwrap_err();
        assert!(err.to_string().contains("local-rerank"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nbase_url = \"http://llm\"\nmodel = \"m\"\n").unwrap();

        let file = FileConfig::load(&path).unwrap();
        assert_eq!(file.llm.unwrap().model.as_deref(), Some("m"));

        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }
}
