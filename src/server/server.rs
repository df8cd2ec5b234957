use anyhow::{anyhow, Context, Result};
use axum::{middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::ask::make_ask_routes;
use super::index::make_index_routes;
use super::search::make_search_routes;
use super::state::ServerState;
use super::{log_requests, ServerConfig};
use crate::agent::llm::{LlmProvider, OpenAIProvider};
use crate::agent::workflow::{
    AnswerEvaluator, LlmAnswerEvaluator, LlmQueryRewriter, QueryRewriter, WorkflowExecutor,
};
use crate::agent::StreamingEmitter;
use crate::case_store::CaseStore;
use crate::config::{AppConfig, EvaluatorKind, RewriterKind};
use crate::indexing::IndexSyncer;
use crate::metrics::metrics_handler;
use crate::search::rerank::{CrossEncoderReranker, DashScopeReranker, RerankChain, RerankProvider};
use crate::search::{FusionEngine, SearchOrchestrator};
use crate::sources::{
    CaseIndexer, ElasticsearchSource, EmbeddingProvider, GraphSource, OpenAIEmbeddings,
    RetrievalSource, VectorSource,
};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(axum::extract::State(state): axum::extract::State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Retrieval sources and sync targets for the enabled backends.
struct Backends {
    sources: Vec<Arc<dyn RetrievalSource>>,
    indexers: Vec<Arc<dyn CaseIndexer>>,
    graph: Option<Arc<GraphSource>>,
}

fn build_backends(config: &AppConfig) -> Result<Backends> {
    let mut backends = Backends {
        sources: Vec::new(),
        indexers: Vec::new(),
        graph: None,
    };

    if config.elasticsearch.enabled {
        info!("Full-text source: Elasticsearch at {}", config.elasticsearch.url);
        let es = Arc::new(ElasticsearchSource::new(config.elasticsearch.clone()));
        backends.sources.push(es.clone());
        backends.indexers.push(es);
    }

    if config.vector.enabled {
        let embedding = config
            .embedding
            .as_ref()
            .ok_or_else(|| anyhow!("Vector source requires an embedding service"))?;
        info!(
            "Vector source: Milvus at {} (embeddings: {})",
            config.vector.url, embedding.model
        );
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(OpenAIEmbeddings::new(
            embedding.base_url.clone(),
            embedding.model.clone(),
            embedding.api_key.clone(),
        ));
        let vector = Arc::new(VectorSource::new(config.vector.clone(), embeddings));
        backends.sources.push(vector.clone());
        backends.indexers.push(vector);
    }

    if config.graph.enabled {
        info!("Graph source: Neo4j at {}", config.graph.url);
        let graph = Arc::new(GraphSource::new(config.graph.clone()));
        backends.sources.push(graph.clone());
        backends.indexers.push(graph.clone());
        backends.graph = Some(graph);
    }

    if backends.sources.is_empty() {
        warn!("No retrieval sources enabled, every search uses the document store scan");
    }
    Ok(backends)
}

fn build_rerank_chain(config: &AppConfig) -> RerankChain {
    let mut providers: Vec<Arc<dyn RerankProvider>> = Vec::new();

    if config.rerank.remote.enabled {
        info!("Remote rerank: DashScope model {}", config.rerank.remote.model);
        providers.push(Arc::new(DashScopeReranker::new(config.rerank.remote.clone())));
    }

    if config.rerank.local_enabled {
        providers.push(Arc::new(load_cross_encoder(&config.rerank.local_model)));
    }

    RerankChain::new(providers)
}

#[cfg(feature = "local-rerank")]
fn load_cross_encoder(model_name: &str) -> CrossEncoderReranker {
    use crate::search::rerank::FastEmbedCrossEncoder;

    match FastEmbedCrossEncoder::load(model_name) {
        Ok(model) => {
            info!("Local rerank: cross-encoder {}", model_name);
            CrossEncoderReranker::new(Arc::new(model))
        }
        Err(e) => {
            warn!("Failed to load cross-encoder {}: {:#}; local rerank disabled", model_name, e);
            CrossEncoderReranker::unavailable()
        }
    }
}

#[cfg(not(feature = "local-rerank"))]
fn load_cross_encoder(model_name: &str) -> CrossEncoderReranker {
    warn!(
        "Cross-encoder {} requested but built without local-rerank; local rerank disabled",
        model_name
    );
    CrossEncoderReranker::unavailable()
}

/// Probe the text generation service. An unreachable service is not fatal:
/// searches still work and answers fail until it comes back.
async fn check_llm(llm: &dyn LlmProvider) -> bool {
    match llm.health_check().await {
        Ok(()) => {
            info!("LLM {} ({}) is reachable", llm.model(), llm.name());
            true
        }
        Err(e) => {
            warn!(
                "LLM {} ({}) health check failed: {}; answers will fail until it recovers",
                llm.model(),
                llm.name(),
                e
            );
            false
        }
    }
}

/// Wire every collaborator named in `config` around `case_store`.
pub fn build_state(config: &AppConfig, case_store: Arc<dyn CaseStore>) -> Result<ServerState> {
    let backends = build_backends(config)?;

    let fusion = FusionEngine::new(backends.sources, case_store.clone(), config.fusion.clone());
    let orchestrator = Arc::new(SearchOrchestrator::new(
        fusion,
        build_rerank_chain(config),
        config.search.clone(),
    ));

    info!("LLM: {} at {}", config.llm.model, config.llm.base_url);
    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAIProvider::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.api_key_source(),
    ));

    let mut executor = WorkflowExecutor::new(orchestrator.clone(), llm.clone(), config.workflow.clone())
        .with_completion_options(config.llm.completion_options());
    if config.rewriter == RewriterKind::Llm {
        let rewriter: Arc<dyn QueryRewriter> = Arc::new(LlmQueryRewriter::new(llm.clone()));
        executor = executor.with_rewriter(rewriter);
    }
    if config.evaluator == EvaluatorKind::Llm {
        let evaluator: Arc<dyn AnswerEvaluator> = Arc::new(LlmAnswerEvaluator::new(llm.clone()));
        executor = executor.with_evaluator(evaluator);
    }
    if let Some(graph) = backends.graph {
        executor = executor.with_relations(graph);
    }
    let executor = Arc::new(executor);

    let emitter = Arc::new(StreamingEmitter::new(executor.clone(), config.stream.clone()));

    let index_syncer = if backends.indexers.is_empty() {
        None
    } else {
        Some(IndexSyncer::new(backends.indexers))
    };

    Ok(ServerState {
        config: ServerConfig {
            requests_logging_level: config.logging_level.clone(),
            port: config.port,
        },
        start_time: Instant::now(),
        case_store,
        orchestrator,
        executor,
        emitter,
        index_syncer,
    })
}

pub fn make_app(state: ServerState) -> Router {
    let api_routes: Router = Router::new()
        .merge(make_search_routes(state.clone()))
        .merge(make_ask_routes(state.clone()))
        .merge(make_index_routes(state.clone()));

    Router::new()
        .route("/", get(home))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .nest("/v1", api_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub async fn run_server(config: AppConfig, case_store: Arc<dyn CaseStore>) -> Result<()> {
    let state = build_state(&config, case_store)?;
    check_llm(state.executor.llm().as_ref()).await;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    info!("Ready to serve at port {}!", config.port);
    Ok(axum::serve(listener, app).await?)
}
