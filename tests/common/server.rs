//! Test application assembly
//!
//! Wires the real fusion, rerank, workflow and streaming components around
//! scripted backends, the same way the server does at startup.

use super::constants::SCRIPTED_ANSWER;
use super::fakes::ScriptedLlm;
use super::fixtures::create_test_store;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use caseknow_server::agent::llm::LlmProvider;
use caseknow_server::agent::{StreamSettings, StreamingEmitter, WorkflowExecutor, WorkflowSettings};
use caseknow_server::case_store::CaseStore;
use caseknow_server::indexing::IndexSyncer;
use caseknow_server::search::{
    FusionEngine, FusionSettings, RerankChain, SearchOrchestrator, SearchSettings,
};
use caseknow_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use caseknow_server::sources::{CaseIndexer, RetrievalSource};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct TestAppBuilder {
    sources: Vec<Arc<dyn RetrievalSource>>,
    indexers: Vec<Arc<dyn CaseIndexer>>,
    llm: Arc<dyn LlmProvider>,
}

impl TestAppBuilder {
    pub fn source(mut self, source: impl RetrievalSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn indexer(mut self, indexer: Arc<dyn CaseIndexer>) -> Self {
        self.indexers.push(indexer);
        self
    }

    pub fn llm(mut self, llm: ScriptedLlm) -> Self {
        self.llm = Arc::new(llm);
        self
    }

    pub fn build(self) -> TestApp {
        let case_store: Arc<dyn CaseStore> = Arc::new(create_test_store());

        let fusion = FusionEngine::new(self.sources, case_store.clone(), FusionSettings::default());
        let orchestrator = Arc::new(SearchOrchestrator::new(
            fusion,
            RerankChain::lexical_only(),
            SearchSettings::default(),
        ));
        let executor = Arc::new(WorkflowExecutor::new(
            orchestrator.clone(),
            self.llm,
            WorkflowSettings::default(),
        ));
        let emitter = Arc::new(StreamingEmitter::new(
            executor.clone(),
            StreamSettings::default(),
        ));
        let index_syncer = if self.indexers.is_empty() {
            None
        } else {
            Some(IndexSyncer::new(self.indexers))
        };

        let state = ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                port: 0,
            },
            start_time: Instant::now(),
            case_store,
            orchestrator,
            executor,
            emitter,
            index_syncer,
        };

        TestApp {
            router: make_app(state),
        }
    }
}

/// A router over an isolated in-memory store.
pub struct TestApp {
    router: Router,
}

impl TestApp {
    /// No retrieval sources, no index backends, an LLM that answers.
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            sources: Vec::new(),
            indexers: Vec::new(),
            llm: Arc::new(ScriptedLlm::answering(SCRIPTED_ANSWER)),
        }
    }

    /// Send a request and collect the whole response body as text.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .expect("Failed to read response body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// POST a JSON body and parse the JSON reply.
    pub async fn post_json(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, text) = self.send(request).await;
        let json = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}
