use axum::extract::FromRef;

use crate::agent::{StreamingEmitter, WorkflowExecutor};
use crate::case_store::CaseStore;
use crate::indexing::IndexSyncer;
use crate::search::SearchOrchestrator;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCaseStore = Arc<dyn CaseStore>;
pub type GuardedOrchestrator = Arc<SearchOrchestrator>;
pub type GuardedExecutor = Arc<WorkflowExecutor>;
pub type GuardedEmitter = Arc<StreamingEmitter>;
pub type OptionalIndexSyncer = Option<Arc<IndexSyncer>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub case_store: GuardedCaseStore,
    pub orchestrator: GuardedOrchestrator,
    pub executor: GuardedExecutor,
    pub emitter: GuardedEmitter,
    pub index_syncer: OptionalIndexSyncer,
}

impl FromRef<ServerState> for GuardedCaseStore {
    fn from_ref(input: &ServerState) -> Self {
        input.case_store.clone()
    }
}

impl FromRef<ServerState> for GuardedOrchestrator {
    fn from_ref(input: &ServerState) -> Self {
        input.orchestrator.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
