//! Workflow executor.

use super::nodes::{
    build_answer_messages, build_sources, AnswerEvaluator, DocumentRetriever, EntityExtractor,
    HeuristicEvaluator, LexicalEntityExtractor, PassthroughRewriter, QueryRewriter,
    RelationLookup, GROUNDING_DOCS,
};
use super::state::{EntityRelation, GraphState, StatePatch, WorkflowStep};
use crate::agent::llm::{CompletionOptions, LlmError, LlmProvider};
use crate::metrics;
use crate::search::SearchQuery;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during workflow execution.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Entity extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Maximum loop-backs from evaluation to reformulation.
    pub max_cycles: u32,
    pub confidence_threshold: f64,
    /// Page size used when retrieving grounding documents.
    pub retrieval_page_size: usize,
    /// Related cases fetched per grounding document.
    pub relations_per_doc: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_cycles: 3,
            confidence_threshold: 0.7,
            retrieval_page_size: 10,
            relations_per_doc: 3,
        }
    }
}

/// What the next call to [`WorkflowExecutor::step`] will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run this node.
    Run(WorkflowStep),
    /// Confidence too low: count a cycle and run reformulation again.
    LoopBack,
    /// Confidence reached the threshold.
    Finish,
    /// Out of cycles: finish with the best answer, marked low confidence.
    Exhausted,
    /// Already terminal.
    Halted,
}

/// Final state of a run plus every intermediate state, oldest first.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub final_state: GraphState,
    pub history: Vec<GraphState>,
}

impl WorkflowRun {
    /// Steps in the order they were completed.
    pub fn trace(&self) -> Vec<WorkflowStep> {
        self.history.iter().map(|s| s.step).collect()
    }
}

/// Drives a [`GraphState`] through the answer workflow one node at a time.
pub struct WorkflowExecutor {
    retriever: Arc<dyn DocumentRetriever>,
    llm: Arc<dyn LlmProvider>,
    extractor: Arc<dyn EntityExtractor>,
    rewriter: Arc<dyn QueryRewriter>,
    evaluator: Arc<dyn AnswerEvaluator>,
    relations: Option<Arc<dyn RelationLookup>>,
    completion_options: CompletionOptions,
    settings: WorkflowSettings,
}

impl WorkflowExecutor {
    /// Executor with lexical extraction, passthrough rewriting and heuristic
    /// evaluation.
    pub fn new(
        retriever: Arc<dyn DocumentRetriever>,
        llm: Arc<dyn LlmProvider>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            retriever,
            llm,
            extractor: Arc::new(LexicalEntityExtractor::default()),
            rewriter: Arc::new(PassthroughRewriter),
            evaluator: Arc::new(HeuristicEvaluator),
            relations: None,
            completion_options: CompletionOptions::default(),
            settings,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn AnswerEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_relations(mut self, relations: Arc<dyn RelationLookup>) -> Self {
        self.relations = Some(relations);
        self
    }

    pub fn with_completion_options(mut self, options: CompletionOptions) -> Self {
        self.completion_options = options;
        self
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// The provider answers are generated with.
    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    pub fn plan(&self, state: &GraphState) -> Transition {
        match state.step {
            WorkflowStep::Start => Transition::Run(WorkflowStep::ExtractEntities),
            WorkflowStep::ExtractEntities => Transition::Run(WorkflowStep::ReformulateQuery),
            WorkflowStep::ReformulateQuery => Transition::Run(WorkflowStep::RetrieveDocuments),
            WorkflowStep::RetrieveDocuments => Transition::Run(WorkflowStep::GenerateAnswer),
            WorkflowStep::GenerateAnswer => Transition::Run(WorkflowStep::EvaluateAnswer),
            WorkflowStep::EvaluateAnswer => {
                let confidence = state.confidence.unwrap_or(0.0);
                if confidence >= self.settings.confidence_threshold {
                    Transition::Finish
                } else if state.cycle_count < self.settings.max_cycles {
                    Transition::LoopBack
                } else {
                    Transition::Exhausted
                }
            }
            WorkflowStep::Done | WorkflowStep::Error => Transition::Halted,
        }
    }

    /// Advance by at most one node. Node failures produce an `Error` state
    /// rather than an `Err`; only stepping a terminal state is an error.
    pub async fn step(&self, state: &GraphState) -> Result<GraphState, WorkflowError> {
        match self.plan(state) {
            Transition::Run(node) => Ok(self.run_node(node, state).await),
            Transition::LoopBack => {
                let looped = state.loop_back();
                info!(
                    run_id = %state.run_id,
                    cycle = looped.cycle_count,
                    confidence = state.confidence.unwrap_or(0.0),
                    "Low confidence, reformulating"
                );
                Ok(self.run_node(WorkflowStep::ReformulateQuery, &looped).await)
            }
            Transition::Finish => Ok(state.finish()),
            Transition::Exhausted => {
                warn!(
                    run_id = %state.run_id,
                    cycles = state.cycle_count,
                    "Cycle limit reached, returning best answer"
                );
                Ok(state.finish_low_confidence())
            }
            Transition::Halted => Err(WorkflowError::InvalidStateTransition(format!(
                "Workflow already in terminal state {}",
                state.step
            ))),
        }
    }

    /// Run until a terminal state, keeping every intermediate state.
    pub async fn run(&self, initial: GraphState) -> Result<WorkflowRun, WorkflowError> {
        let mut history = vec![initial];
        loop {
            let current = history.last().cloned().ok_or_else(|| {
                WorkflowError::InvalidStateTransition("Empty workflow history".to_string())
            })?;
            if current.is_terminal() {
                record_outcome(&current);
                return Ok(WorkflowRun {
                    final_state: current,
                    history,
                });
            }
            history.push(self.step(&current).await?);
        }
    }

    async fn run_node(&self, node: WorkflowStep, state: &GraphState) -> GraphState {
        debug!(run_id = %state.run_id, step = %node, "Running workflow node");
        let patch = match node {
            WorkflowStep::ExtractEntities => self.extract_entities(state).await,
            WorkflowStep::ReformulateQuery => self.reformulate_query(state).await,
            WorkflowStep::RetrieveDocuments => self.retrieve_documents(state).await,
            WorkflowStep::GenerateAnswer => self.generate_answer(state).await,
            WorkflowStep::EvaluateAnswer => self.evaluate_answer(state).await,
            other => Err(WorkflowError::InvalidStateTransition(format!(
                "{} is not a runnable node",
                other
            ))),
        };

        match patch {
            Ok(patch) => state.apply(node, patch),
            Err(e) => {
                warn!(run_id = %state.run_id, step = %node, error = %e, "Workflow node failed");
                state.fail(format!("{} failed: {}", node, e))
            }
        }
    }

    async fn extract_entities(&self, state: &GraphState) -> Result<StatePatch, WorkflowError> {
        let entities = self.extractor.extract(&state.question).await?;
        Ok(StatePatch {
            graph_entities: Some(entities),
            ..Default::default()
        })
    }

    async fn reformulate_query(&self, state: &GraphState) -> Result<StatePatch, WorkflowError> {
        let query = self.rewriter.rewrite(state).await?;
        Ok(StatePatch {
            reformulated_query: Some(query),
            ..Default::default()
        })
    }

    async fn retrieve_documents(&self, state: &GraphState) -> Result<StatePatch, WorkflowError> {
        let query = SearchQuery::new(state.retrieval_query(), state.tenant_id.clone())
            .with_filters(state.filters.clone())
            .with_page(1, self.settings.retrieval_page_size);
        let docs = self.retriever.retrieve(&query).await?;
        let relations = self.lookup_relations(state, &docs).await;

        Ok(StatePatch {
            retrieved_docs: Some(docs),
            entity_relations: Some(relations),
            ..Default::default()
        })
    }

    /// Graph neighbours of the grounding documents. Lookup failures only cost
    /// the extra context.
    async fn lookup_relations(
        &self,
        state: &GraphState,
        docs: &[crate::search::Candidate],
    ) -> Vec<EntityRelation> {
        let Some(lookup) = &self.relations else {
            return Vec::new();
        };

        let mut relations: Vec<EntityRelation> = Vec::new();
        for doc in docs.iter().take(GROUNDING_DOCS) {
            match lookup
                .related(&state.tenant_id, &doc.case_id, self.settings.relations_per_doc)
                .await
            {
                Ok(related) => {
                    for r in related {
                        if !relations.iter().any(|e| e.to_case_id == r.case_id) {
                            relations.push(EntityRelation {
                                from_case_id: doc.case_id.clone(),
                                to_case_id: r.case_id,
                                to_title: r.title,
                                strength: r.strength,
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!(run_id = %state.run_id, case_id = %doc.case_id, error = %e, "Relation lookup failed");
                }
            }
        }
        relations
    }

    async fn generate_answer(&self, state: &GraphState) -> Result<StatePatch, WorkflowError> {
        let messages = build_answer_messages(state);
        let response = self
            .llm
            .complete(&messages, &self.completion_options)
            .await?;

        Ok(StatePatch {
            answer: Some(response.message.content),
            sources: Some(build_sources(&state.retrieved_docs)),
            ..Default::default()
        })
    }

    async fn evaluate_answer(&self, state: &GraphState) -> Result<StatePatch, WorkflowError> {
        let confidence = self.evaluator.evaluate(state).await?.clamp(0.0, 1.0);
        Ok(StatePatch {
            confidence: Some(confidence),
            ..Default::default()
        })
    }
}

/// Count a finished run in the workflow metrics.
pub fn record_outcome(state: &GraphState) {
    let outcome = match state.step {
        WorkflowStep::Error => "error",
        _ if state.low_confidence => "low_confidence",
        _ => "done",
    };
    metrics::record_workflow_run(outcome, state.cycle_count);
}
