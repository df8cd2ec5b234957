//! Answer workflow state.

use crate::case_store::CaseFilters;
use crate::search::Candidate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node of the answer workflow, or one of its two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Start,
    ExtractEntities,
    ReformulateQuery,
    RetrieveDocuments,
    GenerateAnswer,
    EvaluateAnswer,
    Done,
    Error,
}

impl WorkflowStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStep::Done | WorkflowStep::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Start => "start",
            WorkflowStep::ExtractEntities => "extract_entities",
            WorkflowStep::ReformulateQuery => "reformulate_query",
            WorkflowStep::RetrieveDocuments => "retrieve_documents",
            WorkflowStep::GenerateAnswer => "generate_answer",
            WorkflowStep::EvaluateAnswer => "evaluate_answer",
            WorkflowStep::Done => "done",
            WorkflowStep::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyword or named thing pulled out of the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: String,
    pub confidence: f64,
}

impl Entity {
    pub fn keyword(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            kind: "keyword".to_string(),
            confidence,
        }
    }
}

/// A retrieved case linked to another case in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub from_case_id: String,
    pub to_case_id: String,
    pub to_title: String,
    pub strength: f64,
}

/// A document cited by the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub case_id: String,
    pub title: String,
    pub relevance: f64,
}

/// The highest-confidence answer seen across evaluation cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSnapshot {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
}

/// Workflow state. Every node produces a new value; earlier values are never
/// mutated, so a run's history can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub run_id: String,
    pub question: String,
    pub tenant_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub filters: CaseFilters,

    pub retrieved_docs: Vec<Candidate>,
    pub graph_entities: Vec<Entity>,
    pub entity_relations: Vec<EntityRelation>,
    pub reformulated_query: Option<String>,

    pub answer: Option<String>,
    pub sources: Vec<SourceRef>,
    /// Unset until the first evaluation; always set once terminal.
    pub confidence: Option<f64>,
    /// Terminated by the cycle bound instead of reaching the threshold.
    pub low_confidence: bool,
    pub best: Option<AnswerSnapshot>,

    /// Last completed step.
    pub step: WorkflowStep,
    pub error: Option<String>,
    /// Number of loop-backs from evaluation to reformulation.
    pub cycle_count: u32,
}

impl GraphState {
    pub fn new(question: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            question: question.into(),
            tenant_id: tenant_id.into(),
            user_id: None,
            filters: CaseFilters::default(),
            retrieved_docs: Vec::new(),
            graph_entities: Vec::new(),
            entity_relations: Vec::new(),
            reformulated_query: None,
            answer: None,
            sources: Vec::new(),
            confidence: None,
            low_confidence: false,
            best: None,
            step: WorkflowStep::Start,
            error: None,
            cycle_count: 0,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_filters(mut self, filters: CaseFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }

    /// The query used for retrieval: the rewrite if there is one.
    pub fn retrieval_query(&self) -> &str {
        self.reformulated_query.as_deref().unwrap_or(&self.question)
    }

    /// New state with `patch` merged in and `step` recorded as completed.
    pub fn apply(&self, step: WorkflowStep, patch: StatePatch) -> GraphState {
        let mut next = self.clone();
        next.step = step;
        if let Some(docs) = patch.retrieved_docs {
            next.retrieved_docs = docs;
        }
        if let Some(entities) = patch.graph_entities {
            next.graph_entities = entities;
        }
        if let Some(relations) = patch.entity_relations {
            next.entity_relations = relations;
        }
        if let Some(query) = patch.reformulated_query {
            next.reformulated_query = Some(query);
        }
        if let Some(answer) = patch.answer {
            next.answer = Some(answer);
        }
        if let Some(sources) = patch.sources {
            next.sources = sources;
        }
        if let Some(confidence) = patch.confidence {
            next.confidence = Some(confidence);
            next.remember_if_best(confidence);
        }
        next
    }

    fn remember_if_best(&mut self, confidence: f64) {
        let Some(answer) = &self.answer else {
            return;
        };
        let better = self
            .best
            .as_ref()
            .map(|b| confidence > b.confidence)
            .unwrap_or(true);
        if better {
            self.best = Some(AnswerSnapshot {
                answer: answer.clone(),
                sources: self.sources.clone(),
                confidence,
            });
        }
    }

    /// Terminal success state.
    pub fn finish(&self) -> GraphState {
        let mut next = self.clone();
        next.step = WorkflowStep::Done;
        next
    }

    /// Terminal state after running out of cycles, carrying the best answer
    /// seen so far.
    pub fn finish_low_confidence(&self) -> GraphState {
        let mut next = self.clone();
        if let Some(best) = &self.best {
            next.answer = Some(best.answer.clone());
            next.sources = best.sources.clone();
            next.confidence = Some(best.confidence);
        }
        next.confidence = Some(next.confidence.unwrap_or(0.0));
        next.low_confidence = true;
        next.step = WorkflowStep::Done;
        next
    }

    /// Terminal failure state.
    pub fn fail(&self, error: impl Into<String>) -> GraphState {
        let mut next = self.clone();
        next.error = Some(error.into());
        next.confidence = Some(next.confidence.unwrap_or(0.0));
        next.step = WorkflowStep::Error;
        next
    }

    /// State entering another reformulation cycle.
    pub fn loop_back(&self) -> GraphState {
        let mut next = self.clone();
        next.cycle_count += 1;
        next
    }
}

/// Fields a node wants to change. `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub retrieved_docs: Option<Vec<Candidate>>,
    pub graph_entities: Option<Vec<Entity>>,
    pub entity_relations: Option<Vec<EntityRelation>>,
    pub reformulated_query: Option<String>,
    pub answer: Option<String>,
    pub sources: Option<Vec<SourceRef>>,
    pub confidence: Option<f64>,
}
