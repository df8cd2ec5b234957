//! Answer workflow state machine.
//!
//! `start → extract_entities → reformulate_query → retrieve_documents →
//! generate_answer → evaluate_answer → {done | reformulate_query}`, with the
//! loop back to reformulation bounded by a cycle limit.

mod executor;
mod nodes;
mod state;

pub use executor::{
    record_outcome, Transition, WorkflowError, WorkflowExecutor, WorkflowRun, WorkflowSettings,
};
pub use nodes::{
    build_answer_messages, build_sources, AnswerEvaluator, DocumentRetriever, EntityExtractor,
    HeuristicEvaluator, LexicalEntityExtractor, LlmAnswerEvaluator, LlmQueryRewriter,
    PassthroughRewriter, QueryRewriter, RelationLookup,
};
pub use state::{
    AnswerSnapshot, Entity, EntityRelation, GraphState, SourceRef, StatePatch, WorkflowStep,
};
