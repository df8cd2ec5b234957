//! Pluggable collaborators used by the workflow nodes, with their defaults.

use super::executor::WorkflowError;
use super::state::{Entity, GraphState, SourceRef};
use crate::agent::llm::{CompletionOptions, LlmProvider, Message};
use crate::search::{Candidate, SearchOrchestrator, SearchQuery};
use crate::sources::{GraphSource, RelatedCase, SourceError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Number of retrieved documents used for grounding and cited as sources.
pub const GROUNDING_DOCS: usize = 3;

const ANSWER_SYSTEM_PROMPT: &str = "\
You are a customer support assistant answering questions about products and services.
Answer using the reference documents and knowledge graph hints provided.

Guidelines:
1. Keep the answer short and well structured.
2. Prefer information found in the documents and cite them.
3. If the documents do not contain the answer, say so plainly.
4. Use lists or numbered steps where they help readability.";

const REWRITE_SYSTEM_PROMPT: &str = "\
Rewrite the user's question into a short search query for a support case \
knowledge base. Reply with the query only, no explanation.";

const EVALUATE_SYSTEM_PROMPT: &str = "\
Rate how well the answer addresses the question using only the given \
documents. Reply with a single number between 0 and 1.";

// =============================================================================
// Entity extraction
// =============================================================================

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, question: &str) -> Result<Vec<Entity>, WorkflowError>;
}

/// Whitespace tokenizer keeping tokens longer than two characters.
#[derive(Debug, Clone)]
pub struct LexicalEntityExtractor {
    pub min_chars: usize,
    pub confidence: f64,
}

impl Default for LexicalEntityExtractor {
    fn default() -> Self {
        Self {
            min_chars: 3,
            confidence: 0.5,
        }
    }
}

#[async_trait]
impl EntityExtractor for LexicalEntityExtractor {
    async fn extract(&self, question: &str) -> Result<Vec<Entity>, WorkflowError> {
        let mut entities: Vec<Entity> = Vec::new();
        for token in question.split_whitespace() {
            if token.chars().count() >= self.min_chars && !entities.iter().any(|e| e.name == token)
            {
                entities.push(Entity::keyword(token, self.confidence));
            }
        }
        Ok(entities)
    }
}

// =============================================================================
// Query rewriting
// =============================================================================

#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, state: &GraphState) -> Result<String, WorkflowError>;
}

/// Uses the question unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRewriter;

#[async_trait]
impl QueryRewriter for PassthroughRewriter {
    async fn rewrite(&self, state: &GraphState) -> Result<String, WorkflowError> {
        Ok(state.question.clone())
    }
}

/// Asks the LLM for a retrieval-friendly query. Falls back to the original
/// question when the model fails or replies with nothing.
pub struct LlmQueryRewriter {
    llm: Arc<dyn LlmProvider>,
    options: CompletionOptions,
}

impl LlmQueryRewriter {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default()
                .with_temperature(0.2)
                .with_max_tokens(64),
        }
    }
}

#[async_trait]
impl QueryRewriter for LlmQueryRewriter {
    async fn rewrite(&self, state: &GraphState) -> Result<String, WorkflowError> {
        let mut prompt = format!("Question: {}", state.question);
        if state.cycle_count > 0 {
            if let Some(previous) = &state.reformulated_query {
                prompt.push_str(&format!(
                    "\nThe query \"{}\" did not find good documents. Use different keywords.",
                    previous
                ));
            }
        }
        let messages = [Message::system(REWRITE_SYSTEM_PROMPT), Message::user(prompt)];

        match self.llm.complete(&messages, &self.options).await {
            Ok(response) => {
                let query = response.message.content.trim().trim_matches('"').trim();
                if query.is_empty() {
                    Ok(state.question.clone())
                } else {
                    Ok(query.to_string())
                }
            }
            Err(e) => {
                warn!(run_id = %state.run_id, error = %e, "Query rewrite failed, using question");
                Ok(state.question.clone())
            }
        }
    }
}

// =============================================================================
// Answer evaluation
// =============================================================================

#[async_trait]
pub trait AnswerEvaluator: Send + Sync {
    /// Confidence in [0, 1] for the state's current answer.
    async fn evaluate(&self, state: &GraphState) -> Result<f64, WorkflowError>;
}

/// Fixed scores: no answer 0.0, answer without documents 0.5, otherwise 0.9.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEvaluator;

impl HeuristicEvaluator {
    pub fn score(state: &GraphState) -> f64 {
        let has_answer = state
            .answer
            .as_deref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false);
        if !has_answer {
            0.0
        } else if state.retrieved_docs.is_empty() {
            0.5
        } else {
            0.9
        }
    }
}

#[async_trait]
impl AnswerEvaluator for HeuristicEvaluator {
    async fn evaluate(&self, state: &GraphState) -> Result<f64, WorkflowError> {
        Ok(Self::score(state))
    }
}

/// Asks the LLM to grade the answer, falling back to the heuristic when the
/// reply cannot be used.
pub struct LlmAnswerEvaluator {
    llm: Arc<dyn LlmProvider>,
    options: CompletionOptions,
}

impl LlmAnswerEvaluator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default()
                .with_temperature(0.0)
                .with_max_tokens(8),
        }
    }
}

/// First number in `text`, if it lies in [0, 1].
pub(crate) fn parse_confidence(text: &str) -> Option<f64> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|t| !t.is_empty())
        .find_map(|t| t.parse::<f64>().ok())
        .filter(|v| (0.0..=1.0).contains(v))
}

#[async_trait]
impl AnswerEvaluator for LlmAnswerEvaluator {
    async fn evaluate(&self, state: &GraphState) -> Result<f64, WorkflowError> {
        let Some(answer) = state.answer.as_deref().filter(|a| !a.trim().is_empty()) else {
            return Ok(0.0);
        };
        let prompt = format!(
            "Question: {}\n\nDocuments:\n{}\n\nAnswer: {}",
            state.question,
            documents_context(&state.retrieved_docs),
            answer
        );
        let messages = [Message::system(EVALUATE_SYSTEM_PROMPT), Message::user(prompt)];

        match self.llm.complete(&messages, &self.options).await {
            Ok(response) => match parse_confidence(&response.message.content) {
                Some(value) => Ok(value),
                None => {
                    warn!(run_id = %state.run_id, reply = %response.message.content, "Unusable evaluation reply");
                    Ok(HeuristicEvaluator::score(state))
                }
            },
            Err(e) => {
                warn!(run_id = %state.run_id, error = %e, "Answer evaluation failed, using heuristic");
                Ok(HeuristicEvaluator::score(state))
            }
        }
    }
}

// =============================================================================
// Retrieval
// =============================================================================

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, query: &SearchQuery) -> Result<Vec<Candidate>, WorkflowError>;
}

#[async_trait]
impl DocumentRetriever for SearchOrchestrator {
    async fn retrieve(&self, query: &SearchQuery) -> Result<Vec<Candidate>, WorkflowError> {
        self.search(query)
            .await
            .map(|page| page.items)
            .map_err(|e| WorkflowError::Retrieval(e.to_string()))
    }
}

/// Looks up cases related to a retrieved case.
#[async_trait]
pub trait RelationLookup: Send + Sync {
    async fn related(
        &self,
        tenant_id: &str,
        case_id: &str,
        top_k: usize,
    ) -> Result<Vec<RelatedCase>, SourceError>;
}

#[async_trait]
impl RelationLookup for GraphSource {
    async fn related(
        &self,
        tenant_id: &str,
        case_id: &str,
        top_k: usize,
    ) -> Result<Vec<RelatedCase>, SourceError> {
        self.search_related(tenant_id, case_id, top_k).await
    }
}

// =============================================================================
// Prompting
// =============================================================================

fn documents_context(docs: &[Candidate]) -> String {
    docs.iter()
        .take(GROUNDING_DOCS)
        .enumerate()
        .map(|(i, doc)| format!("[Document {}] {}\n{}", i + 1, doc.title, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Grounding prompt built from the top documents, entities and relations.
pub fn build_answer_messages(state: &GraphState) -> Vec<Message> {
    let mut user = format!(
        "Question: {}\n\nReference documents:\n{}",
        state.question,
        documents_context(&state.retrieved_docs)
    );

    if !state.graph_entities.is_empty() {
        let names: Vec<&str> = state.graph_entities.iter().map(|e| e.name.as_str()).collect();
        user.push_str(&format!("\n\nRelated entities: {}", names.join(", ")));
    }
    if !state.entity_relations.is_empty() {
        let related: Vec<String> = state
            .entity_relations
            .iter()
            .map(|r| format!("{} ({})", r.to_title, r.to_case_id))
            .collect();
        user.push_str(&format!("\nRelated cases: {}", related.join(", ")));
    }
    user.push_str("\n\nAnswer the question using the information above:");

    vec![Message::system(ANSWER_SYSTEM_PROMPT), Message::user(user)]
}

/// Top documents as citations with relevance 0.9, 0.8, 0.7.
pub fn build_sources(docs: &[Candidate]) -> Vec<SourceRef> {
    docs.iter()
        .take(GROUNDING_DOCS)
        .enumerate()
        .map(|(i, doc)| SourceRef {
            case_id: doc.case_id.clone(),
            title: doc.title.clone(),
            relevance: 0.9 - i as f64 * 0.1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::workflow::state::{EntityRelation, StatePatch, WorkflowStep};
    use crate::search::SourceTag;
    use crate::test_support::ScriptedLlm;

    fn docs(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                Candidate::new(
                    format!("c{i}"),
                    format!("Title {i}"),
                    format!("Body {i}"),
                    SourceTag::FullText,
                    0.5,
                )
            })
            .collect()
    }

    fn with_answer(answer: &str, docs: Vec<Candidate>) -> GraphState {
        GraphState::new("how do I reset my password", "t1").apply(
            WorkflowStep::GenerateAnswer,
            StatePatch {
                answer: Some(answer.to_string()),
                retrieved_docs: Some(docs),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_lexical_extractor() {
        let entities = LexicalEntityExtractor::default()
            .extract("how do I reset my password password")
            .await
            .unwrap();
        let names: Vec<_> = entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["how", "reset", "password"]);
        assert!(entities.iter().all(|e| e.confidence == 0.5 && e.kind == "keyword"));
    }

    #[tokio::test]
    async fn test_passthrough_rewriter() {
        let state = GraphState::new("original question", "t1");
        assert_eq!(
            PassthroughRewriter.rewrite(&state).await.unwrap(),
            "original question"
        );
    }

    #[tokio::test]
    async fn test_llm_rewriter_degrades_to_question() {
        let state = GraphState::new("original question", "t1");

        let ok = LlmQueryRewriter::new(Arc::new(ScriptedLlm::replies(vec!["\"reset password\""])));
        assert_eq!(ok.rewrite(&state).await.unwrap(), "reset password");

        let failing = LlmQueryRewriter::new(Arc::new(ScriptedLlm::failing()));
        assert_eq!(failing.rewrite(&state).await.unwrap(), "original question");
    }

    #[tokio::test]
    async fn test_heuristic_evaluator() {
        assert_eq!(HeuristicEvaluator::score(&GraphState::new("q", "t1")), 0.0);
        assert_eq!(HeuristicEvaluator::score(&with_answer("  ", docs(2))), 0.0);
        assert_eq!(HeuristicEvaluator::score(&with_answer("yes", vec![])), 0.5);
        assert_eq!(
            HeuristicEvaluator
                .evaluate(&with_answer("yes", docs(1)))
                .await
                .unwrap(),
            0.9
        );
    }

    #[tokio::test]
    async fn test_llm_evaluator_parses_or_falls_back() {
        let state = with_answer("do this", docs(1));

        let good = LlmAnswerEvaluator::new(Arc::new(ScriptedLlm::replies(vec!["Score: 0.42"])));
        assert!((good.evaluate(&state).await.unwrap() - 0.42).abs() < 1e-9);

        let garbage = LlmAnswerEvaluator::new(Arc::new(ScriptedLlm::replies(vec!["great"])));
        assert_eq!(garbage.evaluate(&state).await.unwrap(), 0.9);

        let failing = LlmAnswerEvaluator::new(Arc::new(ScriptedLlm::failing()));
        assert_eq!(failing.evaluate(&state).await.unwrap(), 0.9);
    }

    #[test]
    fn test_parse_confidence() {
        assert_eq!(parse_confidence("0.8"), Some(0.8));
        assert_eq!(parse_confidence("I'd say 1"), Some(1.0));
        assert_eq!(parse_confidence("7"), None);
        assert_eq!(parse_confidence("none"), None);
    }

    #[test]
    fn test_answer_prompt_uses_top_three() {
        let mut state = with_answer("", docs(5));
        state.graph_entities = vec![Entity::keyword("password", 0.5)];
        state.entity_relations = vec![EntityRelation {
            from_case_id: "c0".to_string(),
            to_case_id: "c9".to_string(),
            to_title: "Account lockout".to_string(),
            strength: 2.0,
        }];

        let messages = build_answer_messages(&state);
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains("[Document 3] Title 2"));
        assert!(!user.contains("Title 3"));
        assert!(user.contains("Related entities: password"));
        assert!(user.contains("Account lockout (c9)"));
    }

    #[test]
    fn test_sources_relevance_decays() {
        let sources = build_sources(&docs(5));
        let relevance: Vec<f64> = sources.iter().map(|s| s.relevance).collect();
        assert_eq!(sources.len(), 3);
        assert!((relevance[0] - 0.9).abs() < 1e-9);
        assert!((relevance[1] - 0.8).abs() < 1e-9);
        assert!((relevance[2] - 0.7).abs() < 1e-9);
    }
}
