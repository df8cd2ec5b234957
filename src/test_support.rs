//! Hand-written fakes shared by unit tests.

use crate::agent::llm::{CompletionOptions, CompletionResponse, LlmError, LlmProvider, Message};
use crate::agent::workflow::{AnswerEvaluator, DocumentRetriever, GraphState, WorkflowError};
use crate::search::rerank::{RerankError, RerankProvider};
use crate::search::{Candidate, SearchQuery, SourceTag};
use crate::sources::{RetrievalSource, SourceError, SourceHit};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// =============================================================================
// Retrieval sources
// =============================================================================

/// Returns the same hits for every query.
pub struct StaticSource {
    tag: SourceTag,
    hits: Vec<SourceHit>,
    enabled: bool,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(tag: SourceTag, hits: Vec<SourceHit>) -> Self {
        Self {
            tag,
            hits,
            enabled: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalSource for StaticSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

pub struct FailingSource {
    tag: SourceTag,
}

impl FailingSource {
    pub fn new(tag: SourceTag) -> Self {
        Self { tag }
    }
}

#[async_trait]
impl RetrievalSource for FailingSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError> {
        Err(SourceError::Connection("connection refused".to_string()))
    }
}

/// Answers only after `delay`, with a hit that would change the ranking.
pub struct SlowSource {
    tag: SourceTag,
    delay: Duration,
}

impl SlowSource {
    pub fn new(tag: SourceTag, delay: Duration) -> Self {
        Self { tag, delay }
    }
}

#[async_trait]
impl RetrievalSource for SlowSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![SourceHit::new("slow", "Slow", "", 1.0)])
    }
}

// =============================================================================
// Rerank providers
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub enum ScriptedRerank {
    Fail,
    Empty,
    Reverse,
}

pub struct ScriptedReranker {
    name: &'static str,
    behaviour: ScriptedRerank,
    available: bool,
    calls: AtomicUsize,
}

impl ScriptedReranker {
    pub fn new(name: &'static str, behaviour: ScriptedRerank) -> Self {
        Self {
            name,
            behaviour,
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RerankProvider for ScriptedReranker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn rerank(
        &self,
        _query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<Candidate>, RerankError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            ScriptedRerank::Fail => Err(RerankError::Connection("unreachable".to_string())),
            ScriptedRerank::Empty => Ok(Vec::new()),
            ScriptedRerank::Reverse => Ok(candidates
                .iter()
                .rev()
                .take(top_k)
                .enumerate()
                .map(|(i, c)| {
                    let mut c = c.clone();
                    c.rerank_score = Some(1.0 - i as f64 * 0.1);
                    c.rerank_source = Some(self.name.to_string());
                    c
                })
                .collect()),
        }
    }
}

// =============================================================================
// LLM and workflow collaborators
// =============================================================================

/// Replies with the scripted texts in order, then errors.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    failing: bool,
}

impl ScriptedLlm {
    pub fn replies(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            failing: true,
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError> {
        if self.failing {
            return Err(LlmError::Connection("connection refused".to_string()));
        }
        match self.replies.lock().unwrap().pop_front() {
            Some(text) => Ok(CompletionResponse::text(text)),
            None => Err(LlmError::InvalidResponse(
                "No scripted reply left".to_string(),
            )),
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.failing {
            return Err(LlmError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Returns the same documents for every query.
pub struct FixedRetriever {
    docs: Vec<Candidate>,
}

impl FixedRetriever {
    pub fn new(docs: Vec<Candidate>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl DocumentRetriever for FixedRetriever {
    async fn retrieve(&self, _query: &SearchQuery) -> Result<Vec<Candidate>, WorkflowError> {
        Ok(self.docs.clone())
    }
}

/// Returns the scripted confidences in order, repeating the last one.
pub struct ScriptedEvaluator {
    scores: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedEvaluator {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().collect()),
            last: Mutex::new(0.0),
        }
    }
}

#[async_trait]
impl AnswerEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, _state: &GraphState) -> Result<f64, WorkflowError> {
        let mut last = self.last.lock().unwrap();
        if let Some(score) = self.scores.lock().unwrap().pop_front() {
            *last = score;
        }
        Ok(*last)
    }
}
