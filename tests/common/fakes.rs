//! Scripted stand-ins for the external services

use async_trait::async_trait;
use caseknow_server::agent::llm::{
    CompletionOptions, CompletionResponse, LlmError, LlmProvider, Message,
};
use caseknow_server::case_store::CaseRecord;
use caseknow_server::search::{SearchQuery, SourceTag};
use caseknow_server::sources::{CaseIndexer, RetrievalSource, SourceError, SourceHit};
use std::sync::Mutex;

/// Retrieval source returning the same hits for every query.
pub struct StaticSource {
    tag: SourceTag,
    hits: Vec<SourceHit>,
}

impl StaticSource {
    pub fn new(tag: SourceTag, hits: Vec<SourceHit>) -> Self {
        Self { tag, hits }
    }
}

#[async_trait]
impl RetrievalSource for StaticSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SourceHit>, SourceError> {
        Ok(self.hits.clone())
    }
}

/// LLM that always answers with the same text, or always fails.
pub struct ScriptedLlm {
    reply: Option<String>,
}

impl ScriptedLlm {
    pub fn answering(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { reply: None }
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
        match &self.reply {
            Some(reply) => Ok(CompletionResponse::text(reply.clone())),
            None => Err(LlmError::Connection("connection refused".to_string())),
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        match self.reply {
            Some(_) => Ok(()),
            None => Err(LlmError::Connection("connection refused".to_string())),
        }
    }
}

/// Index backend that remembers which cases it received.
#[derive(Default)]
pub struct RecordingIndexer {
    indexed: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl RecordingIndexer {
    pub fn indexed(&self) -> Vec<String> {
        self.indexed.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaseIndexer for RecordingIndexer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn index_case(&self, case: &CaseRecord) -> Result<(), SourceError> {
        self.indexed.lock().unwrap().push(case.id.clone());
        Ok(())
    }

    async fn remove_case(&self, _tenant_id: &str, case_id: &str) -> Result<(), SourceError> {
        self.removed.lock().unwrap().push(case_id.to_string());
        Ok(())
    }
}
