//! Events sent to streaming clients.

use crate::agent::workflow::{SourceRef, Transition, WorkflowStep};
use serde::{Deserialize, Serialize};

/// One event of an answer stream. Serialized as `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Start { message: String },
    Thinking { message: String },
    Content { text: String },
    Sources { sources: Vec<SourceRef> },
    Confidence { value: f64, low_confidence: bool },
    Error { message: String },
    Done,
}

impl WorkflowEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowEvent::Done | WorkflowEvent::Error { .. })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::Start { .. } => "start",
            WorkflowEvent::Thinking { .. } => "thinking",
            WorkflowEvent::Content { .. } => "content",
            WorkflowEvent::Sources { .. } => "sources",
            WorkflowEvent::Confidence { .. } => "confidence",
            WorkflowEvent::Error { .. } => "error",
            WorkflowEvent::Done => "done",
        }
    }
}

/// Progress message for the transition about to happen, if it runs a node.
pub fn thinking_message(transition: Transition, cycle_count: u32) -> Option<String> {
    let message = match transition {
        Transition::Run(step) => match step {
            WorkflowStep::ExtractEntities => "Extracting entities".to_string(),
            WorkflowStep::ReformulateQuery => "Reformulating query".to_string(),
            WorkflowStep::RetrieveDocuments => "Retrieving documents".to_string(),
            WorkflowStep::GenerateAnswer => "Generating answer".to_string(),
            WorkflowStep::EvaluateAnswer => "Evaluating answer".to_string(),
            _ => return None,
        },
        Transition::LoopBack => format!(
            "Low confidence, reformulating query (attempt {})",
            cycle_count + 2
        ),
        Transition::Finish | Transition::Exhausted | Transition::Halted => return None,
    };
    Some(message)
}

/// Split `text` into pieces of at most `size` characters, in order.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}
