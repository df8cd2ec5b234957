//! Answer generation.
//!
//! - LLM provider abstraction with an OpenAI-compatible client
//! - Workflow state machine with a bounded confidence loop
//! - Event streaming of workflow progress

pub mod llm;
pub mod streaming;
pub mod workflow;

pub use llm::{CompletionOptions, LlmError, LlmProvider, Message, OpenAIProvider};
pub use streaming::{AnswerStream, StreamSettings, StreamingEmitter, WorkflowEvent};
pub use workflow::{GraphState, WorkflowError, WorkflowExecutor, WorkflowSettings, WorkflowStep};
