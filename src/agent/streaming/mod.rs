//! Answer streaming: workflow progress as a sequence of events.

mod emitter;
mod events;

pub use emitter::{AnswerStream, EmitSummary, StreamSettings, StreamingEmitter};
pub use events::{chunk_text, WorkflowEvent};
