//! Runs a workflow in a background task and feeds its progress to a channel.
//!
//! The producer checks the cancellation token before each node and each send.
//! Once cancelled it stops without a terminal event.

use super::events::{chunk_text, thinking_message, WorkflowEvent};
use crate::agent::workflow::{record_outcome, GraphState, WorkflowExecutor, WorkflowStep};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Characters per `content` event.
    pub chunk_size: usize,
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            channel_capacity: 32,
        }
    }
}

/// What the producer did before it stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitSummary {
    pub events_sent: usize,
    pub terminal_sent: bool,
    pub cancelled: bool,
    pub final_step: Option<WorkflowStep>,
}

pub struct StreamingEmitter {
    executor: Arc<WorkflowExecutor>,
    settings: StreamSettings,
}

impl StreamingEmitter {
    pub fn new(executor: Arc<WorkflowExecutor>, settings: StreamSettings) -> Self {
        Self { executor, settings }
    }

    /// Start answering `initial` in the background.
    pub fn stream(&self, initial: GraphState) -> AnswerStream {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let cancel = CancellationToken::new();

        let producer = Producer {
            tx,
            cancel: cancel.clone(),
            summary: EmitSummary::default(),
        };
        let handle = tokio::spawn(producer.run(
            self.executor.clone(),
            initial,
            self.settings.chunk_size,
        ));

        AnswerStream {
            rx,
            cancel: cancel.clone(),
            producer: handle,
            _guard: cancel.drop_guard(),
        }
    }
}

/// Consumer side of an answer stream. Dropping it cancels the producer.
pub struct AnswerStream {
    rx: mpsc::Receiver<WorkflowEvent>,
    cancel: CancellationToken,
    producer: JoinHandle<EmitSummary>,
    _guard: DropGuard,
}

impl AnswerStream {
    /// Next event, or `None` once the stream ended or was cancelled.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the producer (if still running) and wait for it.
    pub async fn close(self) -> EmitSummary {
        let AnswerStream {
            rx,
            cancel,
            producer,
            _guard,
        } = self;
        cancel.cancel();
        drop(rx);
        match producer.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Answer stream producer panicked");
                EmitSummary::default()
            }
        }
    }
}

struct Producer {
    tx: mpsc::Sender<WorkflowEvent>,
    cancel: CancellationToken,
    summary: EmitSummary,
}

impl Producer {
    async fn run(
        mut self,
        executor: Arc<WorkflowExecutor>,
        initial: GraphState,
        chunk_size: usize,
    ) -> EmitSummary {
        let run_id = initial.run_id.clone();
        if !self
            .emit(WorkflowEvent::Start {
                message: "Processing question".to_string(),
            })
            .await
        {
            return self.stopped(&run_id);
        }

        let mut state = initial;
        while !state.is_terminal() {
            let transition = executor.plan(&state);
            if let Some(message) = thinking_message(transition, state.cycle_count) {
                if !self.emit(WorkflowEvent::Thinking { message }).await {
                    return self.stopped(&run_id);
                }
            }

            let stepped = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                stepped = executor.step(&state) => Some(stepped),
            };
            let Some(stepped) = stepped else {
                return self.stopped(&run_id);
            };
            state = match stepped {
                Ok(next) => next,
                Err(e) => state.fail(e.to_string()),
            };
        }
        record_outcome(&state);
        self.summary.final_step = Some(state.step);

        if state.step == WorkflowStep::Error {
            let message = state
                .error
                .clone()
                .unwrap_or_else(|| "Workflow failed".to_string());
            if self.emit(WorkflowEvent::Error { message }).await {
                self.summary.terminal_sent = true;
            }
            return self.summary;
        }

        let answer = state.answer.clone().unwrap_or_default();
        for text in chunk_text(&answer, chunk_size) {
            if !self.emit(WorkflowEvent::Content { text }).await {
                return self.stopped(&run_id);
            }
        }

        if !state.sources.is_empty()
            && !self
                .emit(WorkflowEvent::Sources {
                    sources: state.sources.clone(),
                })
                .await
        {
            return self.stopped(&run_id);
        }

        let confidence = WorkflowEvent::Confidence {
            value: state.confidence.unwrap_or(0.0),
            low_confidence: state.low_confidence,
        };
        if !self.emit(confidence).await {
            return self.stopped(&run_id);
        }

        if self.emit(WorkflowEvent::Done).await {
            self.summary.terminal_sent = true;
        }
        debug!(run_id = %run_id, events = self.summary.events_sent, "Answer stream completed");
        self.summary
    }

    /// Send unless cancelled first. `false` means stop producing.
    async fn emit(&mut self, event: WorkflowEvent) -> bool {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        };
        if sent {
            self.summary.events_sent += 1;
        }
        sent
    }

    fn stopped(mut self, run_id: &str) -> EmitSummary {
        info!(run_id = %run_id, events = self.summary.events_sent, "Answer stream cancelled by consumer");
        self.summary.cancelled = true;
        self.summary
    }
}
