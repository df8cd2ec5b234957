//! Background index sync.
//!
//! A published case is queued and a background worker fans it out to every
//! [`CaseIndexer`]. Queueing never blocks the caller; failures are logged and
//! counted, never retried, and never affect the document store.

use crate::case_store::{CaseRecord, CaseStatus};
use crate::metrics;
use crate::sources::CaseIndexer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Maximum queue capacity before dropping new tasks
pub const QUEUE_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub enum IndexTask {
    Upsert(CaseRecord),
    Remove { tenant_id: String, case_id: String },
}

impl IndexTask {
    pub fn case_id(&self) -> &str {
        match self {
            IndexTask::Upsert(case) => &case.id,
            IndexTask::Remove { case_id, .. } => case_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IndexTask::Upsert(_) => "upsert",
            IndexTask::Remove { .. } => "remove",
        }
    }
}

pub struct IndexSyncer {
    queue_tx: mpsc::Sender<IndexTask>,
    capacity: usize,
    backends: Vec<String>,
}

impl IndexSyncer {
    /// Create the syncer and start its background worker. The worker stops
    /// once the syncer is dropped and the queue is drained.
    pub fn new(indexers: Vec<Arc<dyn CaseIndexer>>) -> Arc<Self> {
        Self::with_capacity(indexers, QUEUE_CAPACITY)
    }

    pub fn with_capacity(indexers: Vec<Arc<dyn CaseIndexer>>, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let backends = indexers.iter().map(|i| i.name().to_string()).collect();

        tokio::spawn(background_worker(rx, indexers));

        Arc::new(Self {
            queue_tx: tx,
            capacity,
            backends,
        })
    }

    /// Names of the backends cases are synced to.
    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Queue a case. Published cases are upserted, any other status removes
    /// the case from the backends. Returns false if the queue is full.
    pub fn enqueue_case(&self, case: &CaseRecord) -> bool {
        let task = if case.status == CaseStatus::Published {
            IndexTask::Upsert(case.clone())
        } else {
            IndexTask::Remove {
                tenant_id: case.tenant_id.clone(),
                case_id: case.id.clone(),
            }
        };
        self.enqueue(task)
    }

    pub fn enqueue_removal(&self, tenant_id: &str, case_id: &str) -> bool {
        self.enqueue(IndexTask::Remove {
            tenant_id: tenant_id.to_string(),
            case_id: case_id.to_string(),
        })
    }

    fn enqueue(&self, task: IndexTask) -> bool {
        let case_id = task.case_id().to_string();
        match self.queue_tx.try_send(task) {
            Ok(()) => {
                metrics::set_index_queue_size(self.queue_size());
                true
            }
            Err(e) => {
                warn!("Failed to queue case {} for index sync: {}", case_id, e);
                false
            }
        }
    }

    /// Approximate number of queued tasks.
    pub fn queue_size(&self) -> usize {
        self.capacity.saturating_sub(self.queue_tx.capacity())
    }
}

async fn background_worker(mut rx: mpsc::Receiver<IndexTask>, indexers: Vec<Arc<dyn CaseIndexer>>) {
    info!(
        "Index sync worker started ({} backends)",
        indexers.len()
    );

    while let Some(task) = rx.recv().await {
        process_task(&task, &indexers).await;
        metrics::set_index_queue_size(rx.len());
    }

    info!("Index sync worker stopped");
}

async fn process_task(task: &IndexTask, indexers: &[Arc<dyn CaseIndexer>]) {
    for indexer in indexers {
        let result = match task {
            IndexTask::Upsert(case) => indexer.index_case(case).await,
            IndexTask::Remove { tenant_id, case_id } => {
                indexer.remove_case(tenant_id, case_id).await
            }
        };

        match result {
            Ok(()) => {
                debug!(
                    backend = indexer.name(),
                    case_id = task.case_id(),
                    "Index sync {} done",
                    task.kind()
                );
                metrics::record_index_sync(indexer.name(), true);
            }
            Err(e) => {
                error!(
                    backend = indexer.name(),
                    case_id = task.case_id(),
                    error = %e,
                    "Index sync {} failed",
                    task.kind()
                );
                metrics::record_index_sync(indexer.name(), false);
            }
        }
    }
}
