//! Publish-time synchronisation of cases into the retrieval backends.

mod sync;

pub use sync::{IndexSyncer, IndexTask, QUEUE_CAPACITY};
