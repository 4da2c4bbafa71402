//! Incremental sync of QuickBooks entities into local storage
//!
//! Cycles are idempotent: re-running one re-upserts the same records and
//! leaves the cursor where it was.

pub mod cursor;
mod engine;
mod scheduler;

pub use engine::{ObjectSyncEngine, SyncResult, classify_failure};
pub use scheduler::{CycleReport, Scheduler, ShutdownSignal};

use std::sync::Arc;

use crate::intuit::QueryClient;
use crate::models::ObjectType;
use crate::storage::Database;

/// One engine per object type, all sharing a client and database
pub fn build_engines(
    object_types: &[ObjectType],
    client: Arc<dyn QueryClient>,
    db: &Database,
    max_results: usize,
) -> Vec<Arc<ObjectSyncEngine>> {
    object_types
        .iter()
        .map(|&object_type| {
            Arc::new(ObjectSyncEngine::new(
                object_type,
                Arc::clone(&client),
                db.clone(),
                max_results,
            ))
        })
        .collect()
}
