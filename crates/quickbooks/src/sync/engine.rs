//! Per-object-type incremental sync
//!
//! One cycle: mark in progress, query everything newer than the cursor,
//! upsert, advance the cursor, record history. Failures are recorded and
//! reported in the returned [`SyncResult`]; they never escape `sync`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use super::cursor;
use crate::intuit::{ApiError, AuthError, EntityQuery, QueryClient};
use crate::models::{EntityRecord, FailureKind, ObjectType, SyncHistoryRecord, SyncOutcome};
use crate::storage::{Database, EntityRepository, SyncHistoryLog, SyncStateStore};

/// Outcome of one `sync` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub object_type: ObjectType,
    /// Records written to local storage
    pub synced: usize,
    /// 0 on success, 1 when the cycle failed
    pub errors: usize,
    /// Another cycle for the same (realm, type) was already running
    pub skipped: bool,
}

impl SyncResult {
    fn completed(object_type: ObjectType, synced: usize) -> Self {
        Self {
            object_type,
            synced,
            errors: 0,
            skipped: false,
        }
    }

    pub(crate) fn failed(object_type: ObjectType) -> Self {
        Self {
            object_type,
            synced: 0,
            errors: 1,
            skipped: false,
        }
    }

    fn skipped(object_type: ObjectType) -> Self {
        Self {
            object_type,
            synced: 0,
            errors: 0,
            skipped: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors == 0 && !self.skipped
    }
}

/// What a successful cycle did, before it is written to history
struct CycleStats {
    fetched: usize,
    synced: usize,
    cursor_after: Option<String>,
}

/// Syncs a single object type for any realm
pub struct ObjectSyncEngine {
    object_type: ObjectType,
    client: Arc<dyn QueryClient>,
    repository: EntityRepository,
    states: SyncStateStore,
    history: SyncHistoryLog,
    max_results: usize,
    /// Realms with a cycle currently running on this engine
    in_flight: Mutex<HashSet<String>>,
}

impl ObjectSyncEngine {
    pub fn new(
        object_type: ObjectType,
        client: Arc<dyn QueryClient>,
        db: Database,
        max_results: usize,
    ) -> Self {
        Self {
            object_type,
            client,
            repository: EntityRepository::new(db.clone(), object_type),
            states: SyncStateStore::new(db.clone()),
            history: SyncHistoryLog::new(db),
            max_results,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Run one incremental cycle for `realm_id`
    ///
    /// Never returns an error. A failed cycle leaves the cursor untouched,
    /// sets the state to `failure`, and appends a failure history row.
    pub fn sync(&self, realm_id: &str) -> SyncResult {
        let Some(_guard) = self.try_begin(realm_id) else {
            warn!(
                "{} sync already running for realm {}, skipping",
                self.object_type.remote_name(),
                realm_id
            );
            return SyncResult::skipped(self.object_type);
        };

        let started_at = Utc::now();
        let timer = Instant::now();
        let mut cursor_before = None;

        match self.run_cycle(realm_id, &mut cursor_before) {
            Ok(stats) => {
                info!(
                    "{} sync complete for realm {}: {} fetched, {} stored, cursor {} -> {}",
                    self.object_type.remote_name(),
                    realm_id,
                    stats.fetched,
                    stats.synced,
                    cursor_before.as_deref().unwrap_or("(none)"),
                    stats.cursor_after.as_deref().unwrap_or("(none)"),
                );
                let synced = stats.synced;
                self.record_history(SyncHistoryRecord {
                    id: None,
                    realm_id: realm_id.to_string(),
                    object_type: self.object_type,
                    started_at,
                    finished_at: Utc::now(),
                    duration_ms: timer.elapsed().as_millis() as u64,
                    outcome: SyncOutcome::Success,
                    records_fetched: stats.fetched,
                    records_synced: stats.synced,
                    cursor_before,
                    cursor_after: stats.cursor_after,
                    error_message: None,
                    failure_kind: None,
                });
                SyncResult::completed(self.object_type, synced)
            }
            Err(e) => {
                self.handle_failure(realm_id, cursor_before, started_at, timer, e);
                SyncResult::failed(self.object_type)
            }
        }
    }

    /// Steps 1-8 of a cycle; any error aborts before the cursor moves
    fn run_cycle(&self, realm_id: &str, cursor_before: &mut Option<String>) -> Result<CycleStats> {
        let object_type = self.object_type;

        // 1. Mark in progress so an interrupted cycle is visible
        self.states
            .mark_in_progress(realm_id, object_type)
            .context("Failed to mark sync in progress")?;

        // 2. Read the cursor
        let state = self
            .states
            .get(realm_id, object_type)
            .context("Failed to read sync state")?;
        *cursor_before = state.cursor.clone();

        // 3. Query everything newer than the cursor
        let query = EntityQuery::new(object_type, state.cursor.as_deref(), self.max_results);
        debug!("Query for realm {}: {}", realm_id, query);
        let payloads = self
            .client
            .query(realm_id, &query)
            .with_context(|| format!("Failed to fetch {} records", object_type.remote_name()))?;

        // 4. Nothing new: success with the cursor unchanged
        if payloads.is_empty() {
            self.states
                .mark_success(realm_id, object_type, state.cursor.as_deref())
                .context("Failed to record sync success")?;
            return Ok(CycleStats {
                fetched: 0,
                synced: 0,
                cursor_after: state.cursor,
            });
        }

        let fetched = payloads.len();
        if fetched >= self.max_results {
            info!(
                "{} page is full ({} records); the rest follows next cycle",
                object_type.remote_name(),
                fetched
            );
        }

        // 5. Map to local records
        let records = payloads
            .into_iter()
            .map(|payload| EntityRecord::from_remote(object_type, realm_id, payload))
            .collect::<Result<Vec<_>>>()?;

        // 6. Upsert in one transaction
        let synced = self
            .repository
            .upsert_batch(&records)
            .with_context(|| format!("Failed to store {} records", object_type.remote_name()))?;

        // 7. New cursor = max(previous, batch)
        let advance = cursor::advance(state.cursor.as_deref(), &records);
        if advance.missing > 0 {
            warn!(
                "{} of {} {} records had no usable LastUpdatedTime; stored without moving the cursor",
                advance.missing,
                fetched,
                object_type.remote_name()
            );
        }

        // 8. Persist the cursor only after the data is durable
        self.states
            .mark_success(realm_id, object_type, advance.cursor.as_deref())
            .context("Failed to record sync success")?;

        Ok(CycleStats {
            fetched,
            synced,
            cursor_after: advance.cursor,
        })
    }

    /// Step 9: record the failure without touching the cursor
    fn handle_failure(
        &self,
        realm_id: &str,
        cursor_before: Option<String>,
        started_at: DateTime<Utc>,
        timer: Instant,
        err: anyhow::Error,
    ) {
        let message = format!("{:#}", err);
        let kind = classify_failure(&err);
        error!(
            "{} sync failed for realm {} ({}): {}",
            self.object_type.remote_name(),
            realm_id,
            kind.as_str(),
            message
        );

        if let Err(e) = self.states.mark_failure(realm_id, self.object_type, &message) {
            error!("Failed to record sync failure state: {:#}", e);
        }

        self.record_history(SyncHistoryRecord {
            id: None,
            realm_id: realm_id.to_string(),
            object_type: self.object_type,
            started_at,
            finished_at: Utc::now(),
            duration_ms: timer.elapsed().as_millis() as u64,
            outcome: SyncOutcome::Failure,
            records_fetched: 0,
            records_synced: 0,
            cursor_after: cursor_before.clone(),
            cursor_before,
            error_message: Some(message),
            failure_kind: Some(kind),
        });
    }

    fn record_history(&self, record: SyncHistoryRecord) {
        if let Err(e) = self.history.append(&record) {
            error!(
                "Failed to append {} sync history: {:#}",
                self.object_type.remote_name(),
                e
            );
        }
    }

    fn try_begin(&self, realm_id: &str) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(realm_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            realm_id: realm_id.to_string(),
        })
    }
}

/// Clears the in-flight marker when a cycle ends, including by panic
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    realm_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.realm_id);
    }
}

/// Map an error chain to a coarse failure kind
pub fn classify_failure(err: &anyhow::Error) -> FailureKind {
    if err.downcast_ref::<AuthError>().is_some() {
        FailureKind::Authorization
    } else if err.downcast_ref::<ApiError>().is_some() {
        FailureKind::Api
    } else if err.downcast_ref::<rusqlite::Error>().is_some() {
        FailureKind::Storage
    } else {
        FailureKind::Other
    }
}
