//! Periodic driver for the per-type engines
//!
//! Each cycle resolves the authorized realm, runs every engine on its own
//! thread, and waits for all of them. One engine failing or panicking has
//! no effect on the others.

use anyhow::Result;
use log::{error, info, warn};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::{ObjectSyncEngine, SyncResult};
use crate::models::SyncState;
use crate::storage::{SyncStateStore, TokenStore};

/// Cooperative stop flag shared between the scheduler and its owner
///
/// Cloning yields a handle to the same flag.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake any waiter
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`; returns true if shutdown was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Summary of one scheduler cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Realm that was synced; `None` when no account is authorized
    pub realm_id: Option<String>,
    pub results: Vec<SyncResult>,
    /// Stored sync state per object type after the cycle
    pub states: Vec<SyncState>,
    pub duration: Duration,
}

impl CycleReport {
    fn idle(duration: Duration) -> Self {
        Self {
            realm_id: None,
            results: Vec::new(),
            states: Vec::new(),
            duration,
        }
    }

    pub fn total_synced(&self) -> usize {
        self.results.iter().map(|r| r.synced).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.results.iter().map(|r| r.errors).sum()
    }
}

pub struct Scheduler {
    engines: Vec<Arc<ObjectSyncEngine>>,
    tokens: TokenStore,
    states: SyncStateStore,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        engines: Vec<Arc<ObjectSyncEngine>>,
        tokens: TokenStore,
        states: SyncStateStore,
        interval: Duration,
    ) -> Self {
        Self {
            engines,
            tokens,
            states,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run all engines once against the most recently authorized realm
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let start = Instant::now();

        let Some(token) = self.tokens.most_recent()? else {
            warn!("No authorized QuickBooks company; run `tally authorize` first");
            return Ok(CycleReport::idle(start.elapsed()));
        };
        let realm_id = token.realm_id;

        info!(
            "Starting sync cycle for realm {} ({} object types)",
            realm_id,
            self.engines.len()
        );

        let results: Vec<SyncResult> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .engines
                .iter()
                .map(|engine| {
                    let realm_id = realm_id.as_str();
                    (engine.object_type(), scope.spawn(move || engine.sync(realm_id)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(object_type, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!("{} sync panicked", object_type.remote_name());
                        SyncResult::failed(object_type)
                    })
                })
                .collect()
        });

        let states = self.states.list(&realm_id)?;
        let report = CycleReport {
            realm_id: Some(realm_id),
            results,
            states,
            duration: start.elapsed(),
        };

        info!(
            "Sync cycle finished in {}ms: {} records synced, {} errors",
            report.duration.as_millis(),
            report.total_synced(),
            report.total_errors()
        );
        for state in &report.states {
            info!(
                "  {}: {} (cursor: {})",
                state.object_type.remote_name(),
                state.status,
                state.cursor.as_deref().unwrap_or("none")
            );
            if let Some(message) = &state.error_message {
                warn!("  {} error: {}", state.object_type.remote_name(), message);
            }
        }

        Ok(report)
    }

    /// Run a cycle now, then one per interval until `shutdown` fires
    ///
    /// Cycles start on a fixed cadence: the wait after a cycle is the
    /// interval minus however long the cycle took. A cycle in progress is
    /// allowed to finish; the signal is checked between cycles and while
    /// waiting.
    pub fn run(&self, shutdown: &ShutdownSignal) {
        self.report_interrupted();
        info!(
            "Scheduler started; syncing every {}s",
            self.interval.as_secs()
        );

        while !shutdown.is_triggered() {
            let started = Instant::now();
            if let Err(e) = self.run_cycle() {
                error!("Sync cycle failed: {:#}", e);
            }
            let wait = wait_before_next_cycle(self.interval, started.elapsed());
            if wait.is_zero() {
                warn!(
                    "Sync cycle took longer than the {}s interval; starting the next one now",
                    self.interval.as_secs()
                );
            }
            if shutdown.wait_timeout(wait) {
                break;
            }
        }

        info!("Scheduler stopped");
    }

    /// Warn about rows left `in_progress` by a process that died mid-cycle
    fn report_interrupted(&self) {
        let realm_id = match self.tokens.most_recent() {
            Ok(Some(token)) => token.realm_id,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not read stored tokens: {:#}", e);
                return;
            }
        };
        match self.states.list(&realm_id) {
            Ok(states) => {
                for state in states.iter().filter(|s| s.looks_interrupted()) {
                    warn!(
                        "{} sync for realm {} was interrupted; it will restart from cursor {}",
                        state.object_type.remote_name(),
                        realm_id,
                        state.cursor.as_deref().unwrap_or("none")
                    );
                }
            }
            Err(e) => warn!("Could not read sync state: {:#}", e),
        }
    }
}

/// Time left in the current interval after a cycle that took `elapsed`
fn wait_before_next_cycle(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
