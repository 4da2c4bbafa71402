//! QuickBooks crate - incremental replication of QuickBooks Online data
//!
//! This crate provides:
//! - Domain models (EntityRecord, SyncState, SyncHistoryRecord, Token)
//! - Intuit OAuth2 authorization and single-flight token refresh
//! - Query client for entity collections
//! - SQLite storage for tokens, entities, and sync bookkeeping
//! - Cursor-based sync engine and a periodic scheduler
//!
//! Everything here is synchronous; callers on an async runtime should run
//! the scheduler on a blocking thread.

pub mod config;
pub mod intuit;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::{Environment, IntuitCredentials, Settings};
pub use intuit::{
    ApiError, AuthError, EntityQuery, OAuthClient, QueryClient, QuickBooksClient, TokenManager,
    TokenRefresher,
};
pub use models::{
    EntityRecord, FailureKind, ObjectType, SyncHistoryRecord, SyncOutcome, SyncState, SyncStatus,
    Token, TokenGrant,
};
pub use storage::{Database, EntityRepository, SyncHistoryLog, SyncStateStore, TokenStore};
pub use sync::{
    CycleReport, ObjectSyncEngine, Scheduler, ShutdownSignal, SyncResult, build_engines,
};
