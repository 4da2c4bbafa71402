//! Append-only audit records of sync cycles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ObjectType;

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failure,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Success => "success",
            SyncOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SyncOutcome::Success),
            "failure" => Ok(SyncOutcome::Failure),
            other => anyhow::bail!("Unknown sync outcome: {}", other),
        }
    }
}

/// Coarse classification of a failed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No token, or the refresh token was rejected. Needs re-authorization.
    Authorization,
    /// Remote API error (rate limit, 5xx, fault, transport)
    Api,
    /// Local database error
    Storage,
    /// Anything else, e.g. a malformed remote record
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Authorization => "authorization",
            FailureKind::Api => "api",
            FailureKind::Storage => "storage",
            FailureKind::Other => "other",
        }
    }
}

impl FromStr for FailureKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization" => Ok(FailureKind::Authorization),
            "api" => Ok(FailureKind::Api),
            "storage" => Ok(FailureKind::Storage),
            "other" => Ok(FailureKind::Other),
            other => anyhow::bail!("Unknown failure kind: {}", other),
        }
    }
}

/// One completed (or failed) sync cycle. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryRecord {
    /// Row id, assigned on append
    pub id: Option<i64>,
    pub realm_id: String,
    pub object_type: ObjectType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: SyncOutcome,
    pub records_fetched: usize,
    pub records_synced: usize,
    pub cursor_before: Option<String>,
    pub cursor_after: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

impl SyncHistoryRecord {
    /// Whether this cycle moved the cursor
    pub fn advanced_cursor(&self) -> bool {
        self.cursor_before != self.cursor_after
    }
}
