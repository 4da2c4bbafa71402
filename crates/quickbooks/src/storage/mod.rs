//! SQLite storage for tokens, replicated entities, and sync bookkeeping
//!
//! Every store is built from an explicit [`Database`] handle. Stores that
//! share a handle share one connection, so concurrent writers are serialized
//! by the connection lock.

mod database;
mod entities;
mod history;
mod sync_state;
mod tokens;

pub use database::Database;
pub use entities::EntityRepository;
pub use history::SyncHistoryLog;
pub use sync_state::SyncStateStore;
pub use tokens::TokenStore;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

/// Parse an RFC 3339 column value written by this crate
fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn parse_optional_timestamp(
    column: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

/// Parse a text column through `FromStr`
fn parse_column<T>(column: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    value.parse::<T>().map_err(|e| conversion_error(column, e))
}

fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}
