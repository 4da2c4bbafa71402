//! Sync state store: one row per (realm, object type)
//!
//! Writes are upserts keyed on the pair. Writers for different object types
//! never touch the same row; non-overlap for the same pair is enforced by the
//! engine, not here.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, parse_column, parse_optional_timestamp};
use crate::models::{ObjectType, SyncState, SyncStatus};

const STATE_COLUMNS: &str = "realm_id, object_type, status, cursor, last_sync_attempt,
                             last_sync_success, error_message";

#[derive(Clone)]
pub struct SyncStateStore {
    db: Database,
}

impl SyncStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Current state, or the pending projection if no row exists yet
    pub fn get(&self, realm_id: &str, object_type: ObjectType) -> Result<SyncState> {
        let conn = self.db.conn()?;
        let state = conn
            .query_row(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM sync_state
                     WHERE realm_id = ? AND object_type = ?"
                ),
                params![realm_id, object_type.as_str()],
                state_from_row,
            )
            .optional()?;
        Ok(state.unwrap_or_else(|| SyncState::pending(realm_id, object_type)))
    }

    /// Start of a cycle: status = in_progress, stamp the attempt time
    ///
    /// Creates the row on first use. Called before any remote request so a
    /// crash mid-cycle leaves the row visibly `in_progress`.
    pub fn mark_in_progress(&self, realm_id: &str, object_type: ObjectType) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO sync_state (realm_id, object_type, status, last_sync_attempt)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(realm_id, object_type) DO UPDATE SET
                status = excluded.status,
                last_sync_attempt = excluded.last_sync_attempt,
                error_message = NULL",
            params![
                realm_id,
                object_type.as_str(),
                SyncStatus::InProgress.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Successful cycle: store the given cursor and clear any error
    pub fn mark_success(
        &self,
        realm_id: &str,
        object_type: ObjectType,
        cursor: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sync_state
             (realm_id, object_type, status, cursor, last_sync_attempt, last_sync_success)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(realm_id, object_type) DO UPDATE SET
                status = excluded.status,
                cursor = excluded.cursor,
                last_sync_success = excluded.last_sync_success,
                error_message = NULL",
            params![
                realm_id,
                object_type.as_str(),
                SyncStatus::Success.as_str(),
                cursor,
                now,
                now,
            ],
        )?;
        Ok(())
    }

    /// Failed cycle: record the message; cursor and last success stay as-is
    pub fn mark_failure(&self, realm_id: &str, object_type: ObjectType, message: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO sync_state (realm_id, object_type, status, last_sync_attempt, error_message)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(realm_id, object_type) DO UPDATE SET
                status = excluded.status,
                error_message = excluded.error_message",
            params![
                realm_id,
                object_type.as_str(),
                SyncStatus::Failure.as_str(),
                Utc::now().to_rfc3339(),
                message,
            ],
        )?;
        Ok(())
    }

    /// Force a full resync: clear cursor and error, back to pending
    pub fn reset(&self, realm_id: &str, object_type: ObjectType) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO sync_state (realm_id, object_type, status)
             VALUES (?, ?, ?)
             ON CONFLICT(realm_id, object_type) DO UPDATE SET
                status = excluded.status,
                cursor = NULL,
                error_message = NULL",
            params![realm_id, object_type.as_str(), SyncStatus::Pending.as_str()],
        )?;
        Ok(())
    }

    /// All stored rows for a realm, ordered by object type
    pub fn list(&self, realm_id: &str) -> Result<Vec<SyncState>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATE_COLUMNS} FROM sync_state
             WHERE realm_id = ?
             ORDER BY object_type"
        ))?;
        let states = stmt
            .query_map([realm_id], state_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(states)
    }
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<SyncState> {
    Ok(SyncState {
        realm_id: row.get(0)?,
        object_type: parse_column(1, &row.get::<_, String>(1)?)?,
        status: parse_column(2, &row.get::<_, String>(2)?)?,
        cursor: row.get(3)?,
        last_sync_attempt: parse_optional_timestamp(4, row.get(4)?)?,
        last_sync_success: parse_optional_timestamp(5, row.get(5)?)?,
        error_message: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SyncStateStore {
        SyncStateStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_missing_row_reads_as_pending() {
        let store = create_test_store();
        let state = store.get("realm-1", ObjectType::Customer).unwrap();
        assert_eq!(state, SyncState::pending("realm-1", ObjectType::Customer));
        assert!(store.list("realm-1").unwrap().is_empty());
    }

    #[test]
    fn test_lifecycle() {
        let store = create_test_store();
        let t = ObjectType::Customer;

        store.mark_in_progress("realm-1", t).unwrap();
        let state = store.get("realm-1", t).unwrap();
        assert_eq!(state.status, SyncStatus::InProgress);
        assert!(state.last_sync_attempt.is_some());
        assert!(state.last_sync_success.is_none());

        store
            .mark_success("realm-1", t, Some("2024-03-01T10:00:00Z"))
            .unwrap();
        let state = store.get("realm-1", t).unwrap();
        assert_eq!(state.status, SyncStatus::Success);
        assert_eq!(state.cursor.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert!(state.last_sync_success.is_some());
    }

    #[test]
    fn test_failure_preserves_cursor_and_last_success() {
        let store = create_test_store();
        let t = ObjectType::Invoice;

        store.mark_in_progress("realm-1", t).unwrap();
        store
            .mark_success("realm-1", t, Some("2024-03-01T10:00:00Z"))
            .unwrap();
        let success_at = store.get("realm-1", t).unwrap().last_sync_success;

        store.mark_in_progress("realm-1", t).unwrap();
        store.mark_failure("realm-1", t, "HTTP 503").unwrap();

        let state = store.get("realm-1", t).unwrap();
        assert_eq!(state.status, SyncStatus::Failure);
        assert_eq!(state.cursor.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert_eq!(state.error_message.as_deref(), Some("HTTP 503"));
        assert_eq!(state.last_sync_success, success_at);
    }

    #[test]
    fn test_success_clears_error() {
        let store = create_test_store();
        let t = ObjectType::Customer;

        store.mark_failure("realm-1", t, "boom").unwrap();
        store.mark_in_progress("realm-1", t).unwrap();
        store.mark_success("realm-1", t, None).unwrap();

        let state = store.get("realm-1", t).unwrap();
        assert_eq!(state.status, SyncStatus::Success);
        assert!(state.error_message.is_none());
        assert!(state.cursor.is_none());
    }

    #[test]
    fn test_reset_forces_full_resync() {
        let store = create_test_store();
        let t = ObjectType::Customer;

        store
            .mark_success("realm-1", t, Some("2024-03-01T10:00:00Z"))
            .unwrap();
        store.reset("realm-1", t).unwrap();

        let state = store.get("realm-1", t).unwrap();
        assert_eq!(state.status, SyncStatus::Pending);
        assert!(state.cursor.is_none());
        assert!(state.error_message.is_none());
    }

    #[test]
    fn test_rows_are_per_type_and_realm() {
        let store = create_test_store();

        store
            .mark_success("realm-1", ObjectType::Customer, Some("c"))
            .unwrap();
        store.mark_failure("realm-1", ObjectType::Invoice, "x").unwrap();
        store
            .mark_success("realm-2", ObjectType::Customer, Some("other"))
            .unwrap();

        let states = store.list("realm-1").unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].object_type, ObjectType::Customer);
        assert_eq!(states[0].cursor.as_deref(), Some("c"));
        assert_eq!(states[1].status, SyncStatus::Failure);

        // Repeated writes never create a second row for the pair
        store.mark_in_progress("realm-1", ObjectType::Customer).unwrap();
        store.mark_in_progress("realm-1", ObjectType::Customer).unwrap();
        assert_eq!(store.list("realm-1").unwrap().len(), 2);
    }
}
