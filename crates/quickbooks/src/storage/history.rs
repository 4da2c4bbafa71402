//! Append-only sync history ledger
//!
//! Audit trail only; nothing reads it for control flow.

use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, parse_column, parse_timestamp};
use crate::models::{ObjectType, SyncHistoryRecord};

const HISTORY_COLUMNS: &str = "id, realm_id, object_type, started_at, finished_at, duration_ms,
                               status, records_fetched, records_synced, cursor_before,
                               cursor_after, error_message, failure_kind";

#[derive(Clone)]
pub struct SyncHistoryLog {
    db: Database,
}

impl SyncHistoryLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one record and return its row id
    pub fn append(&self, record: &SyncHistoryRecord) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO sync_history
             (realm_id, object_type, started_at, finished_at, duration_ms, status,
              records_fetched, records_synced, cursor_before, cursor_after,
              error_message, failure_kind)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.realm_id,
                record.object_type.as_str(),
                record.started_at.to_rfc3339(),
                record.finished_at.to_rfc3339(),
                record.duration_ms as i64,
                record.outcome.as_str(),
                record.records_fetched as i64,
                record.records_synced as i64,
                record.cursor_before,
                record.cursor_after,
                record.error_message,
                record.failure_kind.map(|k| k.as_str()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent records for a realm, newest first, optionally for one type
    pub fn recent(
        &self,
        realm_id: &str,
        object_type: Option<ObjectType>,
        limit: usize,
    ) -> Result<Vec<SyncHistoryRecord>> {
        let conn = self.db.conn()?;
        let records = match object_type {
            Some(object_type) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {HISTORY_COLUMNS} FROM sync_history
                     WHERE realm_id = ? AND object_type = ?
                     ORDER BY id DESC
                     LIMIT ?"
                ))?;
                let rows = stmt
                    .query_map(
                        params![realm_id, object_type.as_str(), limit as i64],
                        record_from_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {HISTORY_COLUMNS} FROM sync_history
                     WHERE realm_id = ?
                     ORDER BY id DESC
                     LIMIT ?"
                ))?;
                let rows = stmt
                    .query_map(params![realm_id, limit as i64], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(records)
    }

    /// The newest record for one (realm, type)
    pub fn latest(
        &self,
        realm_id: &str,
        object_type: ObjectType,
    ) -> Result<Option<SyncHistoryRecord>> {
        let conn = self.db.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM sync_history
                     WHERE realm_id = ? AND object_type = ?
                     ORDER BY id DESC
                     LIMIT 1"
                ),
                params![realm_id, object_type.as_str()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Number of recorded cycles for one (realm, type)
    pub fn count(&self, realm_id: &str, object_type: ObjectType) -> Result<usize> {
        let conn = self.db.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_history WHERE realm_id = ? AND object_type = ?",
            params![realm_id, object_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SyncHistoryRecord> {
    let failure_kind: Option<String> = row.get(12)?;
    Ok(SyncHistoryRecord {
        id: Some(row.get(0)?),
        realm_id: row.get(1)?,
        object_type: parse_column(2, &row.get::<_, String>(2)?)?,
        started_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
        finished_at: parse_timestamp(4, &row.get::<_, String>(4)?)?,
        duration_ms: row.get::<_, i64>(5)? as u64,
        outcome: parse_column(6, &row.get::<_, String>(6)?)?,
        records_fetched: row.get::<_, i64>(7)? as usize,
        records_synced: row.get::<_, i64>(8)? as usize,
        cursor_before: row.get(9)?,
        cursor_after: row.get(10)?,
        error_message: row.get(11)?,
        failure_kind: failure_kind
            .map(|k| parse_column(12, &k))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, SyncOutcome};
    use chrono::Utc;

    fn make_record(object_type: ObjectType, outcome: SyncOutcome, synced: usize) -> SyncHistoryRecord {
        let now = Utc::now();
        SyncHistoryRecord {
            id: None,
            realm_id: "realm-1".to_string(),
            object_type,
            started_at: now,
            finished_at: now,
            duration_ms: 12,
            outcome,
            records_fetched: synced,
            records_synced: synced,
            cursor_before: None,
            cursor_after: Some("2024-03-01T10:00:00Z".to_string()),
            error_message: None,
            failure_kind: None,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let log = SyncHistoryLog::new(Database::open_in_memory().unwrap());

        let id = log
            .append(&make_record(ObjectType::Customer, SyncOutcome::Success, 3))
            .unwrap();
        let latest = log.latest("realm-1", ObjectType::Customer).unwrap().unwrap();

        assert_eq!(latest.id, Some(id));
        assert_eq!(latest.records_synced, 3);
        assert_eq!(latest.outcome, SyncOutcome::Success);
        assert!(latest.advanced_cursor());
        assert!(log.latest("realm-1", ObjectType::Invoice).unwrap().is_none());
    }

    #[test]
    fn test_failure_fields_round_trip() {
        let log = SyncHistoryLog::new(Database::open_in_memory().unwrap());

        let mut record = make_record(ObjectType::Invoice, SyncOutcome::Failure, 0);
        record.cursor_before = Some("t3".to_string());
        record.cursor_after = Some("t3".to_string());
        record.error_message = Some("HTTP 503".to_string());
        record.failure_kind = Some(FailureKind::Api);
        log.append(&record).unwrap();

        let latest = log.latest("realm-1", ObjectType::Invoice).unwrap().unwrap();
        assert_eq!(latest.failure_kind, Some(FailureKind::Api));
        assert_eq!(latest.error_message.as_deref(), Some("HTTP 503"));
        assert!(!latest.advanced_cursor());
    }

    #[test]
    fn test_recent_filters_and_orders() {
        let log = SyncHistoryLog::new(Database::open_in_memory().unwrap());

        for synced in 1..=3 {
            log.append(&make_record(ObjectType::Customer, SyncOutcome::Success, synced))
                .unwrap();
        }
        log.append(&make_record(ObjectType::Invoice, SyncOutcome::Success, 9))
            .unwrap();

        let all = log.recent("realm-1", None, 10).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].object_type, ObjectType::Invoice);

        let customers = log.recent("realm-1", Some(ObjectType::Customer), 2).unwrap();
        let synced: Vec<usize> = customers.iter().map(|r| r.records_synced).collect();
        assert_eq!(synced, vec![3, 2]);

        assert_eq!(log.count("realm-1", ObjectType::Customer).unwrap(), 3);
        assert!(log.recent("realm-2", None, 10).unwrap().is_empty());
    }
}
