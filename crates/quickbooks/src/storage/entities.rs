//! Entity repository for replicated customers and invoices
//!
//! Payloads are stored verbatim as zstd-compressed JSON next to the few
//! envelope fields that are indexed.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Database, conversion_error, parse_timestamp};
use crate::models::{EntityRecord, ObjectType};

/// zstd level 3 is a good balance of speed vs compression for JSON
const COMPRESSION_LEVEL: i32 = 3;

/// Durable keyed table for one object type
#[derive(Clone)]
pub struct EntityRepository {
    db: Database,
    object_type: ObjectType,
}

impl EntityRepository {
    pub fn new(db: Database, object_type: ObjectType) -> Self {
        Self { db, object_type }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Insert or update a batch of records in one transaction
    ///
    /// Idempotent: applying the same batch twice leaves the same rows. On an
    /// id conflict the incoming record wins. Either every record is written
    /// or none is.
    pub fn upsert_batch(&self, records: &[EntityRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        // Compress outside the connection lock
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            anyhow::ensure!(
                record.object_type == self.object_type,
                "Cannot store {} record {} in the {} table",
                record.object_type,
                record.id,
                self.object_type.table()
            );
            let json = serde_json::to_vec(&record.payload)?;
            let compressed = zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
                .context("Failed to compress entity payload")?;
            rows.push((record, compressed));
        }

        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(self.upsert_sql())?;
            for (record, payload) in &rows {
                match self.object_type {
                    ObjectType::Customer => stmt.execute(params![
                        record.id,
                        record.realm_id,
                        record.last_updated_time,
                        payload,
                        record.synced_at.to_rfc3339(),
                    ])?,
                    ObjectType::Invoice => stmt.execute(params![
                        record.id,
                        record.realm_id,
                        record.customer_ref,
                        record.last_updated_time,
                        payload,
                        record.synced_at.to_rfc3339(),
                    ])?,
                };
            }
        }

        tx.commit()
            .with_context(|| format!("Failed to commit {} batch", self.object_type.table()))?;
        Ok(rows.len())
    }

    fn upsert_sql(&self) -> &'static str {
        // ON CONFLICT DO UPDATE keeps the rowid stable, unlike INSERT OR REPLACE
        match self.object_type {
            ObjectType::Customer => {
                "INSERT INTO customers (id, realm_id, last_updated_time, payload, synced_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(realm_id, id) DO UPDATE SET
                    last_updated_time = excluded.last_updated_time,
                    payload = excluded.payload,
                    synced_at = excluded.synced_at"
            }
            ObjectType::Invoice => {
                "INSERT INTO invoices
                 (id, realm_id, customer_ref, last_updated_time, payload, synced_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(realm_id, id) DO UPDATE SET
                    customer_ref = excluded.customer_ref,
                    last_updated_time = excluded.last_updated_time,
                    payload = excluded.payload,
                    synced_at = excluded.synced_at"
            }
        }
    }

    fn select_columns(&self) -> &'static str {
        match self.object_type {
            ObjectType::Customer => {
                "id, realm_id, NULL AS customer_ref, last_updated_time, payload, synced_at"
            }
            ObjectType::Invoice => {
                "id, realm_id, customer_ref, last_updated_time, payload, synced_at"
            }
        }
    }

    /// Point lookup by remote id
    pub fn get(&self, realm_id: &str, id: &str) -> Result<Option<EntityRecord>> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE realm_id = ? AND id = ?",
            self.select_columns(),
            self.object_type.table()
        );
        let record = conn
            .query_row(&sql, params![realm_id, id], |row| self.record_from_row(row))
            .optional()?;
        Ok(record)
    }

    /// Count records for a realm
    pub fn count(&self, realm_id: &str) -> Result<usize> {
        let conn = self.db.conn()?;
        count_rows(&conn, self.object_type, realm_id)
    }

    /// Delete one record. Returns whether it existed.
    pub fn delete(&self, realm_id: &str, id: &str) -> Result<bool> {
        let conn = self.db.conn()?;
        let sql = format!(
            "DELETE FROM {} WHERE realm_id = ? AND id = ?",
            self.object_type.table()
        );
        let deleted = conn.execute(&sql, params![realm_id, id])?;
        Ok(deleted > 0)
    }

    /// List invoices referencing a customer
    pub fn list_for_customer(&self, realm_id: &str, customer_id: &str) -> Result<Vec<EntityRecord>> {
        anyhow::ensure!(
            self.object_type == ObjectType::Invoice,
            "Only invoices reference customers"
        );

        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM invoices
             WHERE realm_id = ? AND customer_ref = ?
             ORDER BY id",
            self.select_columns()
        ))?;
        let records = stmt
            .query_map(params![realm_id, customer_id], |row| self.record_from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn record_from_row(&self, row: &Row<'_>) -> rusqlite::Result<EntityRecord> {
        let compressed: Vec<u8> = row.get(4)?;
        let json = zstd::decode_all(compressed.as_slice()).map_err(|e| conversion_error(4, e))?;
        let payload = serde_json::from_slice(&json).map_err(|e| conversion_error(4, e))?;

        Ok(EntityRecord {
            id: row.get(0)?,
            realm_id: row.get(1)?,
            object_type: self.object_type,
            customer_ref: row.get(2)?,
            last_updated_time: row.get(3)?,
            payload,
            synced_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
        })
    }
}

fn count_rows(conn: &Connection, object_type: ObjectType, realm_id: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE realm_id = ?", object_type.table()),
        [realm_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer(id: &str, name: &str, updated: &str) -> EntityRecord {
        EntityRecord::from_remote(
            ObjectType::Customer,
            "realm-1",
            json!({
                "Id": id,
                "DisplayName": name,
                "MetaData": { "LastUpdatedTime": updated }
            }),
        )
        .unwrap()
    }

    fn invoice(id: &str, customer_id: Option<&str>) -> EntityRecord {
        let mut payload = json!({
            "Id": id,
            "MetaData": { "LastUpdatedTime": "2024-03-01T10:00:00Z" }
        });
        if let Some(customer_id) = customer_id {
            payload["CustomerRef"] = json!({ "value": customer_id });
        }
        EntityRecord::from_remote(ObjectType::Invoice, "realm-1", payload).unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let repo = EntityRepository::new(db, ObjectType::Customer);

        let written = repo
            .upsert_batch(&[
                customer("1", "Amy", "2024-03-01T10:00:00Z"),
                customer("2", "Bill", "2024-03-02T10:00:00Z"),
            ])
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(repo.count("realm-1").unwrap(), 2);

        let amy = repo.get("realm-1", "1").unwrap().unwrap();
        assert_eq!(amy.display_name(), Some("Amy"));
        assert_eq!(amy.last_updated_time.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert!(repo.get("realm-1", "3").unwrap().is_none());
        assert!(repo.get("realm-2", "1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_is_idempotent_and_last_write_wins() {
        let db = Database::open_in_memory().unwrap();
        let repo = EntityRepository::new(db, ObjectType::Customer);

        let batch = vec![customer("1", "Amy", "2024-03-01T10:00:00Z")];
        repo.upsert_batch(&batch).unwrap();
        repo.upsert_batch(&batch).unwrap();
        assert_eq!(repo.count("realm-1").unwrap(), 1);

        repo.upsert_batch(&[customer("1", "Amy Renamed", "2024-03-05T10:00:00Z")])
            .unwrap();
        let amy = repo.get("realm-1", "1").unwrap().unwrap();
        assert_eq!(repo.count("realm-1").unwrap(), 1);
        assert_eq!(amy.display_name(), Some("Amy Renamed"));
        assert_eq!(amy.last_updated_time.as_deref(), Some("2024-03-05T10:00:00Z"));
    }

    #[test]
    fn test_same_id_in_two_realms() {
        let db = Database::open_in_memory().unwrap();
        let repo = EntityRepository::new(db, ObjectType::Customer);

        let record = |realm_id: &str, name: &str| {
            EntityRecord::from_remote(
                ObjectType::Customer,
                realm_id,
                json!({ "Id": "1", "DisplayName": name }),
            )
            .unwrap()
        };
        repo.upsert_batch(&[record("realm-a", "Amy")]).unwrap();
        repo.upsert_batch(&[record("realm-b", "Bill")]).unwrap();

        assert_eq!(repo.count("realm-a").unwrap(), 1);
        assert_eq!(repo.count("realm-b").unwrap(), 1);
        let amy = repo.get("realm-a", "1").unwrap().unwrap();
        assert_eq!(amy.display_name(), Some("Amy"));

        assert!(repo.delete("realm-b", "1").unwrap());
        assert!(repo.get("realm-a", "1").unwrap().is_some());
    }

    #[test]
    fn test_invoice_customer_index() {
        let db = Database::open_in_memory().unwrap();
        let repo = EntityRepository::new(db, ObjectType::Invoice);

        repo.upsert_batch(&[
            invoice("100", Some("1")),
            invoice("101", Some("1")),
            invoice("102", Some("2")),
            invoice("103", None),
        ])
        .unwrap();

        let for_amy = repo.list_for_customer("realm-1", "1").unwrap();
        let ids: Vec<&str> = for_amy.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["100", "101"]);

        let orphan = repo.get("realm-1", "103").unwrap().unwrap();
        assert!(orphan.customer_ref.is_none());
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        let repo = EntityRepository::new(db, ObjectType::Customer);
        repo.upsert_batch(&[customer("1", "Amy", "2024-03-01T10:00:00Z")])
            .unwrap();

        assert!(repo.delete("realm-1", "1").unwrap());
        assert!(!repo.delete("realm-1", "1").unwrap());
        assert_eq!(repo.count("realm-1").unwrap(), 0);
    }

    #[test]
    fn test_rejects_mismatched_object_type() {
        let db = Database::open_in_memory().unwrap();
        let repo = EntityRepository::new(db, ObjectType::Customer);
        assert!(repo.upsert_batch(&[invoice("100", None)]).is_err());
        assert_eq!(repo.count("realm-1").unwrap(), 0);
    }

    #[test]
    fn test_customers_cannot_list_by_customer() {
        let db = Database::open_in_memory().unwrap();
        let repo = EntityRepository::new(db, ObjectType::Customer);
        assert!(repo.list_for_customer("realm-1", "1").is_err());
    }
}
