//! Shared SQLite connection and schema migrations

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- OAuth credentials, one row per company (realm)
            CREATE TABLE tokens (
                realm_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                refresh_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX idx_tokens_updated_at ON tokens(updated_at DESC);

            -- Replicated customers; payload is zstd-compressed JSON.
            -- Remote ids are only unique within one company.
            CREATE TABLE customers (
                realm_id TEXT NOT NULL,
                id TEXT NOT NULL,
                last_updated_time TEXT,
                payload BLOB NOT NULL,
                synced_at TEXT NOT NULL,
                PRIMARY KEY (realm_id, id)
            );

            -- Replicated invoices
            CREATE TABLE invoices (
                realm_id TEXT NOT NULL,
                id TEXT NOT NULL,
                customer_ref TEXT,
                last_updated_time TEXT,
                payload BLOB NOT NULL,
                synced_at TEXT NOT NULL,
                PRIMARY KEY (realm_id, id)
            );

            CREATE INDEX idx_invoices_customer ON invoices(realm_id, customer_ref);

            -- Sync state per (realm, object type)
            CREATE TABLE sync_state (
                realm_id TEXT NOT NULL,
                object_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                cursor TEXT,
                last_sync_attempt TEXT,
                last_sync_success TEXT,
                error_message TEXT,
                PRIMARY KEY (realm_id, object_type)
            );

            -- Append-only ledger of sync cycles
            CREATE TABLE sync_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                realm_id TEXT NOT NULL,
                object_type TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                status TEXT NOT NULL,
                records_fetched INTEGER NOT NULL DEFAULT 0,
                records_synced INTEGER NOT NULL DEFAULT 0,
                cursor_before TEXT,
                cursor_after TEXT,
                error_message TEXT,
                failure_kind TEXT
            );

            CREATE INDEX idx_sync_history_type ON sync_history(realm_id, object_type);
            CREATE INDEX idx_sync_history_started_at ON sync_history(started_at DESC);
            "#,
        ),
    ])
}

/// Handle to the local SQLite database
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file at `db_path` and run migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets the status and history commands read while the worker writes
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        Self::migrate(conn)
    }

    /// Open a private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::migrate(conn)
    }

    fn migrate(mut conn: Connection) -> Result<Self> {
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection for the duration of one store operation
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Run a raw SQL batch (maintenance and test fault injection)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.test.sqlite");

        let db = Database::open(&path).unwrap();
        let tables: i64 = db
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('tokens', 'customers', 'invoices', 'sync_state', 'sync_history')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);

        // Reopening an up-to-date database is a no-op
        drop(db);
        assert!(Database::open(&path).is_ok());
    }

    #[test]
    fn test_initial_schema_is_complete() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);

        // Columns that used to need a follow-up migration
        conn.execute_batch(
            "SELECT refresh_expires_at FROM tokens;
             SELECT failure_kind FROM sync_history;",
        )
        .unwrap();

        // Entity keys are scoped to the company
        let pk_columns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('customers') WHERE pk > 0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(pk_columns, 2);
    }
}
