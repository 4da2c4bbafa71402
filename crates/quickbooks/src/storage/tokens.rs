//! Durable OAuth token storage, one row per realm

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, parse_optional_timestamp, parse_timestamp};
use crate::models::{Token, TokenGrant};

const TOKEN_COLUMNS: &str = "realm_id, access_token, refresh_token, expires_at,
                             refresh_expires_at, created_at, updated_at";

/// Token store shared by the API client (read + rotate) and the
/// authorization bootstrap (initial write)
#[derive(Clone)]
pub struct TokenStore {
    db: Database,
}

impl TokenStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get the token for a realm
    pub fn get(&self, realm_id: &str) -> Result<Option<Token>> {
        let conn = self.db.conn()?;
        let token = conn
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE realm_id = ?"),
                [realm_id],
                token_from_row,
            )
            .optional()?;
        Ok(token)
    }

    /// Insert or replace the token for a realm
    pub fn save(&self, token: &Token) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO tokens
             (realm_id, access_token, refresh_token, expires_at, refresh_expires_at,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(realm_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                refresh_expires_at = excluded.refresh_expires_at,
                updated_at = excluded.updated_at",
            params![
                token.realm_id,
                token.access_token,
                token.refresh_token,
                token.expires_at.to_rfc3339(),
                token.refresh_expires_at.map(|t| t.to_rfc3339()),
                token.created_at.to_rfc3339(),
                token.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to save token")?;
        Ok(())
    }

    /// Persist a rotated token pair for an existing realm
    ///
    /// Returns the updated token. Fails if the realm has no stored token,
    /// e.g. because it was logged out while the refresh was in flight.
    pub fn update_tokens(
        &self,
        realm_id: &str,
        grant: &TokenGrant,
        now: DateTime<Utc>,
    ) -> Result<Token> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE realm_id = ?"),
                [realm_id],
                token_from_row,
            )
            .optional()?
            .with_context(|| format!("No stored token for realm {}", realm_id))?;

        let rotated = current.rotated(grant, now)?;

        tx.execute(
            "UPDATE tokens SET
                access_token = ?,
                refresh_token = ?,
                expires_at = ?,
                refresh_expires_at = ?,
                updated_at = ?
             WHERE realm_id = ?",
            params![
                rotated.access_token,
                rotated.refresh_token,
                rotated.expires_at.to_rfc3339(),
                rotated.refresh_expires_at.map(|t| t.to_rfc3339()),
                rotated.updated_at.to_rfc3339(),
                realm_id,
            ],
        )?;

        tx.commit().context("Failed to persist rotated token")?;
        Ok(rotated)
    }

    /// Delete the token for a realm. Returns whether a row existed.
    pub fn delete(&self, realm_id: &str) -> Result<bool> {
        let conn = self.db.conn()?;
        let deleted = conn.execute("DELETE FROM tokens WHERE realm_id = ?", [realm_id])?;
        Ok(deleted > 0)
    }

    /// The most recently updated token, i.e. the account the worker syncs
    pub fn most_recent(&self) -> Result<Option<Token>> {
        let conn = self.db.conn()?;
        let token = conn
            .query_row(
                &format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens
                     ORDER BY updated_at DESC, rowid DESC
                     LIMIT 1"
                ),
                [],
                token_from_row,
            )
            .optional()?;
        Ok(token)
    }

    /// List all stored tokens, most recently updated first
    pub fn list(&self) -> Result<Vec<Token>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY updated_at DESC, rowid DESC"
        ))?;
        let tokens = stmt
            .query_map([], token_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        realm_id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        expires_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
        refresh_expires_at: parse_optional_timestamp(4, row.get(4)?)?,
        created_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
        updated_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_grant(access: &str, refresh: &str) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_in: 3600,
            refresh_expires_in: None,
        }
    }

    fn create_test_store() -> TokenStore {
        TokenStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_token_crud() {
        let store = create_test_store();
        assert!(store.get("realm-1").unwrap().is_none());

        let token = Token::from_grant("realm-1", &make_grant("a1", "r1"), Utc::now()).unwrap();
        store.save(&token).unwrap();

        let loaded = store.get("realm-1").unwrap().unwrap();
        assert_eq!(loaded.access_token, "a1");
        assert_eq!(loaded.refresh_token, "r1");

        assert!(store.delete("realm-1").unwrap());
        assert!(!store.delete("realm-1").unwrap());
        assert!(store.get("realm-1").unwrap().is_none());
    }

    #[test]
    fn test_update_tokens_rotates_pair() {
        let store = create_test_store();
        let now = Utc::now();
        store
            .save(&Token::from_grant("realm-1", &make_grant("a1", "r1"), now).unwrap())
            .unwrap();

        let later = now + Duration::minutes(55);
        let rotated = store
            .update_tokens("realm-1", &make_grant("a2", "r2"), later)
            .unwrap();
        assert_eq!(rotated.refresh_token, "r2");

        let loaded = store.get("realm-1").unwrap().unwrap();
        assert_eq!(loaded.access_token, "a2");
        assert_eq!(loaded.refresh_token, "r2");
        assert_eq!(loaded.created_at.timestamp(), now.timestamp());
    }

    #[test]
    fn test_update_tokens_requires_existing_row() {
        let store = create_test_store();
        let result = store.update_tokens("missing", &make_grant("a", "r"), Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_most_recent_picks_latest_update() {
        let store = create_test_store();
        let now = Utc::now();
        store
            .save(
                &Token::from_grant("realm-old", &make_grant("a", "r"), now - Duration::days(1))
                    .unwrap(),
            )
            .unwrap();
        store
            .save(&Token::from_grant("realm-new", &make_grant("b", "s"), now).unwrap())
            .unwrap();

        assert_eq!(store.most_recent().unwrap().unwrap().realm_id, "realm-new");

        // Rotating the older realm's token makes it the most recent
        store
            .update_tokens("realm-old", &make_grant("a2", "r2"), now + Duration::seconds(1))
            .unwrap();
        assert_eq!(store.most_recent().unwrap().unwrap().realm_id, "realm-old");
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
