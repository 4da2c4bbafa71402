//! Access token provider with single-flight refresh
//!
//! Refresh tokens rotate: the moment a refresh succeeds the old refresh
//! token is dead. Two callers refreshing at once would race and one of them
//! would strand the account, so refreshes for a realm are serialized behind
//! a per-realm lock and the stored token is re-read once the lock is held.

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{AuthError, GrantRejected, TokenRefresher};
use crate::storage::TokenStore;

/// Hands out valid access tokens, refreshing and persisting as needed
pub struct TokenManager {
    store: TokenStore,
    refresher: Arc<dyn TokenRefresher>,
    /// Refresh when the access token expires within this window
    buffer: Duration,
    realm_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: TokenStore, refresher: Arc<dyn TokenRefresher>, buffer: Duration) -> Self {
        Self {
            store,
            refresher,
            buffer,
            realm_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Get a usable access token for a realm
    ///
    /// If the stored token is inside the refresh buffer, exactly one caller
    /// refreshes it; concurrent callers wait and then read the rotated pair.
    /// The rotated pair is persisted before its access token is returned.
    ///
    /// # Errors
    /// `AuthError::AuthorizationRequired` when no token is stored,
    /// `AuthError::RefreshFailed` when the refresh grant is rejected.
    pub fn access_token(&self, realm_id: &str) -> Result<String> {
        let lock = self.realm_lock(realm_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| anyhow!("Token lock poisoned for realm {}", realm_id))?;

        // Re-read under the lock: a caller that waited sees the rotated pair
        let token = self
            .store
            .get(realm_id)?
            .ok_or_else(|| AuthError::AuthorizationRequired {
                realm_id: realm_id.to_string(),
            })?;

        if !token.needs_refresh(Utc::now(), self.buffer) {
            debug!("Access token for realm {} valid until {}", realm_id, token.expires_at);
            return Ok(token.access_token);
        }

        info!(
            "Refreshing access token for realm {} (expires {})",
            realm_id, token.expires_at
        );

        // Only a rejected grant needs re-authorization; anything else is
        // passed through so the next cycle retries it
        let grant = self.refresher.refresh(&token.refresh_token).map_err(|e| {
            warn!("Token refresh failed for realm {}: {:#}", realm_id, e);
            if e.downcast_ref::<GrantRejected>().is_some() {
                AuthError::RefreshFailed {
                    realm_id: realm_id.to_string(),
                    message: format!("{:#}", e),
                }
                .into()
            } else {
                e.context(format!("Token refresh for realm {} failed", realm_id))
            }
        })?;

        // The old refresh token is already invalid server-side
        let rotated = self
            .store
            .update_tokens(realm_id, &grant, Utc::now())
            .with_context(|| {
                format!(
                    "Refreshed token for realm {} could not be persisted; re-authorization may be required",
                    realm_id
                )
            })?;

        info!(
            "Access token for realm {} refreshed, valid until {}",
            realm_id, rotated.expires_at
        );
        Ok(rotated.access_token)
    }

    fn realm_lock(&self, realm_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .realm_locks
            .lock()
            .map_err(|_| anyhow!("Token lock table poisoned"))?;
        Ok(locks.entry(realm_id.to_string()).or_default().clone())
    }
}
