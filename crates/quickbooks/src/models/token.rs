//! OAuth token model for one QuickBooks company (realm)

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stored OAuth credentials for one account
///
/// The refresh token rotates on every refresh; the previous value stops
/// working as soon as a new pair is issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub realm_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token stops being accepted
    pub expires_at: DateTime<Utc>,
    /// When the refresh token itself expires, if the server said
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Build a stored token from a fresh grant
    ///
    /// Fails if the grant's lifetimes do not fit in a timestamp.
    pub fn from_grant(
        realm_id: impl Into<String>,
        grant: &TokenGrant,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            realm_id: realm_id.into(),
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_at: grant.expires_at(now)?,
            refresh_expires_at: grant.refresh_expires_at(now)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether the access token is inside the refresh buffer (or already expired)
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(buffer)
            .is_none_or(|refresh_at| now >= refresh_at)
    }

    /// Replace the credential pair after a refresh
    pub fn rotated(mut self, grant: &TokenGrant, now: DateTime<Utc>) -> Result<Self> {
        self.access_token = grant.access_token.clone();
        self.refresh_token = grant.refresh_token.clone();
        self.expires_at = grant.expires_at(now)?;
        if let Some(refresh_expires_at) = grant.refresh_expires_at(now)? {
            self.refresh_expires_at = Some(refresh_expires_at);
        }
        self.updated_at = now;
        Ok(self)
    }
}

/// Token pair returned by the token endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Refresh token lifetime in seconds
    #[serde(default, rename = "x_refresh_token_expires_in")]
    pub refresh_expires_in: Option<u64>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        seconds_after(now, self.expires_in).context("Invalid expires_in in token response")
    }

    pub fn refresh_expires_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.refresh_expires_in
            .map(|secs| {
                seconds_after(now, secs)
                    .context("Invalid x_refresh_token_expires_in in token response")
            })
            .transpose()
    }
}

/// `now + secs`, or an error if the result is not a representable timestamp
fn seconds_after(now: DateTime<Utc>, secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .with_context(|| format!("Lifetime of {} seconds is out of range", secs))
}
