//! QuickBooks Online API HTTP client
//!
//! Provides query and point-read access to entity collections. Uses
//! synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::api::QueryEnvelope;
use super::{ApiError, TokenManager};
use crate::config::Environment;
use crate::models::ObjectType;

/// Runs entity queries against the remote source
///
/// The sync engine only needs this one operation; tests substitute a fake.
pub trait QueryClient: Send + Sync {
    /// Execute a query and return the raw entity payloads
    fn query(&self, realm_id: &str, query: &EntityQuery) -> Result<Vec<Value>>;
}

/// One page of an entity collection, optionally newer than a cursor
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    pub object_type: ObjectType,
    /// Only records with `LastUpdatedTime` strictly after this
    pub since: Option<String>,
    pub max_results: usize,
}

impl EntityQuery {
    pub fn new(object_type: ObjectType, since: Option<&str>, max_results: usize) -> Self {
        Self {
            object_type,
            since: since.map(str::to_string),
            max_results,
        }
    }
}

impl fmt::Display for EntityQuery {
    /// Renders the query language string, e.g.
    /// `SELECT * FROM Customer WHERE Metadata.LastUpdatedTime > '2024-03-01T10:00:00-08:00'
    ///  ORDERBY Metadata.LastUpdatedTime MAXRESULTS 1000`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.object_type.remote_name())?;
        if let Some(since) = &self.since {
            write!(
                f,
                " WHERE Metadata.LastUpdatedTime > '{}'",
                since.replace('\'', "\\'")
            )?;
        }
        // Ascending order makes a truncated page a prefix of the remaining set
        write!(
            f,
            " ORDERBY Metadata.LastUpdatedTime MAXRESULTS {}",
            self.max_results
        )
    }
}

/// Authenticated client for the QuickBooks Online accounting API
pub struct QuickBooksClient {
    tokens: Arc<TokenManager>,
    base_url: String,
    minor_version: u32,
    agent: ureq::Agent,
}

impl QuickBooksClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `tokens` - Access token provider (refreshes transparently)
    /// * `environment` - Sandbox or production API host
    /// * `minor_version` - API minor version sent with every request
    pub fn new(tokens: Arc<TokenManager>, environment: Environment, minor_version: u32) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(60)))
            .build()
            .into();

        Self {
            tokens,
            base_url: environment.api_base_url().to_string(),
            minor_version,
            agent,
        }
    }

    /// Fetch a single entity by its remote id
    ///
    /// Returns `None` when the remote has no such entity.
    pub fn fetch_by_id(
        &self,
        realm_id: &str,
        object_type: ObjectType,
        id: &str,
    ) -> Result<Option<Value>> {
        let url = format!(
            "{}/v3/company/{}/{}/{}?minorversion={}",
            self.base_url,
            urlencoding::encode(realm_id),
            object_type.path_segment(),
            urlencoding::encode(id),
            self.minor_version
        );

        let Some(mut body) = self.get_json(realm_id, &url, true)? else {
            return Ok(None);
        };

        let entity = body
            .get_mut(object_type.remote_name())
            .map(Value::take)
            .with_context(|| format!("Response has no {} object", object_type.remote_name()))?;
        Ok(Some(entity))
    }

    /// GET a JSON resource with a fresh bearer token
    ///
    /// With `allow_missing`, HTTP 404 yields `None` instead of an error.
    fn get_json(&self, realm_id: &str, url: &str, allow_missing: bool) -> Result<Option<Value>> {
        let access_token = self.tokens.access_token(realm_id)?;

        let mut response = self
            .agent
            .get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .header("Accept", "application/json")
            .call()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200 => {
                let body: Value = response
                    .body_mut()
                    .read_json()
                    .context("Failed to parse API response")?;
                Ok(Some(body))
            }
            404 if allow_missing => Ok(None),
            429 => Err(ApiError::RateLimited.into()),
            _ => {
                let body = response.body_mut().read_to_string().unwrap_or_default();
                // Error bodies usually carry a Fault with a readable message
                if let Ok(QueryEnvelope {
                    fault: Some(fault), ..
                }) = serde_json::from_str::<QueryEnvelope>(&body)
                {
                    return Err(ApiError::status(status, &fault.summary()).into());
                }
                Err(ApiError::status(status, &body).into())
            }
        }
    }
}

impl QueryClient for QuickBooksClient {
    fn query(&self, realm_id: &str, query: &EntityQuery) -> Result<Vec<Value>> {
        let query_string = query.to_string();
        debug!("Querying realm {}: {}", realm_id, query_string);

        let url = format!(
            "{}/v3/company/{}/query?query={}&minorversion={}",
            self.base_url,
            urlencoding::encode(realm_id),
            urlencoding::encode(&query_string),
            self.minor_version
        );

        let body = self
            .get_json(realm_id, &url, false)?
            .context("Query endpoint returned no body")?;
        entities_from_envelope(body, query.object_type)
    }
}

/// Pull the entity list for `object_type` out of a query response
///
/// A `QueryResponse` without the entity key is an empty result.
pub fn entities_from_envelope(body: Value, object_type: ObjectType) -> Result<Vec<Value>> {
    let envelope: QueryEnvelope =
        serde_json::from_value(body).context("Unexpected query response shape")?;

    if let Some(fault) = envelope.fault {
        return Err(ApiError::Fault {
            message: fault.summary(),
        }
        .into());
    }

    let mut response = envelope
        .query_response
        .context("Response has no QueryResponse")?;

    match response.remove(object_type.remote_name()) {
        None => Ok(Vec::new()),
        Some(Value::Array(entities)) => Ok(entities),
        Some(other) => anyhow::bail!(
            "Expected an array of {} records, got {}",
            object_type.remote_name(),
            other
        ),
    }
}
