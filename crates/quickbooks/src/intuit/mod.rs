//! QuickBooks Online API integration
//!
//! This module provides:
//! - OAuth2 authorization-code bootstrap and refresh-token grants
//! - Single-flight access token management with rotation persistence
//! - Query client for entity collections

mod auth;
mod client;
mod error;
mod tokens;

pub use auth::{CallbackParams, OAuthClient, TokenRefresher, parse_callback};
pub use client::{EntityQuery, QueryClient, QuickBooksClient, entities_from_envelope};
pub use error::{ApiError, AuthError, GrantRejected};
pub use tokens::TokenManager;

/// QuickBooks Online API response types
pub mod api {
    use serde::Deserialize;
    use serde_json::{Map, Value};

    /// Envelope returned by the query endpoint
    ///
    /// `QueryResponse` holds one array keyed by entity name, e.g.
    /// `{"QueryResponse": {"Customer": [...], "maxResults": 2}}`. An empty
    /// result omits the array entirely.
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct QueryEnvelope {
        pub query_response: Option<Map<String, Value>>,
        pub fault: Option<Fault>,
    }

    /// Error body, returned with HTTP 200 or 4xx depending on the failure
    #[derive(Debug, Deserialize)]
    pub struct Fault {
        #[serde(rename = "Error", default)]
        pub errors: Vec<FaultError>,
        #[serde(rename = "type")]
        pub kind: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct FaultError {
        #[serde(rename = "Message")]
        pub message: Option<String>,
        #[serde(rename = "Detail")]
        pub detail: Option<String>,
        pub code: Option<String>,
    }

    impl Fault {
        /// One-line summary of every error in the fault
        pub fn summary(&self) -> String {
            let parts: Vec<String> = self
                .errors
                .iter()
                .map(|e| {
                    let message = e.message.as_deref().unwrap_or("Unknown error");
                    match (&e.code, &e.detail) {
                        (Some(code), Some(detail)) => format!("{} ({}): {}", message, code, detail),
                        (Some(code), None) => format!("{} ({})", message, code),
                        (None, Some(detail)) => format!("{}: {}", message, detail),
                        (None, None) => message.to_string(),
                    }
                })
                .collect();

            let kind = self.kind.as_deref().unwrap_or("Fault");
            if parts.is_empty() {
                kind.to_string()
            } else {
                format!("{}: {}", kind, parts.join("; "))
            }
        }
    }

    /// Error body from the OAuth token endpoint
    #[derive(Debug, Deserialize)]
    pub struct OAuthErrorResponse {
        pub error: String,
        pub error_description: Option<String>,
    }
}
