//! Typed errors for authorization and remote API failures
//!
//! These travel inside `anyhow::Error` and are recovered with
//! `downcast_ref` where a caller needs to classify a failure.

/// The account cannot be used until someone re-authorizes it
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization required for realm {realm_id}: no stored token (run `tally authorize`)")]
    AuthorizationRequired { realm_id: String },

    #[error("Token refresh failed for realm {realm_id}: {message} (run `tally authorize`)")]
    RefreshFailed { realm_id: String, message: String },
}

/// The token endpoint refused a grant with a 4xx reply, e.g. `invalid_grant`
///
/// Unlike [`ApiError`], retrying will not help: the refresh token or client
/// credentials are no longer accepted.
#[derive(Debug, thiserror::Error)]
#[error("Token endpoint rejected the request (HTTP {status}): {message}")]
pub struct GrantRejected {
    pub status: u16,
    pub message: String,
}

/// Remote API failure; retried on the next scheduled cycle
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Rate limited by the QuickBooks API")]
    RateLimited,

    #[error("QuickBooks API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("QuickBooks API fault: {message}")]
    Fault { message: String },

    #[error("Request to QuickBooks API failed: {0}")]
    Transport(String),
}

impl ApiError {
    /// Longest response body kept in an error message
    pub(crate) const MAX_BODY_LEN: usize = 500;

    pub(crate) fn status(status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(Self::MAX_BODY_LEN) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        ApiError::Status { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body_is_truncated() {
        let body = "x".repeat(2000);
        let ApiError::Status { body, .. } = ApiError::status(503, &body) else {
            panic!("expected status error");
        };
        assert_eq!(body.len(), ApiError::MAX_BODY_LEN + 3);
    }

    #[test]
    fn test_auth_error_downcasts_through_anyhow() {
        let err: anyhow::Error = AuthError::AuthorizationRequired {
            realm_id: "realm-1".to_string(),
        }
        .into();
        let err = err.context("Failed to query Customer");
        assert!(err.downcast_ref::<AuthError>().is_some());
    }
}
