//! Intuit OAuth2 authentication
//!
//! Implements the authorization-code bootstrap (local callback server) and
//! the refresh-token grant. Uses synchronous HTTP (ureq) to be
//! executor-agnostic.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::Utc;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::time::Duration;

use super::api::OAuthErrorResponse;
use super::{ApiError, GrantRejected};
use crate::config::IntuitCredentials;
use crate::models::{Token, TokenGrant};
use crate::storage::TokenStore;

/// Exchanges a refresh token for a new token pair
///
/// The remote rotates the refresh token on every call: once this returns,
/// the refresh token that was passed in is dead.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// Query parameters delivered to the redirect URI
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackParams {
    pub code: String,
    pub realm_id: String,
    pub state: String,
}

/// OAuth2 client for the Intuit identity platform
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    agent: ureq::Agent,
}

impl OAuthClient {
    /// Intuit OAuth2 endpoints
    const AUTH_URL: &'static str = "https://appcenter.intuit.com/connect/oauth2";
    const TOKEN_URL: &'static str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
    const REVOKE_URL: &'static str = "https://developer.api.intuit.com/v2/oauth2/tokens/revoke";

    /// Read access to the accounting API
    const ACCOUNTING_SCOPE: &'static str = "com.intuit.quickbooks.accounting";

    /// Create a new OAuthClient
    ///
    /// # Arguments
    /// * `credentials` - Client id and secret from the Intuit developer portal
    /// * `redirect_uri` - Redirect URI registered for the app
    pub fn new(credentials: &IntuitCredentials, redirect_uri: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(30)))
            .build()
            .into();

        Self {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            redirect_uri: redirect_uri.into(),
            agent,
        }
    }

    /// Build the consent URL the user opens in a browser
    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&response_type=code&scope={}&redirect_uri={}&state={}",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(Self::ACCOUNTING_SCOPE),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
        )
    }

    /// Exchange an authorization code for the first token pair
    pub fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .context("Failed to exchange authorization code")
    }

    /// Revoke a refresh (or access) token
    pub fn revoke(&self, token: &str) -> Result<()> {
        let mut response = self
            .agent
            .post(Self::REVOKE_URL)
            .header("Authorization", &self.basic_auth())
            .header("Accept", "application/json")
            .send_json(serde_json::json!({ "token": token }))
            .context("Failed to send revoke request")?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            anyhow::bail!("Token revocation returned HTTP {}: {}", status, body);
        }
        Ok(())
    }

    /// Run the full bootstrap flow and store the resulting token
    ///
    /// Opens the consent page in a browser, waits for the redirect on the
    /// local port named by the redirect URI, then exchanges the code.
    pub fn authorize_interactive(&self, store: &TokenStore) -> Result<Token> {
        // Step 1: Bind the redirect URI's port before sending the user off
        let redirect = url::Url::parse(&self.redirect_uri)
            .with_context(|| format!("Invalid redirect URI: {}", self.redirect_uri))?;
        let port = redirect
            .port_or_known_default()
            .context("Redirect URI has no port")?;
        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("Could not bind callback port {}", port))?;

        // Step 2: Build authorization URL
        let state = generate_state();
        let auth_url = self.authorization_url(&state);

        println!("\n=== QuickBooks Authorization Required ===");
        println!("Opening browser for authorization...");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        // Step 3: Wait for callback with authorization code
        println!("Waiting for authorization...");
        let params = self.wait_for_callback(listener)?;
        anyhow::ensure!(
            params.state == state,
            "OAuth state mismatch; the callback did not come from this authorization request"
        );

        // Step 4: Exchange code for tokens and persist them
        println!("Exchanging authorization code for tokens...");
        let grant = self.exchange_code(&params.code)?;
        let token = Token::from_grant(&params.realm_id, &grant, Utc::now())?;
        store.save(&token)?;

        println!("Authorization successful for company {}!\n", params.realm_id);
        Ok(token)
    }

    /// Wait for one OAuth callback and extract its parameters
    fn wait_for_callback(&self, listener: TcpListener) -> Result<CallbackParams> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let params = parse_callback(&request_line);

        let (status, body) = if params.is_ok() {
            ("200 OK", "Authorization successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authorization failed. Please try again.")
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        params
    }

    fn basic_auth(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64_STANDARD.encode(credentials))
    }

    /// POST a form to the token endpoint and parse the grant
    ///
    /// A 4xx reply is a [`GrantRejected`]; transport failures, 429 and 5xx
    /// are [`ApiError`]s and may succeed on a later attempt.
    fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let mut response = self
            .agent
            .post(Self::TOKEN_URL)
            .header("Authorization", &self.basic_auth())
            .header("Accept", "application/json")
            .send_form(form.iter().copied())
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(token_endpoint_error(status, body));
        }

        response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")
    }
}

/// Classify a non-200 reply from the token endpoint
fn token_endpoint_error(status: u16, body: String) -> anyhow::Error {
    let message = serde_json::from_str::<OAuthErrorResponse>(&body)
        .map(|e| match e.error_description {
            Some(description) => format!("{}: {}", e.error, description),
            None => e.error,
        })
        .unwrap_or(body);

    match status {
        429 => ApiError::RateLimited.into(),
        400..=499 => GrantRejected { status, message }.into(),
        _ => ApiError::status(status, &message).into(),
    }
}

impl TokenRefresher for OAuthClient {
    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .context("Failed to refresh access token")
    }
}

/// Parse the request line of the OAuth redirect
///
/// Format: `GET /callback?code=...&state=...&realmId=... HTTP/1.1`
pub fn parse_callback(request_line: &str) -> Result<CallbackParams> {
    let path = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed callback request")?;

    // The path is relative; give it a base so it parses as a URL
    let url = url::Url::parse("http://localhost")?
        .join(path)
        .context("Malformed callback path")?;

    let mut code = None;
    let mut realm_id = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "realmId" => realm_id = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => anyhow::bail!("OAuth error: {}", value),
            _ => {}
        }
    }

    Ok(CallbackParams {
        code: code.context("No authorization code received")?,
        realm_id: realm_id.context("No realmId received")?,
        state: state.context("No state received")?,
    })
}

/// Unpredictable value for the OAuth `state` parameter
fn generate_state() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u32(std::process::id());
    hasher.write_i64(Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let high = hasher.finish();
    let low = RandomState::new().build_hasher().finish();
    format!("{:016x}{:016x}", high, low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> OAuthClient {
        let credentials = IntuitCredentials {
            client_id: "client id".to_string(),
            client_secret: "secret".to_string(),
        };
        OAuthClient::new(&credentials, "http://localhost:8080/callback")
    }

    #[test]
    fn test_authorization_url() {
        let url = test_client().authorization_url("abc123");
        assert!(url.starts_with("https://appcenter.intuit.com/connect/oauth2?"));
        assert!(url.contains("client_id=client%20id"));
        assert!(url.contains("scope=com.intuit.quickbooks.accounting"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fcallback"));
        assert!(url.contains("state=abc123"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn test_basic_auth_header() {
        // "client id:secret"
        assert_eq!(test_client().basic_auth(), "Basic Y2xpZW50IGlkOnNlY3JldA==");
    }

    #[test]
    fn test_parse_callback() {
        let params = parse_callback(
            "GET /callback?code=AB11&state=xyz&realmId=4620816365 HTTP/1.1\r\n",
        )
        .unwrap();
        assert_eq!(
            params,
            CallbackParams {
                code: "AB11".to_string(),
                realm_id: "4620816365".to_string(),
                state: "xyz".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_callback_decodes_values() {
        let params =
            parse_callback("GET /callback?code=a%2Bb&state=s&realmId=1 HTTP/1.1").unwrap();
        assert_eq!(params.code, "a+b");
    }

    #[test]
    fn test_parse_callback_error() {
        let err = parse_callback("GET /callback?error=access_denied&state=s HTTP/1.1").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_parse_callback_requires_realm() {
        assert!(parse_callback("GET /callback?code=a&state=s HTTP/1.1").is_err());
    }

    #[test]
    fn test_token_endpoint_error_classification() {
        let rejected = token_endpoint_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Token invalid"}"#.to_string(),
        );
        let rejected = rejected.downcast_ref::<GrantRejected>().unwrap();
        assert_eq!(rejected.status, 400);
        assert_eq!(rejected.message, "invalid_grant: Token invalid");

        let unavailable = token_endpoint_error(503, "Service Unavailable".to_string());
        assert!(matches!(
            unavailable.downcast_ref::<ApiError>(),
            Some(ApiError::Status { status: 503, .. })
        ));

        let throttled = token_endpoint_error(429, String::new());
        assert!(matches!(
            throttled.downcast_ref::<ApiError>(),
            Some(ApiError::RateLimited)
        ));
    }

    #[test]
    fn test_generate_state_is_unique() {
        assert_ne!(generate_state(), generate_state());
        assert_eq!(generate_state().len(), 32);
    }
}
