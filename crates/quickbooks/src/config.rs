//! Configuration loading for the sync worker
//!
//! OAuth credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (~/.config/tally/intuit-credentials.json)
//! 3. Runtime environment variables (fallback)
//!
//! Worker settings come from ~/.config/tally/settings.json when present,
//! then `TALLY_*` environment variables override individual fields.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials filename in the Tally config directory
const CREDENTIALS_FILE: &str = "intuit-credentials.json";

/// Settings filename in the Tally config directory
const SETTINGS_FILE: &str = "settings.json";

/// Default database filename in the Tally data directory
const DATABASE_FILE: &str = "tally.sqlite";

/// The API caps a single query page at 1000 rows
pub const MAX_PAGE_SIZE: usize = 1000;

/// Access tokens live for an hour; a larger buffer would refresh on every call
pub const MAX_REFRESH_BUFFER_SECS: u64 = 3600;

/// OAuth app credentials from the Intuit developer portal
#[derive(Debug, Clone, Deserialize)]
pub struct IntuitCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl IntuitCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. JSON file (~/.config/tally/intuit-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            return config::load_json(CREDENTIALS_FILE);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: INTUIT_CLIENT_ID=xxx INTUIT_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("INTUIT_CLIENT_ID")?;
        let client_secret = option_env!("INTUIT_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse credentials JSON")
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("INTUIT_CLIENT_ID")
            .context("INTUIT_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("INTUIT_CLIENT_SECRET")
            .context("INTUIT_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Get the default credentials file path
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Which QuickBooks Online API host to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox-quickbooks.api.intuit.com",
            Environment::Production => "https://quickbooks.api.intuit.com",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" | "prod" => Ok(Environment::Production),
            other => anyhow::bail!("Unknown environment: {} (expected sandbox or production)", other),
        }
    }
}

/// Worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub environment: Environment,
    /// Must exactly match a redirect URI registered for the app
    pub redirect_uri: String,
    /// Defaults to the Tally data directory
    pub database_path: Option<PathBuf>,
    pub sync_interval_secs: u64,
    /// Page cap for one query; records beyond it are picked up next cycle
    pub max_results: usize,
    /// Refresh the access token this long before it expires
    pub refresh_buffer_secs: u64,
    /// How long shutdown waits for an in-flight cycle
    pub shutdown_timeout_secs: u64,
    pub minor_version: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Sandbox,
            redirect_uri: "http://localhost:8080/callback".to_string(),
            database_path: None,
            sync_interval_secs: 900,
            max_results: MAX_PAGE_SIZE,
            refresh_buffer_secs: 300,
            shutdown_timeout_secs: 30,
            minor_version: 65,
        }
    }
}

impl Settings {
    /// Load settings from the config file (if any), then apply env overrides
    pub fn load() -> Result<Self> {
        let settings = if config::config_exists(SETTINGS_FILE) {
            config::load_json(SETTINGS_FILE)?
        } else {
            Self::default()
        };

        let settings = settings.with_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific JSON file, then apply env overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Self = config::load_json_file(path)?;
        let settings = settings.with_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `TALLY_*` overrides from the given variable lookup
    pub fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = var("TALLY_ENVIRONMENT") {
            self.environment = value.parse()?;
        }
        if let Some(value) = var("TALLY_REDIRECT_URI") {
            self.redirect_uri = value;
        }
        if let Some(value) = var("TALLY_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = var("TALLY_SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = value
                .parse()
                .context("TALLY_SYNC_INTERVAL_SECS must be a number of seconds")?;
        }
        if let Some(value) = var("TALLY_MAX_RESULTS") {
            self.max_results = value
                .parse()
                .context("TALLY_MAX_RESULTS must be a positive integer")?;
        }
        Ok(self)
    }

    /// Reject settings the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=MAX_PAGE_SIZE).contains(&self.max_results),
            "max_results must be between 1 and {}, got {}",
            MAX_PAGE_SIZE,
            self.max_results
        );
        anyhow::ensure!(self.sync_interval_secs > 0, "sync_interval_secs must be nonzero");
        anyhow::ensure!(
            self.refresh_buffer_secs <= MAX_REFRESH_BUFFER_SECS,
            "refresh_buffer_secs must be at most {}, got {}",
            MAX_REFRESH_BUFFER_SECS,
            self.refresh_buffer_secs
        );
        url::Url::parse(&self.redirect_uri)
            .with_context(|| format!("Invalid redirect_uri: {}", self.redirect_uri))?;
        Ok(())
    }

    /// Resolve the database path, creating the data directory if needed
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config::ensure_data_dir()?.join(DATABASE_FILE)),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Clamped to [`MAX_REFRESH_BUFFER_SECS`] for settings that skipped validation
    pub fn refresh_buffer(&self) -> chrono::Duration {
        let secs = self.refresh_buffer_secs.min(MAX_REFRESH_BUFFER_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
