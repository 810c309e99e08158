//! Application configuration management.
//!
//! This module handles loading and saving the runtime configuration:
//! the API base origin, the OAuth client settings, and session timing
//! knobs. Values are injected before the session core boots.
//!
//! Configuration is stored at `~/.config/jobtrack/config.json`. Environment
//! variables override the file so deployments can inject values without
//! touching disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "jobtrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_OAUTH_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_OAUTH_REDIRECT_URI: &str = "http://localhost:4200/auth/callback";

/// Leeway applied when deciding whether an access token is still usable.
const DEFAULT_CLOCK_SKEW_SECS: u64 = 30;

/// Larger skews are clamped to this; beyond it every token would look expired.
const MAX_CLOCK_SKEW_SECS: u64 = 60 * 60;

/// Upper bound for one refresh exchange before it counts as failed.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_URL: &str = "JOBTRACK_API_URL";
pub const ENV_OAUTH_CLIENT_ID: &str = "JOBTRACK_OAUTH_CLIENT_ID";
pub const ENV_OAUTH_REDIRECT_URI: &str = "JOBTRACK_OAUTH_REDIRECT_URI";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub oauth_client_id: Option<String>,
    pub oauth_authorize_url: String,
    pub oauth_redirect_uri: String,
    pub clock_skew_secs: u64,
    pub refresh_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            oauth_client_id: None,
            oauth_authorize_url: DEFAULT_OAUTH_AUTHORIZE_URL.to_string(),
            oauth_redirect_uri: DEFAULT_OAUTH_REDIRECT_URI.to_string(),
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session core cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.refresh_timeout_secs > 0,
            "refresh_timeout_secs must be greater than zero"
        );
        ensure!(
            self.request_timeout_secs > 0,
            "request_timeout_secs must be greater than zero"
        );
        Ok(())
    }

    /// The config file alone, without environment overrides. Use this
    /// before `save()` so overrides are never written back.
    pub fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply deployment-time overrides. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(client_id) = get(ENV_OAUTH_CLIENT_ID) {
            self.oauth_client_id = Some(client_id);
        }
        if let Some(redirect) = get(ENV_OAUTH_REDIRECT_URI) {
            self.oauth_redirect_uri = redirect;
        }
    }

    /// Join an endpoint path onto the API base origin.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn clock_skew(&self) -> chrono::Duration {
        // Clamped, so the cast and the chrono range are both safe.
        chrono::Duration::seconds(self.clock_skew_secs.min(MAX_CLOCK_SKEW_SECS) as i64)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
