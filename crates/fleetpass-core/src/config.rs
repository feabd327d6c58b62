//! Session configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! server base URL, the preemptive renewal margin, anti-forgery cookie/header
//! names, and the session endpoint paths.
//!
//! Configuration is stored at `~/.config/fleetpass/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "fleetpass";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default base URL for the reservation server
const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";

/// Renew this many seconds before the access credential expires.
const DEFAULT_REFRESH_MARGIN_SECS: u64 = 60;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

/// Paths of the server-side session operations, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionEndpoints {
    pub exchange: String,
    pub renew: String,
    pub terminate: String,
    pub anti_forgery: String,
    pub whoami: String,
}

impl Default for SessionEndpoints {
    fn default() -> Self {
        Self {
            exchange: "/session/exchange".to_string(),
            renew: "/session/renew".to_string(),
            terminate: "/session/terminate".to_string(),
            anti_forgery: "/session/anti-forgery".to_string(),
            whoami: "/session/whoami".to_string(),
        }
    }
}

impl SessionEndpoints {
    /// Calls that create, renew or end a session. A 401 on one of these is
    /// final: it never triggers a renewal.
    pub fn is_session_operation(&self, path: &str) -> bool {
        let path = route(path);
        [&self.exchange, &self.renew, &self.terminate]
            .into_iter()
            .any(|endpoint| route(endpoint) == path)
    }

    /// Calls that mutate session state and must carry the anti-forgery header.
    pub fn requires_anti_forgery(&self, path: &str) -> bool {
        let path = route(path);
        route(&self.renew) == path || route(&self.terminate) == path
    }
}

/// Path without query, fragment or trailing slash.
fn route(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub base_url: String,
    pub refresh_margin_secs: u64,
    pub request_timeout_secs: u64,
    pub csrf_cookie_name: String,
    pub csrf_header_name: String,
    pub endpoints: SessionEndpoints,
    pub max_rate_limit_retries: u32,
    pub initial_backoff_ms: u64,
    pub last_identifier: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            csrf_cookie_name: "csrf_token".to_string(),
            csrf_header_name: "x-csrf-token".to_string(),
            endpoints: SessionEndpoints::default(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            last_identifier: None,
        }
    }
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
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

    /// Builder-style override of the server base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builder-style override of the renewal margin.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin_secs = margin.as_secs();
        self
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
