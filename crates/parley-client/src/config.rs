//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client can start with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parley_shared::constants::{DEFAULT_AVATAR_BASE_URL, DEFAULT_STATUS_MESSAGE, PAGE_SIZE};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Messages fetched per history page.
    /// Env: `PARLEY_PAGE_SIZE`
    /// Default: `50`
    pub page_size: usize,

    /// Attempts (including the first) for reads that drive the live cache.
    /// Env: `PARLEY_READ_RETRIES`
    /// Default: `3`
    pub read_attempts: u32,

    /// Backoff before the first retry; doubles on every further attempt.
    /// Env: `PARLEY_RETRY_BASE_MS`
    /// Default: `200`
    pub retry_base_delay: Duration,

    /// Upper bound on waiting for a live subscription to shut down when the
    /// active conversation changes.
    /// Env: `PARLEY_TEARDOWN_TIMEOUT_MS`
    /// Default: `2000`
    pub teardown_timeout: Duration,

    /// Avatar generator; new profiles get `<base>?seed=<username>`.
    /// Env: `PARLEY_AVATAR_BASE_URL`
    pub avatar_base_url: String,

    /// Status message of freshly registered profiles.
    /// Env: `PARLEY_DEFAULT_STATUS`
    pub default_status: String,

    /// Database file for the embedded backend (demo binary).
    /// Env: `PARLEY_DB_PATH`
    /// Default: platform data directory.
    pub db_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            read_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
            teardown_timeout: Duration::from_secs(2),
            avatar_base_url: DEFAULT_AVATAR_BASE_URL.to_string(),
            default_status: DEFAULT_STATUS_MESSAGE.to_string(),
            db_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_var::<usize>(&lookup, "PARLEY_PAGE_SIZE") {
            if n > 0 {
                config.page_size = n;
            } else {
                tracing::warn!("PARLEY_PAGE_SIZE must be positive, using default");
            }
        }

        if let Some(n) = parse_var::<u32>(&lookup, "PARLEY_READ_RETRIES") {
            config.read_attempts = n.max(1);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PARLEY_RETRY_BASE_MS") {
            config.retry_base_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PARLEY_TEARDOWN_TIMEOUT_MS") {
            config.teardown_timeout = Duration::from_millis(ms);
        }

        if let Some(url) = lookup("PARLEY_AVATAR_BASE_URL").filter(|v| !v.is_empty()) {
            config.avatar_base_url = url;
        }

        if let Some(status) = lookup("PARLEY_DEFAULT_STATUS") {
            config.default_status = status;
        }

        if let Some(path) = lookup("PARLEY_DB_PATH").filter(|v| !v.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.read_attempts, self.retry_base_delay)
    }

    pub fn avatar_for(&self, username: &str) -> String {
        format!("{}?seed={}", self.avatar_base_url, username)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
