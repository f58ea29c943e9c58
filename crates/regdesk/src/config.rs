// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default lead time before access-token expiry at which a refresh is due.
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 120;

/// Configuration for the session core and API client.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the registration API (endpoint paths are appended).
    #[arg(long, default_value = "http://127.0.0.1:5000/api", env = "REGDESK_API_URL")]
    pub base_url: String,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, env = "REGDESK_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Seconds before access-token expiry at which a refresh is triggered.
    #[arg(long, default_value_t = DEFAULT_REFRESH_BUFFER_SECS, env = "REGDESK_REFRESH_BUFFER_SECS")]
    pub refresh_buffer_secs: u64,

    /// Login endpoint path.
    #[arg(long, default_value = "/authentication/login", env = "REGDESK_LOGIN_PATH")]
    pub login_path: String,

    /// Refresh endpoint path.
    #[arg(long, default_value = "/authentication/refresh", env = "REGDESK_REFRESH_PATH")]
    pub refresh_path: String,

    /// Storage key holding the JSON-encoded refresh token.
    #[arg(long, default_value = "refresh_token", env = "REGDESK_REFRESH_TOKEN_KEY")]
    pub refresh_token_key: String,

    /// Storage key holding the JSON-encoded refresh-token expiry.
    #[arg(long, default_value = "refresh_token_exp", env = "REGDESK_REFRESH_TOKEN_EXP_KEY")]
    pub refresh_token_exp_key: String,

    /// Legacy storage key holding the combined `{token, tokenExpiration}` user object.
    #[arg(long, default_value = "app_user", env = "REGDESK_LEGACY_USER_KEY")]
    pub legacy_user_key: String,

    /// Legacy storage key holding a bare token string.
    #[arg(long, default_value = "token", env = "REGDESK_LEGACY_TOKEN_KEY")]
    pub legacy_token_key: String,

    /// Directory for durable session storage.
    #[arg(long, env = "REGDESK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/api".to_owned(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            login_path: "/authentication/login".to_owned(),
            refresh_path: "/authentication/refresh".to_owned(),
            refresh_token_key: "refresh_token".to_owned(),
            refresh_token_exp_key: "refresh_token_exp".to_owned(),
            legacy_user_key: "app_user".to_owned(),
            legacy_token_key: "token".to_owned(),
            state_dir: None,
        }
    }
}

/// Names of the durable keys the session core reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub refresh_token: String,
    pub refresh_token_exp: String,
    pub legacy_user: String,
    pub legacy_token: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        SessionConfig::default().storage_keys()
    }
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("base URL must start with http:// or https://: {0}")]
    InvalidBaseUrl(String),
    #[error("endpoint path must start with '/': {0}")]
    InvalidPath(String),
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        for path in [&self.login_path, &self.refresh_path] {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidPath(path.clone()));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    pub fn storage_keys(&self) -> StorageKeys {
        StorageKeys {
            refresh_token: self.refresh_token_key.clone(),
            refresh_token_exp: self.refresh_token_exp_key.clone(),
            legacy_user: self.legacy_user_key.clone(),
            legacy_token: self.legacy_token_key.clone(),
        }
    }

    /// Resolve the state directory.
    ///
    /// Uses `--state-dir` / `REGDESK_STATE_DIR` when set, then
    /// `$XDG_STATE_HOME/regdesk`, then `$HOME/.local/state/regdesk`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("regdesk");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/regdesk");
        }
        PathBuf::from(".regdesk")
    }

    /// Path of the file-backed key/value store.
    pub fn storage_path(&self) -> PathBuf {
        self.state_dir().join("storage.json")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
