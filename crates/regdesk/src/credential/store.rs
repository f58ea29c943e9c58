// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable token storage.
//!
//! [`KeyValueStore`] is the string-keyed storage primitive (the native
//! counterpart of browser `localStorage`). [`TokenStore`] is the only code
//! that touches it: it owns the key names and the JSON encoding of each key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::StorageKeys;
use crate::credential::parse_instant;

/// Failure writing to durable storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// String-keyed durable storage. Reads never fail; a missing or unreadable
/// key is simply absent.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str);
}

/// In-process store. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with entries (e.g. a legacy layout).
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { entries: Mutex::new(entries) }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.keys().cloned().collect()).unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Store backed by a single JSON object file, rewritten atomically on
/// every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// An unreadable or corrupt file is treated as empty and will be
    /// overwritten by the next mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "discarding corrupt storage file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full map to disk (write tmp + rename).
    ///
    /// The temp name carries PID and a counter so concurrent processes never
    /// share a partially written file.
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = serde_json::to_string_pretty(entries)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_owned(), value.to_owned());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.remove(key).is_some() {
            if let Err(e) = self.flush(&entries) {
                warn!(path = %self.path.display(), key, err = %e, "failed to persist key removal");
            }
        }
    }
}

/// Token from the legacy combined user object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyUser {
    pub token: String,
    /// `None` when the object carried no expiry.
    pub token_expiration: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLegacyUser {
    token: String,
    #[serde(default)]
    token_expiration: Option<String>,
}

/// Persistence for the refresh token pair, plus read access to the legacy
/// layouts for migration.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        Self { backend, keys }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Read the current-format refresh token and its expiry.
    ///
    /// Malformed values (or a token without its expiry) are deleted and
    /// reported as absent.
    pub fn read_refresh_token(&self) -> Option<(String, DateTime<Utc>)> {
        let raw_token = self.backend.get(&self.keys.refresh_token)?;
        let token = serde_json::from_str::<String>(&raw_token).ok();
        let exp = self
            .backend
            .get(&self.keys.refresh_token_exp)
            .and_then(|raw| serde_json::from_str::<String>(&raw).ok())
            .and_then(|raw| parse_instant(&raw));

        match (token, exp) {
            (Some(token), Some(exp)) if !token.is_empty() => Some((token, exp)),
            _ => {
                warn!("discarding malformed refresh token entry");
                self.remove_refresh_keys();
                None
            }
        }
    }

    /// Persist the refresh token pair.
    pub fn write_refresh_token(&self, token: &str, exp: DateTime<Utc>) -> Result<(), StoreError> {
        let token_json = serde_json::to_string(token)?;
        let exp_json = serde_json::to_string(&exp.to_rfc3339_opts(SecondsFormat::Millis, true))?;
        self.backend.set(&self.keys.refresh_token, &token_json)?;
        self.backend.set(&self.keys.refresh_token_exp, &exp_json)?;
        Ok(())
    }

    /// Remove every key of the current and legacy layouts.
    pub fn clear(&self) {
        self.remove_refresh_keys();
        self.remove_legacy();
        debug!("durable session storage cleared");
    }

    /// Read the legacy combined user object. Unparseable objects are deleted.
    pub fn read_legacy_user(&self) -> Option<LegacyUser> {
        let raw = self.backend.get(&self.keys.legacy_user)?;
        let parsed = serde_json::from_str::<RawLegacyUser>(&raw).ok().and_then(|user| {
            let token_expiration = match user.token_expiration {
                Some(ref exp) => Some(parse_instant(exp)?),
                None => None,
            };
            Some(LegacyUser { token: user.token, token_expiration })
        });
        match parsed {
            Some(user) if !user.token.is_empty() => Some(user),
            _ => {
                warn!(key = %self.keys.legacy_user, "discarding malformed legacy user entry");
                self.backend.remove(&self.keys.legacy_user);
                None
            }
        }
    }

    /// Read the bare legacy token. Accepts both raw and JSON-quoted strings.
    pub fn read_legacy_token(&self) -> Option<String> {
        let raw = self.backend.get(&self.keys.legacy_token)?;
        let token = serde_json::from_str::<String>(&raw).unwrap_or_else(|_| raw.trim().to_owned());
        if token.is_empty() {
            self.backend.remove(&self.keys.legacy_token);
            return None;
        }
        Some(token)
    }

    pub fn remove_legacy(&self) {
        self.backend.remove(&self.keys.legacy_user);
        self.backend.remove(&self.keys.legacy_token);
    }

    fn remove_refresh_keys(&self) {
        self.backend.remove(&self.keys.refresh_token);
        self.backend.remove(&self.keys.refresh_token_exp);
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
