// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup loading across the three storage generations.
//!
//! Priority: current split keys, then the legacy combined user object, then
//! the bare legacy token. Expired secrets are deleted, never surfaced.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::credential::store::TokenStore;

/// Session material recovered from durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadedSession {
    pub refresh_token: Option<String>,
    pub refresh_token_exp: Option<DateTime<Utc>>,
    pub access_token: Option<String>,
    pub access_token_exp: Option<DateTime<Utc>>,
}

/// One-shot loader that normalizes legacy layouts.
pub struct StorageMigrator<'a> {
    store: &'a TokenStore,
}

impl<'a> StorageMigrator<'a> {
    pub fn new(store: &'a TokenStore) -> Self {
        Self { store }
    }

    pub fn load(&self, now: DateTime<Utc>) -> Option<LoadedSession> {
        if let Some((token, exp)) = self.store.read_refresh_token() {
            if exp <= now {
                info!(expired_at = %exp, "stored refresh token expired, discarding");
                self.store.clear();
                return None;
            }
            debug!("loaded refresh token from current storage layout");
            return Some(LoadedSession {
                refresh_token: Some(token),
                refresh_token_exp: Some(exp),
                ..Default::default()
            });
        }

        if let Some(user) = self.store.read_legacy_user() {
            // The legacy object is never rewritten; its token lives on in memory only.
            self.store.remove_legacy();
            return match user.token_expiration {
                Some(exp) if exp > now => {
                    info!("migrated legacy user session to in-memory access token");
                    Some(LoadedSession {
                        access_token: Some(user.token),
                        access_token_exp: Some(exp),
                        ..Default::default()
                    })
                }
                Some(exp) => {
                    info!(expired_at = %exp, "legacy session expired, discarding");
                    None
                }
                None => {
                    info!("legacy session has no expiry, discarding");
                    None
                }
            };
        }

        if let Some(token) = self.store.read_legacy_token() {
            self.store.remove_legacy();
            info!("migrated bare legacy token to in-memory access token");
            return Some(LoadedSession { access_token: Some(token), ..Default::default() });
        }

        None
    }
}

#[cfg(test)]
#[path = "migrate_tests.rs"]
mod tests;
