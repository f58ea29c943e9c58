// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: owns both tokens, decides when a refresh is due, and
//! collapses concurrent refresh attempts into one network call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credential::migrate::{LoadedSession, StorageMigrator};
use crate::credential::store::TokenStore;
use crate::credential::{Credentials, SessionSnapshot, SessionStatus};
use crate::transport::{ApiRequest, RequestExecutor};

type RefreshFuture = Shared<BoxFuture<'static, Option<Credentials>>>;

/// Tokens held for the current session. The access token never leaves memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Tokens {
    access_token: Option<String>,
    access_token_exp: Option<DateTime<Utc>>,
    refresh_token: Option<String>,
    refresh_token_exp: Option<DateTime<Utc>>,
}

impl Tokens {
    /// Access token usable outside the refresh buffer.
    fn fresh_access_token(&self, now: DateTime<Utc>, buffer: chrono::Duration) -> Option<&str> {
        let due_at = self.access_token_exp?.checked_sub_signed(buffer)?;
        if now < due_at {
            self.access_token.as_deref()
        } else {
            None
        }
    }

    /// Refresh token that has not yet expired.
    fn usable_refresh_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match self.refresh_token_exp {
            Some(exp) if now < exp => self.refresh_token.as_deref(),
            _ => None,
        }
    }

    /// Access token of a session that cannot refresh, while not known to be expired.
    fn legacy_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.refresh_token.is_some() {
            return None;
        }
        match self.access_token_exp {
            Some(exp) if now >= exp => None,
            _ => self.access_token.as_deref(),
        }
    }
}

impl From<LoadedSession> for Tokens {
    fn from(loaded: LoadedSession) -> Self {
        Self {
            access_token: loaded.access_token,
            access_token_exp: loaded.access_token_exp,
            refresh_token: loaded.refresh_token,
            refresh_token_exp: loaded.refresh_token_exp,
        }
    }
}

impl From<&Credentials> for Tokens {
    fn from(creds: &Credentials) -> Self {
        Self {
            access_token: Some(creds.auth_token.clone()),
            access_token_exp: Some(creds.auth_token_exp),
            refresh_token: Some(creds.refresh_token.clone()),
            refresh_token_exp: Some(creds.refresh_token_exp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    NoSession,
    Authenticated(Tokens),
}

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

struct Inner {
    state: SessionState,
    /// Bumped whenever the session ends; a refresh started under an older
    /// generation does not install its result.
    generation: u64,
    in_flight: Option<InFlight>,
    next_refresh_id: u64,
}

/// Tunables for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Lead time before access-token expiry at which a refresh is due.
    pub refresh_buffer: Duration,
    /// Path of the refresh endpoint.
    pub refresh_path: String,
}

/// Authority on session state.
pub struct SessionManager {
    store: TokenStore,
    executor: RequestExecutor,
    clock: Arc<dyn Clock>,
    refresh_buffer: chrono::Duration,
    refresh_path: String,
    inner: Mutex<Inner>,
}

impl SessionManager {
    /// Create a manager seeded from durable storage (legacy layouts included).
    pub fn new(
        store: TokenStore,
        executor: RequestExecutor,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let state = match StorageMigrator::new(&store).load(clock.now()) {
            Some(loaded) => SessionState::Authenticated(Tokens::from(loaded)),
            None => SessionState::NoSession,
        };
        let refresh_buffer =
            chrono::Duration::from_std(settings.refresh_buffer).unwrap_or(chrono::Duration::MAX);
        Arc::new(Self {
            store,
            executor,
            clock,
            refresh_buffer,
            refresh_path: settings.refresh_path,
            inner: Mutex::new(Inner {
                state,
                generation: 0,
                in_flight: None,
                next_refresh_id: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return an access token that is valid outside the buffer window,
    /// refreshing (or joining an in-flight refresh) when needed.
    pub async fn get_valid_access_token(self: &Arc<Self>) -> Option<String> {
        {
            let inner = self.lock();
            let now = self.now();
            match inner.state {
                SessionState::NoSession => return None,
                SessionState::Authenticated(ref tokens) => {
                    if let Some(token) = tokens.fresh_access_token(now, self.refresh_buffer) {
                        return Some(token.to_owned());
                    }
                    if let Some(token) = tokens.legacy_access_token(now) {
                        return Some(token.to_owned());
                    }
                }
            }
        }
        self.refresh().await.map(|creds| creds.auth_token)
    }

    /// Replacement for an access token the server rejected.
    ///
    /// A fresh token installed since `rejected` was handed out is reused;
    /// otherwise the session refreshes (or joins the refresh in flight).
    pub async fn renew_rejected(self: &Arc<Self>, rejected: Option<&str>) -> Option<String> {
        {
            let inner = self.lock();
            if let SessionState::Authenticated(ref tokens) = inner.state {
                let current = tokens.fresh_access_token(self.now(), self.refresh_buffer);
                if let Some(current) = current.filter(|&t| Some(t) != rejected) {
                    debug!("rejected token already replaced, reusing current one");
                    return Some(current.to_owned());
                }
            }
        }
        self.refresh().await.map(|creds| creds.auth_token)
    }

    /// Install a freshly issued token pair and persist the refresh half.
    pub fn set_credentials(&self, creds: &Credentials) {
        let mut inner = self.lock();
        self.install(&mut inner, creds);
    }

    fn install(&self, inner: &mut Inner, creds: &Credentials) {
        inner.state = SessionState::Authenticated(Tokens::from(creds));
        if let Err(e) = self.store.write_refresh_token(&creds.refresh_token, creds.refresh_token_exp)
        {
            warn!(err = %e, "failed to persist refresh token; session kept in memory only");
        }
        info!(
            access_expires_at = %creds.auth_token_exp,
            refresh_expires_at = %creds.refresh_token_exp,
            "session credentials installed"
        );
    }

    /// End the session: clear memory and durable storage.
    pub fn logout(&self) {
        let mut inner = self.lock();
        if inner.state != SessionState::NoSession {
            info!("session logged out");
        }
        self.end_session(&mut inner);
    }

    fn end_session(&self, inner: &mut Inner) {
        inner.state = SessionState::NoSession;
        inner.in_flight = None;
        inner.generation += 1;
        self.store.clear();
    }

    /// Exchange the refresh token for new credentials.
    ///
    /// Concurrent callers share one network call and observe the same
    /// result. Any failure ends the session.
    pub async fn refresh(self: &Arc<Self>) -> Option<Credentials> {
        let future = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let now = self.now();
            let refresh_token = match inner.state {
                SessionState::Authenticated(ref tokens) => {
                    tokens.usable_refresh_token(now).map(str::to_owned)
                }
                SessionState::NoSession => None,
            };
            let Some(refresh_token) = refresh_token else {
                if inner.state != SessionState::NoSession {
                    info!("refresh token missing or expired, login required");
                }
                self.end_session(inner);
                return None;
            };

            match inner.in_flight {
                Some(ref in_flight) => {
                    debug!(refresh_id = in_flight.id, "joining in-flight refresh");
                    in_flight.future.clone()
                }
                None => {
                    let id = inner.next_refresh_id;
                    inner.next_refresh_id += 1;
                    let request = ApiRequest::post(self.refresh_path.as_str())
                        .with_body(serde_json::json!({ "refreshToken": refresh_token }));
                    let future = run_refresh(
                        Arc::downgrade(self),
                        self.executor.clone(),
                        request,
                        inner.generation,
                        id,
                    )
                    .boxed()
                    .shared();
                    inner.in_flight = Some(InFlight { id, future: future.clone() });
                    future
                }
            }
        };
        future.await
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_refresh_token_expired(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            SessionState::Authenticated(ref tokens) => {
                tokens.usable_refresh_token(self.now()).is_none()
            }
            SessionState::NoSession => true,
        }
    }

    /// True when there is no access token or its known expiry has passed.
    pub fn is_access_token_expired(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            SessionState::Authenticated(Tokens { access_token: Some(_), access_token_exp, .. }) => {
                access_token_exp.is_some_and(|exp| self.now() >= exp)
            }
            _ => true,
        }
    }

    /// True when the access token is absent, expired, or inside the buffer window.
    pub fn should_refresh(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            SessionState::Authenticated(ref tokens) => {
                tokens.fresh_access_token(self.now(), self.refresh_buffer).is_none()
            }
            SessionState::NoSession => true,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot().status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        let now = self.now();
        match inner.state {
            SessionState::NoSession => SessionSnapshot {
                status: SessionStatus::NoSession,
                access_token_expires_at: None,
                refresh_token_expires_at: None,
                has_refresh_token: false,
            },
            SessionState::Authenticated(ref tokens) => {
                let status = if tokens.fresh_access_token(now, self.refresh_buffer).is_some() {
                    SessionStatus::Active
                } else if tokens.usable_refresh_token(now).is_some()
                    || tokens.legacy_access_token(now).is_some()
                {
                    SessionStatus::RefreshDue
                } else {
                    SessionStatus::NoSession
                };
                SessionSnapshot {
                    status,
                    access_token_expires_at: tokens.access_token_exp,
                    refresh_token_expires_at: tokens.refresh_token_exp,
                    has_refresh_token: tokens.refresh_token.is_some(),
                }
            }
        }
    }
}

/// Body of a shared refresh attempt.
///
/// Holds only a weak handle on the manager so a pending refresh never keeps
/// it alive.
async fn run_refresh(
    manager: Weak<SessionManager>,
    executor: RequestExecutor,
    request: ApiRequest,
    generation: u64,
    id: u64,
) -> Option<Credentials> {
    debug!(refresh_id = id, "refreshing session");
    let result = executor.execute::<Credentials>(&request, None).await;

    let manager = manager.upgrade()?;
    let mut inner = manager.lock();
    if inner.in_flight.as_ref().is_some_and(|f| f.id == id) {
        inner.in_flight = None;
    }
    if inner.generation != generation {
        debug!(refresh_id = id, "session ended during refresh, discarding result");
        return None;
    }

    match result {
        Ok(creds) => {
            manager.install(&mut inner, &creds);
            Some(creds)
        }
        Err(e) => {
            warn!(refresh_id = id, err = %e, "session refresh failed, login required");
            manager.end_session(&mut inner);
            None
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
