// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Facade wiring storage, session, and executor together.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::credential::session::{SessionManager, SessionSettings};
use crate::credential::store::{KeyValueStore, TokenStore};
use crate::credential::Credentials;
use crate::error::ApiError;
use crate::transport::{ApiRequest, RequestExecutor};

/// Authenticated client for the registration API.
pub struct ApiClient {
    executor: RequestExecutor,
    session: Arc<SessionManager>,
    login_path: String,
}

impl ApiClient {
    pub fn new(
        config: &SessionConfig,
        backend: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiError> {
        config.validate().map_err(|e| ApiError::Request(e.to_string()))?;
        let executor = RequestExecutor::new(&config.base_url, config.timeout())?;
        let store = TokenStore::new(backend, config.storage_keys());
        let session = SessionManager::new(
            store,
            executor.clone(),
            clock,
            SessionSettings {
                refresh_buffer: config.refresh_buffer(),
                refresh_path: config.refresh_path.clone(),
            },
        );
        Ok(Self { executor, session, login_path: config.login_path.clone() })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Exchange email and password for a new session.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(self.login_path.as_str())
            .with_body(json!({ "email": email, "password": password }));
        let creds: Credentials = self.executor.execute(&request, None).await?;
        self.session.set_credentials(&creds);
        info!("logged in");
        Ok(())
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    /// Execute an authenticated request.
    ///
    /// A 401 triggers one renewal and one retry with the new token. If no
    /// renewal is possible, or the retry is rejected again, the result is
    /// [`ApiError::SessionExpired`].
    pub async fn send<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let token = self.session.get_valid_access_token().await;
        match self.executor.execute(request, token.as_deref()).await {
            Err(ApiError::Auth(message)) => {
                debug!(path = %request.path, %message, "unauthorized, renewing once");
                let Some(renewed) = self.session.renew_rejected(token.as_deref()).await else {
                    return Err(ApiError::SessionExpired);
                };
                match self.executor.execute(request, Some(&renewed)).await {
                    Err(ApiError::Auth(_)) => Err(ApiError::SessionExpired),
                    other => other,
                }
            }
            other => other,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&ApiRequest::get(path)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(&ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(&ApiRequest::put(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&ApiRequest::delete(path)).await
    }
}
