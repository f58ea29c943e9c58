// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single HTTP exchanges against the registration API.

pub mod envelope;

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::transport::envelope::{classify, parse_body};

/// HTTP verbs used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One request against an endpoint path, relative to the base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Request(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Attach a raw JSON value as the body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Install the process-wide rustls provider once; later calls are no-ops.
fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Performs timeout-bounded exchanges and classifies the responses.
#[derive(Clone)]
pub struct RequestExecutor {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        ensure_crypto_provider();
        let http = Client::builder().build().map_err(|e| ApiError::Request(e.to_string()))?;
        Ok(Self::with_client(http, base_url, timeout))
    }

    /// Use a caller-provided HTTP client (connection pool reuse, proxies).
    pub fn with_client(http: Client, base_url: &str, timeout: Duration) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_owned(), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Execute one exchange with an explicit (optional) bearer token.
    ///
    /// The whole exchange, body included, races the configured timeout. On
    /// timeout the in-flight request future is dropped, which aborts it.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<T, ApiError> {
        let value = match tokio::time::timeout(self.timeout, self.exchange(request, bearer)).await
        {
            Ok(result) => result?,
            Err(_) => {
                debug!(path = %request.path, timeout = ?self.timeout, "request timed out");
                return Err(ApiError::Timeout(self.timeout));
            }
        };
        serde_json::from_value(value).map_err(|e| {
            ApiError::MalformedResponse(format!("unexpected value for {}: {e}", request.path))
        })
    }

    async fn exchange(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<Value, ApiError> {
        let mut req = self.http.request(request.method.as_reqwest(), self.url(&request.path));
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        if let Some(ref body) = request.body {
            req = req.json(body);
        }
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        debug!(method = ?request.method, path = %request.path, status, "response received");

        let body = parse_body(status, &bytes)?;
        classify(status, body)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
