// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::time::Duration;

/// Errors raised by a single API exchange or by the session facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No response within the request budget.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Transport failure before any response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// Body was not JSON, or the envelope/value had the wrong shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// 400 with a per-field error map (field -> first message).
    #[error("validation failed: {}", summarize(.0))]
    Validation(BTreeMap<String, String>),

    /// 401 from the server.
    #[error("unauthorized: {0}")]
    Auth(String),

    /// Any other failure reported by the server.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Refresh was impossible, or the server kept rejecting a fresh token.
    #[error("session expired, login required")]
    SessionExpired,

    /// The request could not be built (bad body, bad client setup).
    #[error("invalid request: {0}")]
    Request(String),
}

impl ApiError {
    /// Stable machine-readable code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "TIMEOUT",
            Self::Network(_) => "NETWORK",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::Validation(_) => "VALIDATION",
            Self::Auth(_) => "UNAUTHORIZED",
            Self::Api { .. } => "API_ERROR",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Request(_) => "INVALID_REQUEST",
        }
    }

    /// HTTP status that produced this error, when one was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Validation(_) => Some(400),
            Self::Auth(_) => Some(401),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Per-field messages for validation failures.
    pub fn field_errors(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Validation(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Request(e.to_string())
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

fn summarize(fields: &BTreeMap<String, String>) -> String {
    fields.iter().map(|(field, msg)| format!("{field}: {msg}")).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
