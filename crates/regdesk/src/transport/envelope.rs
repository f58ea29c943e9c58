// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response classification for the `{isSuccess, status, error, value}`
//! envelope.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Uniform server response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub is_success: bool,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Parse a response body. An empty body on an error status yields `Null`
/// so classification can proceed on the status alone.
pub fn parse_body(status: u16, bytes: &[u8]) -> Result<Value, ApiError> {
    let is_blank = bytes.iter().all(u8::is_ascii_whitespace);
    if is_blank && !(200..300).contains(&status) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::MalformedResponse(format!("body is not JSON (status {status}): {e}")))
}

/// Map an HTTP status plus parsed body to the envelope value or a typed error.
pub fn classify(status: u16, body: Value) -> Result<Value, ApiError> {
    if (200..300).contains(&status) {
        let envelope: Envelope = serde_json::from_value(body)
            .map_err(|e| ApiError::MalformedResponse(format!("invalid envelope: {e}")))?;
        if envelope.is_success {
            return Ok(envelope.value.unwrap_or(Value::Null));
        }
        let status = envelope.status.unwrap_or(status);
        let message = envelope.error.as_ref().and_then(message_of).unwrap_or_else(|| {
            "request was not successful".to_owned()
        });
        return Err(ApiError::Api { status, message });
    }

    match status {
        400 => match field_errors(&body) {
            Some(fields) => Err(ApiError::Validation(fields)),
            None => Err(ApiError::Api { status, message: error_message(&body, status) }),
        },
        401 => Err(ApiError::Auth(error_message(&body, status))),
        _ => Err(ApiError::Api { status, message: error_message(&body, status) }),
    }
}

/// Extract `field -> first message` from a 400 body.
///
/// Looks at `errors` (problem-details style) and then at the envelope's
/// `error`, accepting either a string or a list of strings per field. An
/// object carrying a `message` is a single error, not a field map.
pub fn field_errors(body: &Value) -> Option<BTreeMap<String, String>> {
    let map = ["errors", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_object).filter(|m| is_field_map(m)))?;

    let fields: BTreeMap<String, String> = map
        .iter()
        .filter_map(|(field, messages)| {
            let first = match messages {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_owned)),
                _ => None,
            }?;
            Some((field.clone(), first))
        })
        .collect();

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn is_field_map(map: &Map<String, Value>) -> bool {
    !map.contains_key("message")
        && map.values().all(|messages| match messages {
            Value::String(_) => true,
            Value::Array(items) => items.iter().all(Value::is_string),
            _ => false,
        })
}

fn error_message(body: &Value, status: u16) -> String {
    ["error", "message", "detail", "title"]
        .iter()
        .find_map(|key| body.get(key).and_then(message_of))
        .unwrap_or_else(|| {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request failed")
                .to_owned()
        })
}

fn message_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
