// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line surface of the `regdesk` binary.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::client::ApiClient;
use crate::clock::SystemClock;
use crate::config::SessionConfig;
use crate::credential::store::FileStore;
use crate::error::ApiError;
use crate::transport::ApiRequest;

/// Session-aware client for the event registration API.
#[derive(Debug, Parser)]
#[command(name = "regdesk", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionConfig,

    /// Log filter (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "warn", env = "REGDESK_LOG", global = true)]
    pub log_level: String,

    /// Log format: text or json.
    #[arg(long, default_value = "text", env = "REGDESK_LOG_FORMAT", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the refresh token.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "REGDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the session and clear stored tokens.
    Logout,
    /// Show session state without contacting the server.
    Status,
    /// Force a token refresh.
    Refresh,
    /// GET an endpoint.
    Get {
        path: String,
        /// Query parameter as key=value (repeatable).
        #[arg(long = "query", short = 'q', value_parser = parse_query)]
        query: Vec<(String, String)>,
    },
    /// POST a JSON body to an endpoint.
    Post {
        path: String,
        #[arg(long)]
        data: Option<String>,
    },
    /// PUT a JSON body to an endpoint.
    Put {
        path: String,
        #[arg(long)]
        data: Option<String>,
    },
    /// DELETE an endpoint.
    Delete { path: String },
}

/// Parse a `key=value` query pair.
pub fn parse_query(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn with_data(request: ApiRequest, data: Option<&str>) -> anyhow::Result<ApiRequest> {
    match data {
        Some(raw) => {
            let body: Value = serde_json::from_str(raw).context("--data is not valid JSON")?;
            Ok(request.with_body(body))
        }
        None => Ok(request),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Execute one CLI command against a file-backed session.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let storage_path = cli.session.storage_path();
    debug!(path = %storage_path.display(), "opening session storage");
    let backend = FileStore::open(&storage_path)
        .with_context(|| format!("failed to open {}", storage_path.display()))?;
    let client = ApiClient::new(&cli.session, Arc::new(backend), Arc::new(SystemClock))?;

    let request = match cli.command {
        Command::Login { email, password } => {
            client.login(&email, &password).await?;
            return print_json(&client.session().snapshot());
        }
        Command::Logout => {
            client.logout();
            return print_json(&client.session().snapshot());
        }
        Command::Status => return print_json(&client.session().snapshot()),
        Command::Refresh => {
            if client.session().refresh().await.is_none() {
                return Err(ApiError::SessionExpired.into());
            }
            return print_json(&client.session().snapshot());
        }
        Command::Get { path, query } => {
            query.into_iter().fold(ApiRequest::get(path), |req, (k, v)| req.query(k, v))
        }
        Command::Post { path, data } => with_data(ApiRequest::post(path), data.as_deref())?,
        Command::Put { path, data } => with_data(ApiRequest::put(path), data.as_deref())?,
        Command::Delete { path } => ApiRequest::delete(path),
    };

    let value: Value = client.send(&request).await?;
    print_json(&value)
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
