// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use credential::session::SessionManager;
pub use credential::{Credentials, SessionSnapshot, SessionStatus};
pub use error::ApiError;
