// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session behaviour against a mock registration API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use regdesk::clock::{Clock, ManualClock};
use regdesk::config::SessionConfig;
use regdesk::credential::store::{KeyValueStore, MemoryStore};
use regdesk::{ApiClient, ApiError, SessionStatus};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("fixture time")
}

/// Mock server state: call counters and failure switches.
#[derive(Default)]
struct Mock {
    refresh_calls: AtomicU32,
    login_calls: AtomicU32,
    profile_calls: AtomicU32,
    /// Remaining `/profile` requests to reject with 401.
    reject_profile: AtomicU32,
    refresh_fails: AtomicBool,
    /// Answer refresh with a 2xx envelope whose value is not credentials.
    refresh_malformed: AtomicBool,
    /// Bearer token `/profile` rejects for as long as it is set.
    revoked_token: Mutex<Option<String>>,
    refresh_delay_ms: AtomicU32,
    auth_headers: Mutex<Vec<Option<String>>>,
    login_bodies: Mutex<Vec<Value>>,
}

impl Mock {
    fn record_auth(&self, headers: &HeaderMap) -> Option<String> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.auth_headers.lock().expect("lock").push(auth.clone());
        auth
    }

    fn auth_headers(&self) -> Vec<Option<String>> {
        self.auth_headers.lock().expect("lock").clone()
    }
}

fn credentials_envelope(access: &str, refresh: &str) -> Value {
    json!({
        "isSuccess": true,
        "status": 200,
        "error": null,
        "value": {
            "authToken": access,
            "refreshToken": refresh,
            "authTokenExp": (start() + chrono::Duration::minutes(15)).to_rfc3339(),
            "refreshTokenExp": (start() + chrono::Duration::days(7)).to_rfc3339(),
        }
    })
}

async fn login(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    mock.login_calls.fetch_add(1, Ordering::SeqCst);
    mock.login_bodies.lock().expect("lock").push(body.clone());
    if body["password"] != "correct horse" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"isSuccess": false, "status": 401, "error": "Invalid credentials"})),
        );
    }
    (StatusCode::OK, Json(credentials_envelope("access-login", "refresh-login")))
}

async fn refresh(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let n = mock.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = mock.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(u64::from(delay))).await;
    }
    if mock.refresh_fails.load(Ordering::SeqCst) || body.get("refreshToken").is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"isSuccess": false, "status": 401, "error": "Invalid refresh token"})),
        );
    }
    if mock.refresh_malformed.load(Ordering::SeqCst) {
        return (
            StatusCode::OK,
            Json(json!({"isSuccess": true, "status": 200, "value": {"authToken": "half"}})),
        );
    }
    (StatusCode::OK, Json(credentials_envelope(&format!("access-{n}"), &format!("refresh-{n}"))))
}

async fn profile(State(mock): State<Arc<Mock>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    mock.profile_calls.fetch_add(1, Ordering::SeqCst);
    let auth = mock.record_auth(&headers);
    let rejected = mock
        .reject_profile
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    let revoked = mock
        .revoked_token
        .lock()
        .expect("lock")
        .as_ref()
        .is_some_and(|t| auth.as_deref() == Some(format!("Bearer {t}").as_str()));
    if rejected || revoked || auth.is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "token expired"})));
    }
    (
        StatusCode::OK,
        Json(json!({"isSuccess": true, "status": 200, "value": {"name": "Ada", "auth": auth}})),
    )
}

async fn public(State(mock): State<Arc<Mock>>, headers: HeaderMap) -> Json<Value> {
    mock.record_auth(&headers);
    Json(json!({"isSuccess": true, "status": 200, "value": ["meetup", "workshop"]}))
}

async fn create_event(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body.get("title").is_some() {
        return (StatusCode::OK, Json(json!({"isSuccess": true, "status": 200, "value": {"id": 7}})));
    }
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"isSuccess": false, "status": 400, "error": {"Title": ["Title is required"]}})),
    )
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(10)).await;
    Json(json!({"isSuccess": true, "status": 200, "value": null}))
}

async fn mock_api(mock: Arc<Mock>) -> SocketAddr {
    let app = Router::new()
        .route("/api/authentication/login", post(login))
        .route("/api/authentication/refresh", post(refresh))
        .route("/api/profile", get(profile))
        .route("/api/events", get(public).post(create_event))
        .route("/api/slow", get(slow))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

struct Harness {
    mock: Arc<Mock>,
    backend: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    client: ApiClient,
}

async fn harness_with(entries: Vec<(&str, String)>, timeout_ms: u64) -> anyhow::Result<Harness> {
    let mock = Arc::new(Mock::default());
    let addr = mock_api(Arc::clone(&mock)).await;
    let backend = Arc::new(MemoryStore::with_entries(entries));
    let clock = Arc::new(ManualClock::new(start()));
    let config = SessionConfig {
        base_url: format!("http://{addr}/api"),
        timeout_ms,
        ..SessionConfig::default()
    };
    let client = ApiClient::new(
        &config,
        Arc::clone(&backend) as Arc<dyn KeyValueStore>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    )?;
    Ok(Harness { mock, backend, clock, client })
}

async fn harness() -> anyhow::Result<Harness> {
    harness_with(vec![], 5_000).await
}

/// Storage seeded with a refresh token and no access token.
fn stored_refresh_token() -> Vec<(&'static str, String)> {
    let exp = (start() + chrono::Duration::days(3)).to_rfc3339();
    vec![("refresh_token", "\"refresh-seed\"".to_owned()), ("refresh_token_exp", format!("\"{exp}\""))]
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() -> anyhow::Result<()> {
    let h = harness_with(stored_refresh_token(), 5_000).await?;
    h.mock.refresh_delay_ms.store(50, Ordering::SeqCst);
    assert_eq!(h.client.session().status(), SessionStatus::RefreshDue);

    let calls = (0..8).map(|_| {
        let session = Arc::clone(h.client.session());
        async move { session.get_valid_access_token().await }
    });
    let tokens = futures_util::future::join_all(calls).await;

    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(tokens.iter().all(|t| t.as_deref() == Some("access-1")));
    assert_eq!(h.backend.get("refresh_token").as_deref(), Some("\"refresh-1\""));

    // Fresh token now; no further refresh.
    assert_eq!(h.client.session().get_valid_access_token().await.as_deref(), Some("access-1"));
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn token_inside_buffer_is_refreshed_proactively() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;

    // 15 minute token; 119 seconds left is inside the 120 second buffer.
    h.clock.advance(chrono::Duration::seconds(15 * 60 - 119));
    assert_eq!(h.client.session().get_valid_access_token().await.as_deref(), Some("access-1"));
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn expired_refresh_token_makes_no_call() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;
    h.clock.advance(chrono::Duration::days(8));

    assert_eq!(h.client.session().get_valid_access_token().await, None);

    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 0);
    assert!(h.backend.keys().is_empty());
    assert_eq!(h.client.session().status(), SessionStatus::NoSession);
    Ok(())
}

#[tokio::test]
async fn slow_request_times_out() -> anyhow::Result<()> {
    let h = harness_with(vec![], 50).await?;

    let started = Instant::now();
    let result = h.client.get::<Value>("/slow").await;
    let elapsed = started.elapsed();

    assert_eq!(result.err(), Some(ApiError::Timeout(Duration::from_millis(50))));
    assert!(elapsed >= Duration::from_millis(45), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "returned too late: {elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn unauthorized_request_is_retried_after_refresh() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;
    h.mock.reject_profile.store(1, Ordering::SeqCst);

    let profile: Value = h.client.get("/profile").await?;

    assert_eq!(profile["name"], "Ada");
    assert_eq!(h.mock.profile_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.mock.auth_headers(),
        vec![Some("Bearer access-login".to_owned()), Some("Bearer access-1".to_owned())]
    );
    Ok(())
}

#[tokio::test]
async fn second_unauthorized_is_session_expired() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;
    h.mock.reject_profile.store(2, Ordering::SeqCst);

    let result = h.client.get::<Value>("/profile").await;

    assert_eq!(result.err(), Some(ApiError::SessionExpired));
    assert_eq!(h.mock.profile_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    // The refreshed credentials are kept.
    assert_eq!(h.client.session().status(), SessionStatus::Active);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_ends_session() -> anyhow::Result<()> {
    let h = harness_with(stored_refresh_token(), 5_000).await?;
    h.mock.refresh_fails.store(true, Ordering::SeqCst);

    assert_eq!(h.client.session().get_valid_access_token().await, None);

    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(h.backend.keys().is_empty());
    assert_eq!(h.client.session().status(), SessionStatus::NoSession);
    Ok(())
}

#[tokio::test]
async fn unauthorized_without_session_is_session_expired() -> anyhow::Result<()> {
    let h = harness().await?;

    let result = h.client.get::<Value>("/profile").await;

    assert_eq!(result.err(), Some(ApiError::SessionExpired));
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn logout_stops_token_use() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;

    h.client.logout();

    assert_eq!(h.client.session().get_valid_access_token().await, None);
    let events: Vec<String> = h.client.get("/events").await?;
    assert_eq!(events, vec!["meetup", "workshop"]);
    assert_eq!(h.mock.auth_headers(), vec![None]);
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 0);
    assert!(h.backend.keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn logout_wins_over_in_flight_refresh() -> anyhow::Result<()> {
    let h = harness_with(stored_refresh_token(), 5_000).await?;
    h.mock.refresh_delay_ms.store(200, Ordering::SeqCst);

    let session = Arc::clone(h.client.session());
    let pending = tokio::spawn(async move { session.get_valid_access_token().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.client.logout();

    assert_eq!(pending.await?, None);
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.client.session().status(), SessionStatus::NoSession);
    assert!(h.backend.keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn login_installs_and_persists_credentials() -> anyhow::Result<()> {
    let h = harness().await?;

    h.client.login("ada@example.com", "correct horse").await?;

    let bodies = h.mock.login_bodies.lock().expect("lock").clone();
    assert_eq!(bodies, vec![json!({"email": "ada@example.com", "password": "correct horse"})]);
    assert_eq!(h.client.session().status(), SessionStatus::Active);
    assert_eq!(h.backend.get("refresh_token").as_deref(), Some("\"refresh-login\""));
    assert_eq!(
        h.backend.get("refresh_token_exp").as_deref(),
        Some("\"2026-03-08T12:00:00.000Z\"")
    );
    assert!(h.backend.keys().iter().all(|k| !h.backend.get(k).is_some_and(|v| v.contains("access-login"))));
    Ok(())
}

#[tokio::test]
async fn rejected_login_reports_auth_error() -> anyhow::Result<()> {
    let h = harness().await?;

    let result = h.client.login("ada@example.com", "wrong").await;

    assert_eq!(result.err(), Some(ApiError::Auth("Invalid credentials".into())));
    assert_eq!(h.client.session().status(), SessionStatus::NoSession);
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn validation_errors_carry_field_messages() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;

    let result = h.client.post::<Value, _>("/events", &json!({"venue": "Hall A"})).await;
    let err = result.err().ok_or_else(|| anyhow::anyhow!("expected validation error"))?;
    assert_eq!(
        err.field_errors().and_then(|f| f.get("Title")).map(String::as_str),
        Some("Title is required")
    );

    let created: Value = h.client.post("/events", &json!({"title": "Rust meetup"})).await?;
    assert_eq!(created["id"], 7);
    Ok(())
}

#[tokio::test]
async fn timed_out_refresh_ends_session() -> anyhow::Result<()> {
    let h = harness_with(stored_refresh_token(), 100).await?;
    h.mock.refresh_delay_ms.store(400, Ordering::SeqCst);

    assert_eq!(h.client.session().get_valid_access_token().await, None);

    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(h.backend.keys().is_empty());
    assert_eq!(h.client.session().status(), SessionStatus::NoSession);
    Ok(())
}

#[tokio::test]
async fn malformed_refresh_payload_ends_session() -> anyhow::Result<()> {
    let h = harness_with(stored_refresh_token(), 5_000).await?;
    h.mock.refresh_malformed.store(true, Ordering::SeqCst);

    assert_eq!(h.client.session().refresh().await, None);

    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(h.backend.keys().is_empty());
    assert_eq!(h.client.session().status(), SessionStatus::NoSession);
    Ok(())
}

#[tokio::test]
async fn session_recovers_after_failed_refresh() -> anyhow::Result<()> {
    let h = harness_with(stored_refresh_token(), 5_000).await?;
    h.mock.refresh_fails.store(true, Ordering::SeqCst);
    assert_eq!(h.client.session().get_valid_access_token().await, None);

    h.mock.refresh_fails.store(false, Ordering::SeqCst);
    h.client.login("ada@example.com", "correct horse").await?;

    let refreshed = h.client.session().refresh().await.map(|c| c.auth_token);
    assert_eq!(refreshed.as_deref(), Some("access-2"));
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.client.session().status(), SessionStatus::Active);
    assert_eq!(h.backend.get("refresh_token").as_deref(), Some("\"refresh-2\""));
    Ok(())
}

#[tokio::test]
async fn replaced_token_is_reused_without_second_refresh() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;
    let session = h.client.session();

    assert_eq!(session.refresh().await.map(|c| c.auth_token).as_deref(), Some("access-1"));
    assert_eq!(session.renew_rejected(Some("access-login")).await.as_deref(), Some("access-1"));
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);

    assert_eq!(session.renew_rejected(Some("access-1")).await.as_deref(), Some("access-2"));
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_rejections_share_one_renewal() -> anyhow::Result<()> {
    let h = harness().await?;
    h.client.login("ada@example.com", "correct horse").await?;
    *h.mock.revoked_token.lock().expect("lock") = Some("access-login".to_owned());

    let (a, b) = tokio::join!(h.client.get::<Value>("/profile"), h.client.get::<Value>("/profile"));

    assert_eq!(a?["name"], "Ada");
    assert_eq!(b?["name"], "Ada");
    assert_eq!(h.mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.mock.profile_calls.load(Ordering::SeqCst), 4);
    Ok(())
}
