// Integration tests for the session token manager
//
// These tests drive the public API against a mock auth server and a real
// SQLite store, the way a client application would.

use chrono::{Duration, TimeZone, Utc};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use taskdeck_session::{
    auth::{
        AuthClient, AuthResponse, ManualClock, RefreshOutcome, SessionManager, SessionStatus,
        SessionWatcher, LEGACY_TOKEN_KEY, SESSION_KEY,
    },
    store::{KeyValueStore, MemoryStore, SqliteStore},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn start_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap())
}

fn new_manager(
    base_url: &str,
    store: Arc<dyn KeyValueStore>,
    clock: &ManualClock,
) -> SessionManager {
    let client = AuthClient::new(base_url, StdDuration::from_secs(5))
        .expect("Failed to create auth client");
    SessionManager::with_clock(store, client, 10, Arc::new(clock.clone()))
}

fn bundle(access: &str, refresh: &str, expires_in: u64) -> String {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "user_id": 42,
        "user_email": "u@x.com",
        "role": "member"
    })
    .to_string()
}

fn temp_db() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("taskdeck-it-{}.sqlite3", uuid::Uuid::new_v4()))
}

// ==================================================================================================
// Login / Logout
// ==================================================================================================

#[tokio::test]
async fn test_login_establishes_session() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/auth/login")
        .match_body(Matcher::Json(json!({ "email": "u@x.com", "password": "pw" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(bundle("a1", "r1", 3600))
        .create_async()
        .await;

    let clock = start_clock();
    let manager = new_manager(&server.url(), Arc::new(MemoryStore::new()), &clock);

    manager.login("u@x.com", "pw").await.unwrap();

    assert!(manager.is_authenticated());
    assert_eq!(manager.get_access_token().as_deref(), Some("a1"));
    assert_eq!(manager.get_user_id(), Some(42));
    assert!(!manager.is_token_expired());

    clock.advance(Duration::seconds(3601));
    assert!(manager.is_token_expired());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_login_leaves_previous_session() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/login")
        .with_status(401)
        .with_body(r#"{"message":"bad credentials"}"#)
        .create_async()
        .await;

    let clock = start_clock();
    let manager = new_manager(&server.url(), Arc::new(MemoryStore::new()), &clock);
    let existing: AuthResponse = serde_json::from_str(&bundle("a0", "r0", 3600)).unwrap();
    manager.set_tokens(&existing, None).unwrap();

    assert!(manager.login("u@x.com", "wrong").await.is_err());
    assert_eq!(manager.get_access_token().as_deref(), Some("a0"));
}

#[tokio::test]
async fn test_logout_twice() {
    let clock = start_clock();
    let store = Arc::new(MemoryStore::new());
    let manager = new_manager("http://127.0.0.1:9", store.clone(), &clock);
    let response: AuthResponse = serde_json::from_str(&bundle("a1", "r1", 3600)).unwrap();
    manager.set_tokens(&response, None).unwrap();

    manager.clear_tokens();
    manager.clear_tokens();

    assert!(!manager.has_tokens());
    assert!(!manager.is_authenticated());
    assert_eq!(store.get(SESSION_KEY).unwrap(), None);
}

// ==================================================================================================
// Persistence
// ==================================================================================================

#[tokio::test]
async fn test_session_restored_after_restart() {
    let path = temp_db();
    let clock = start_clock();

    let original = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let manager = new_manager("http://127.0.0.1:9", store, &clock);
        let response: AuthResponse = serde_json::from_str(&bundle("a1", "r1", 600)).unwrap();
        manager.set_tokens(&response, None).unwrap();
        manager.snapshot().unwrap()
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let restored = new_manager("http://127.0.0.1:9", store, &clock);

    assert_eq!(restored.snapshot(), Some(original));
    assert!(restored.is_authenticated());

    clock.advance(Duration::seconds(590));
    assert!(restored.is_token_expired());

    drop(restored);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_legacy_and_malformed_state_discarded() {
    let path = temp_db();
    {
        let store = SqliteStore::open(&path).unwrap();
        store.set(LEGACY_TOKEN_KEY, "old-bare-token").unwrap();
        store.set(SESSION_KEY, "{\"accessToken\":").unwrap();
    }

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let manager = new_manager("http://127.0.0.1:9", store.clone(), &start_clock());

    assert!(!manager.has_tokens());
    assert_eq!(store.get(LEGACY_TOKEN_KEY).unwrap(), None);
    assert_eq!(store.get(SESSION_KEY).unwrap(), None);

    drop(manager);
    drop(store);
    let _ = std::fs::remove_file(&path);
}

// ==================================================================================================
// Refresh
// ==================================================================================================

#[tokio::test]
async fn test_many_callers_one_refresh() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/auth/refresh")
        .match_body(Matcher::PartialJson(json!({ "refreshToken": "r1" })))
        .with_status(200)
        .with_body(bundle("a2", "r2", 3600))
        .expect(1)
        .create_async()
        .await;

    let clock = start_clock();
    let manager = new_manager(&server.url(), Arc::new(MemoryStore::new()), &clock);
    let response: AuthResponse = serde_json::from_str(&bundle("a1", "r1", 3600)).unwrap();
    manager.set_tokens(&response, None).unwrap();
    clock.advance(Duration::seconds(3595));

    let tokens =
        futures::future::join_all((0..16).map(|_| manager.get_valid_access_token())).await;

    assert!(tokens.iter().all(|t| t.as_deref() == Some("a2")));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rotated_refresh_token_used_next_time() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", "/auth/refresh")
        .match_body(Matcher::PartialJson(json!({ "refreshToken": "r1" })))
        .with_status(200)
        .with_body(bundle("a2", "r2", 3600))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/auth/refresh")
        .match_body(Matcher::PartialJson(json!({ "refreshToken": "r2" })))
        .with_status(200)
        .with_body(bundle("a3", "r3", 3600))
        .expect(1)
        .create_async()
        .await;

    let clock = start_clock();
    let manager = new_manager(&server.url(), Arc::new(MemoryStore::new()), &clock);
    let response: AuthResponse = serde_json::from_str(&bundle("a1", "r1", 3600)).unwrap();
    manager.set_tokens(&response, None).unwrap();

    assert!(manager.refresh_access_token().await);
    assert!(manager.refresh_access_token().await);
    assert_eq!(manager.get_access_token().as_deref(), Some("a3"));

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_server_error_ends_session() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/refresh")
        .with_status(503)
        .create_async()
        .await;

    let clock = start_clock();
    let manager = new_manager(&server.url(), Arc::new(MemoryStore::new()), &clock);
    let response: AuthResponse = serde_json::from_str(&bundle("a1", "r1", 3600)).unwrap();
    manager.set_tokens(&response, None).unwrap();

    let outcome = manager.refresh().await;
    assert!(outcome.is_retryable());
    assert!(matches!(outcome, RefreshOutcome::Unavailable { .. }));
    assert!(!manager.has_tokens());
    assert_eq!(manager.get_access_token(), None);
}

// ==================================================================================================
// Watcher
// ==================================================================================================

#[tokio::test]
async fn test_watcher_reports_sign_out() {
    let clock = start_clock();
    let manager = new_manager("http://127.0.0.1:9", Arc::new(MemoryStore::new()), &clock);
    let response: AuthResponse = serde_json::from_str(&bundle("a1", "r1", 3600)).unwrap();
    manager.set_tokens(&response, None).unwrap();

    let watcher = SessionWatcher::spawn(manager.clone(), StdDuration::from_secs(3600));
    let mut rx = watcher.subscribe();
    assert!(matches!(
        watcher.status(),
        SessionStatus::Authenticated { .. }
    ));

    tokio::time::sleep(StdDuration::from_millis(50)).await;
    manager.clear_tokens();
    watcher.nudge();

    tokio::time::timeout(StdDuration::from_secs(5), rx.changed())
        .await
        .expect("no status change")
        .unwrap();
    assert_eq!(*rx.borrow(), SessionStatus::SignedOut);

    watcher.shutdown().await;
}
