//! Session lifecycle over the HTTP surface: cookie issuance, persistence,
//! mutation via /session/set and TTL sweep.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use goodoo::config::Settings;
use goodoo::handlers::StaticAuthBackend;
use goodoo::logging::{LoggerLevels, LoggerRegistry};
use goodoo::server::{build_state, create_router};
use goodoo::session::{FilesystemSessionStore, SessionStore};

fn test_settings(session_dir: &std::path::Path) -> Settings {
    Settings {
        host: "127.0.0.1".to_string(),
        port: 8080,
        log_level: "critical".to_string(),
        log_file: String::new(),
        log_db: String::new(),
        log_db_level: "warning".to_string(),
        syslog: String::new(),
        log_handler: ":CRITICAL".to_string(),
        session_dir: session_dir.display().to_string(),
        session_cookie: "goodoo_session".to_string(),
        default_db: "demo".to_string(),
        db_host: "localhost".to_string(),
        db_port: 5432,
        db_user: "postgres".to_string(),
        db_password: String::new(),
        db_name: String::new(),
        db_sslmode: "prefer".to_string(),
        db_maxconn: 8,
        pgappname: "goodoo-{pid}".to_string(),
    }
}

async fn test_router(dir: &std::path::Path) -> (Router, Arc<FilesystemSessionStore>) {
    let store = Arc::new(FilesystemSessionStore::new(dir, true).unwrap());
    let state = build_state(
        test_settings(dir),
        LoggerRegistry::new(LoggerLevels::new()),
        store.clone(),
        Arc::new(StaticAuthBackend::with_admin()),
    )
    .await
    .unwrap();
    (create_router(state), store)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn cookie_pair(response: &axum::response::Response) -> Option<(String, String)> {
    let raw = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    let pair = raw.split(';').next()?;
    let (name, value) = pair.trim().split_once('=')?;
    Some((name.to_string(), value.to_string()))
}

fn session_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect()
}

#[tokio::test]
async fn test_first_request_issues_cookie_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _store) = test_router(dir.path()).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let (name, sid) = cookie_pair(&response).expect("first request must set a cookie");
    assert_eq!(name, "goodoo_session");
    assert_eq!(sid.len(), 64);
    assert!(sid.chars().all(|c| c.is_ascii_hexdigit()));

    // Cookie attributes.
    let raw = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(raw.contains("HttpOnly"));
    assert!(raw.contains("SameSite=Lax"));
    assert!(raw.contains("Max-Age=86400"));
    assert!(raw.contains("Path=/"));
    assert!(!raw.contains("Secure"));

    assert_eq!(session_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_existing_cookie_is_not_reissued() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _store) = test_router(dir.path()).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (name, sid) = cookie_pair(&response).unwrap();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::COOKIE, format!("{}={}", name, sid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(session_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_session_set_updates_file() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _store) = test_router(dir.path()).await;

    // Authenticate to reach the protected session endpoints.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"login": "admin", "password": "admin"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let (name, sid) = cookie_pair(&response).unwrap();
    let cookie = format!("{}={}", name, sid);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/session/set")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"key": "lang", "value": "fr_FR"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["key"], "lang");

    let file = dir.path().join(format!("{}.json", sid));
    let contents = std::fs::read_to_string(&file).unwrap();
    assert!(contents.contains("fr_FR"));

    // The dump reflects the stored value.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sid"], sid.as_str());
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["db"], "demo");
}

#[tokio::test]
async fn test_sweep_expires_stale_session_and_reissues_cookie() {
    let dir = tempfile::tempdir().unwrap();
    let (router, store) = test_router(dir.path()).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (name, sid) = cookie_pair(&response).unwrap();
    assert_eq!(session_files(dir.path()).len(), 1);

    // Simulate expiry: a zero-age sweep removes everything on disk.
    assert_eq!(store.cleanup(Duration::ZERO).unwrap(), 1);
    assert!(session_files(dir.path()).is_empty());

    // The stale cookie no longer matches a stored session; a fresh one is
    // allocated and a new cookie set.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::COOKIE, format!("{}={}", name, sid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let (_, new_sid) = cookie_pair(&response).expect("stale cookie must be replaced");
    assert_ne!(new_sid, sid);
    assert_eq!(session_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_clear_session_resets_state() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _store) = test_router(dir.path()).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"login": "admin", "password": "admin"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let (name, sid) = cookie_pair(&response).unwrap();
    let cookie = format!("{}={}", name, sid);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/session/clear")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Cleared session is unauthenticated again.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_db_set_switches_session_binding() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _store) = test_router(dir.path()).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"login": "admin", "password": "admin"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let (name, sid) = cookie_pair(&response).unwrap();
    let cookie = format!("{}={}", name, sid);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/db/set")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"database": "tenant2"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["db"], "tenant2");
}
