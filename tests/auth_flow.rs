//! End-to-end flows through the real router, backed by the in-memory stores.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Duration as ChronoDuration;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use gatehouse_backend::{
    config::Config,
    repositories::{InMemorySessionStore, InMemoryUserStore},
    routes::router,
    services::SessionManager,
    state::AppState,
    utils::{
        cookies::{extract_cookie_value, SameSite},
        jwt::TokenCodec,
        time::ManualClock,
    },
};

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "hunter2hunter2";

struct TestApp {
    app: Router,
    clock: Arc<ManualClock>,
}

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        jwt_secret: "integration-secret".to_string(),
        access_token_ttl_secs: 900,
        refresh_token_ttl_secs: 86400,
        sweep_interval_secs: 30,
        cookie_secure: false,
        cookie_same_site: SameSite::Lax,
    }
}

fn spawn_app() -> TestApp {
    let config = test_config();
    let codec = TokenCodec::new(&config.jwt_secret);
    let clock = Arc::new(ManualClock::from_now());
    let sessions = Arc::new(SessionManager::new(
        Arc::new(InMemorySessionStore::new()),
        codec.clone(),
        clock.clone(),
        ChronoDuration::seconds(config.access_token_ttl_secs as i64),
        ChronoDuration::seconds(config.refresh_token_ttl_secs as i64),
    ));
    let users = Arc::new(InMemoryUserStore::new());
    let state = AppState::new(sessions, users, codec, config);
    TestApp {
        app: router(state),
        clock,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> axum::response::Response {
    app.app.clone().oneshot(request).await.expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn register(app: &TestApp, email: &str) -> StatusCode {
    let response = send(
        app,
        json_post(
            "/api/auth/register",
            json!({"email": email, "password": PASSWORD, "display_name": "Alice"}),
        ),
    )
    .await;
    response.status()
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
    cookies
        .iter()
        .find_map(|cookie| extract_cookie_value(cookie, name))
        .filter(|value| !value.is_empty())
}

/// Logs in with the given user-agent and returns (access, refresh) cookie
/// values.
async fn login(app: &TestApp, email: &str, user_agent: &str) -> (String, String) {
    let mut request = json_post(
        "/api/auth/login",
        json!({"email": email, "password": PASSWORD}),
    );
    request
        .headers_mut()
        .insert(header::USER_AGENT, user_agent.parse().unwrap());
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    let access = cookie_value(&cookies, "access_token").expect("access cookie");
    let refresh = cookie_value(&cookies, "refresh_token").expect("refresh cookie");
    (access, refresh)
}

fn get_with_cookies(uri: &str, cookies: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::COOKIE, cookies)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn register_login_and_me_roundtrip() {
    let app = spawn_app();
    assert_eq!(register(&app, EMAIL).await, StatusCode::CREATED);

    // Duplicate registration is a conflict.
    assert_eq!(register(&app, EMAIL).await, StatusCode::CONFLICT);

    let response = send(
        &app,
        json_post(
            "/api/auth/login",
            json!({"email": EMAIL, "password": PASSWORD}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    for cookie in &cookies {
        assert!(cookie.contains("HttpOnly"), "cookie is httpOnly: {cookie}");
        assert!(cookie.contains("SameSite=Lax"), "same-site set: {cookie}");
    }
    let access = cookie_value(&cookies, "access_token").expect("access cookie");

    let response = send(
        &app,
        get_with_cookies("/api/auth/me", &format!("access_token={access}")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["email"], EMAIL);
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn register_validates_the_payload() {
    let app = spawn_app();
    let response = send(
        &app,
        json_post(
            "/api/auth/register",
            json!({"email": "not-an-email", "password": "short", "display_name": "x"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn login_rejects_bad_credentials_uniformly() {
    let app = spawn_app();
    register(&app, EMAIL).await;

    let wrong_password = send(
        &app,
        json_post(
            "/api/auth/login",
            json!({"email": EMAIL, "password": "not-the-password"}),
        ),
    )
    .await;
    let unknown_email = send(
        &app,
        json_post(
            "/api/auth/login",
            json!({"email": "nobody@example.com", "password": PASSWORD}),
        ),
    )
    .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);

    // Identical bodies: responses cannot be used to probe for accounts.
    let wrong_password = body_json(wrong_password).await;
    let unknown_email = body_json(unknown_email).await;
    assert_eq!(wrong_password, unknown_email);
    assert_eq!(wrong_password["error"], "Invalid email or password");
}

#[tokio::test]
async fn requests_without_credentials_are_unauthorized() {
    let app = spawn_app();
    let response = send(
        &app,
        Request::builder()
            .method("GET")
            .uri("/api/auth/me")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn idle_session_is_rejected_then_the_refresh_cookie_rotates_access() {
    let app = spawn_app();
    register(&app, EMAIL).await;
    let (access, refresh) = login(&app, EMAIL, "firefox").await;

    // Past the idle window the session no longer admits, even though the
    // access token itself still verifies.
    app.clock.advance(ChronoDuration::minutes(16));
    let response = send(
        &app,
        get_with_cookies("/api/auth/me", &format!("access_token={access}")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // The refresh cookie must survive this denial.
    assert!(set_cookies(&response).is_empty());

    // Retrying with only the refresh cookie reactivates the session and
    // sets a fresh access cookie on the response.
    let response = send(
        &app,
        get_with_cookies("/api/auth/me", &format!("refresh_token={refresh}")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    let new_access = cookie_value(&cookies, "access_token").expect("rotated access cookie");
    assert_ne!(new_access, access);

    // The rotated token admits directly.
    let response = send(
        &app,
        get_with_cookies("/api/auth/me", &format!("access_token={new_access}")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn failed_refresh_clears_both_cookies() {
    let app = spawn_app();
    let response = send(
        &app,
        get_with_cookies("/api/auth/me", "refresh_token=garbage"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|cookie| cookie.contains("Max-Age=0")));
}

#[tokio::test]
async fn logout_deactivates_the_session_and_clears_cookies() {
    let app = spawn_app();
    register(&app, EMAIL).await;
    let (access, _refresh) = login(&app, EMAIL, "firefox").await;

    let mut request = json_post("/api/auth/logout", json!({}));
    request.headers_mut().insert(
        header::COOKIE,
        format!("access_token={access}").parse().unwrap(),
    );
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert!(cookies.iter().all(|cookie| cookie.contains("Max-Age=0")));

    // The access token still verifies, but its session is gone.
    let response = send(
        &app,
        get_with_cookies("/api/auth/me", &format!("access_token={access}")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_all_spares_only_the_calling_device() {
    let app = spawn_app();
    register(&app, EMAIL).await;
    let (access_a, _) = login(&app, EMAIL, "firefox").await;
    let (access_b, _) = login(&app, EMAIL, "safari").await;

    let mut request = json_post("/api/auth/logout-all", json!({}));
    request.headers_mut().insert(
        header::COOKIE,
        format!("access_token={access_b}").parse().unwrap(),
    );
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sessions_deactivated"], 1);

    let denied = send(
        &app,
        get_with_cookies("/api/auth/me", &format!("access_token={access_a}")),
    )
    .await;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let admitted = send(
        &app,
        get_with_cookies("/api/auth/me", &format!("access_token={access_b}")),
    )
    .await;
    assert_eq!(admitted.status(), StatusCode::OK);
}

#[tokio::test]
async fn devices_listing_reports_each_fingerprint() {
    let app = spawn_app();
    register(&app, EMAIL).await;
    let (_, _) = login(&app, EMAIL, "firefox").await;
    let (access, _) = login(&app, EMAIL, "safari").await;

    let response = send(
        &app,
        get_with_cookies("/api/auth/devices", &format!("access_token={access}")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let devices = body.as_array().expect("device array");
    assert_eq!(devices.len(), 2);
    for device in devices {
        assert_eq!(device["active_sessions"], 1);
        assert!(device["user_agent"].is_string());
        assert!(device["last_activity_at"].is_string());
    }
}
