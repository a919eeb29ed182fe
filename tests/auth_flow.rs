use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use manabi_api::{
    config::Config,
    error::AuthError,
    models::user::{LoginResponse, RefreshTokenRecord},
    router,
    services::{auth::AuthService, token::TokenCodec},
    store::{MemoryStore, RefreshTokenStore},
    AppState,
};

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        jwt_secret: "test-access-secret".into(),
        jwt_refresh_secret: "test-refresh-secret".into(),
        jwt_expiry_seconds: 900,
        jwt_refresh_expiry_days: 7,
        host: "127.0.0.1".into(),
        port: 0,
        app_base_url: "http://localhost:3000".into(),
        cookie_secure: false,
    }
}

fn test_app() -> (Router, Arc<MemoryStore>, AppState) {
    let store = Arc::new(MemoryStore::new());
    store.add_user("admin@example.com", "admin-pass", "admin", "Aki", "Tanaka");
    store.add_user("parent@example.com", "parent-pass", "parent", "Hana", "Sato");
    let child = store.add_user("child@example.com", "child-pass", "child", "Taro", "Sato");
    store.add_child_profile(child);

    let config = Arc::new(test_config());
    let codec = TokenCodec::from_config(&config);
    let auth = Arc::new(AuthService::new(store.clone(), store.clone(), codec));
    let state = AppState {
        auth,
        config: config.clone(),
    };
    (router(state.clone()), store, state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<(String, String)>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn login_request(email: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "email": email, "password": password }).to_string(),
        ))
        .unwrap()
}

/// Pull the `refresh_token` value out of a Set-Cookie header list.
fn refresh_cookie_value(headers: &[(String, String)]) -> Option<String> {
    headers.iter().find_map(|(name, value)| {
        if name != "set-cookie" {
            return None;
        }
        value
            .split(';')
            .next()?
            .strip_prefix("refresh_token=")
            .map(|v| v.to_string())
    })
}

async fn login(app: &Router, email: &str, password: &str) -> (LoginResponse, String) {
    let (status, headers, body) = send(app, login_request(email, password)).await;
    assert_eq!(status, StatusCode::OK);
    let response: LoginResponse = serde_json::from_value(body).unwrap();
    let cookie = refresh_cookie_value(&headers).expect("login sets the refresh cookie");
    (response, cookie)
}

fn bearer_get(path: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn cookie_post(path: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::COOKIE, format!("refresh_token={cookie}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn login_returns_access_token_and_sets_refresh_cookie() {
    let (app, store, _) = test_app();

    let (response, _cookie) = login(&app, "parent@example.com", "parent-pass").await;
    assert!(!response.access_token.is_empty());
    assert_eq!(response.user.email, "parent@example.com");
    assert_eq!(store.active_session_count(), 1);

    // Cookie attributes: HTTP-only, lax, whole-site.
    let (_, headers, _) = send(&app, login_request("parent@example.com", "parent-pass")).await;
    let set_cookie = headers
        .iter()
        .find(|(name, _)| name == "set-cookie")
        .map(|(_, v)| v.clone())
        .unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Path=/"));
}

#[tokio::test]
async fn bad_credentials_fail_identically() {
    let (app, _, _) = test_app();

    let (wrong_pw, _, body_a) = send(&app, login_request("parent@example.com", "nope")).await;
    let (unknown, _, body_b) = send(&app, login_request("ghost@example.com", "nope")).await;

    assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    // Same status, same body: no user-enumeration oracle.
    assert_eq!(body_a, body_b);
}

#[tokio::test]
async fn protected_endpoint_requires_valid_bearer() {
    let (app, _, _) = test_app();

    let (status, _, _) = send(
        &app,
        Request::builder()
            .method("GET")
            .uri("/auth/me")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, bearer_get("/auth/me", "not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_returns_the_authenticated_profile() {
    let (app, _, _) = test_app();
    let (response, _) = login(&app, "parent@example.com", "parent-pass").await;

    let (status, _, body) = send(&app, bearer_get("/auth/me", &response.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "parent@example.com");
    assert_eq!(body["role"], "parent");
}

#[tokio::test]
async fn child_sessions_carry_the_learning_profile_id() {
    let (app, _, _) = test_app();
    let (response, cookie) = login(&app, "child@example.com", "child-pass").await;
    assert!(response.user.child_profile_id.is_some());

    // The enrichment survives refresh as well.
    let (status, _, body) = send(&app, cookie_post("/auth/refresh", &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["user"]["child_profile_id"].is_string());
}

#[tokio::test]
async fn tampered_access_token_is_rejected() {
    let (app, _, _) = test_app();
    let (response, _) = login(&app, "parent@example.com", "parent-pass").await;

    let token = response.access_token;
    let (head, sig) = token.rsplit_once('.').unwrap();
    let flipped = if sig.starts_with('A') { "B" } else { "A" };
    let tampered = format!("{head}.{flipped}{}", &sig[1..]);

    let (status, _, _) = send(&app, bearer_get("/auth/me", &tampered)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_listing_distinguishes_403_from_401() {
    let (app, _, _) = test_app();

    let (no_token, _, _) = send(
        &app,
        Request::builder()
            .method("GET")
            .uri("/admin/users")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(no_token, StatusCode::UNAUTHORIZED);

    let (parent, _) = login(&app, "parent@example.com", "parent-pass").await;
    let (forbidden, _, _) = send(&app, bearer_get("/admin/users", &parent.access_token)).await;
    assert_eq!(forbidden, StatusCode::FORBIDDEN);

    let (admin, _) = login(&app, "admin@example.com", "admin-pass").await;
    let (ok, _, body) = send(&app, bearer_get("/admin/users", &admin.access_token)).await;
    assert_eq!(ok, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn refresh_rotates_the_session() {
    let (app, store, _) = test_app();
    let (_, cookie) = login(&app, "parent@example.com", "parent-pass").await;

    let (status, headers, body) = send(&app, cookie_post("/auth/refresh", &cookie)).await;
    assert_eq!(status, StatusCode::OK);

    let new_cookie = refresh_cookie_value(&headers).expect("refresh sets a new cookie");
    assert_ne!(new_cookie, cookie);

    // The fresh access token works.
    let access = body["access_token"].as_str().unwrap();
    let (status, _, _) = send(&app, bearer_get("/auth/me", access)).await;
    assert_eq!(status, StatusCode::OK);

    // One live session, two records (the rotated-away one is revoked).
    assert_eq!(store.active_session_count(), 1);
    assert_eq!(store.session_count(), 2);

    // Replaying the rotated-away cookie is reuse, rejected.
    let (status, _, _) = send(&app, cookie_post("/auth/refresh", &cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The rotated session itself is still healthy.
    let (status, _, _) = send(&app, cookie_post("/auth/refresh", &new_cookie)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_without_cookie_is_unauthorized() {
    let (app, _, _) = test_app();
    let (status, _, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/auth/refresh")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_and_is_idempotent() {
    let (app, store, _) = test_app();
    let (_, cookie) = login(&app, "parent@example.com", "parent-pass").await;

    let (status, headers, _) = send(&app, cookie_post("/auth/logout", &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let cleared = headers
        .iter()
        .find(|(name, _)| name == "set-cookie")
        .map(|(_, v)| v.clone())
        .unwrap();
    assert!(cleared.contains("Max-Age=0"));
    assert_eq!(store.active_session_count(), 0);

    // The revoked cookie can no longer refresh.
    let (status, _, _) = send(&app, cookie_post("/auth/refresh", &cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Logging out again with the same dead cookie still succeeds.
    let (status, _, _) = send(&app, cookie_post("/auth/logout", &cookie)).await;
    assert_eq!(status, StatusCode::OK);

    // As does logging out with no cookie at all.
    let (status, _, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/auth/logout")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn revoke_all_sessions_kills_every_login() {
    let (app, _, state) = test_app();
    let (response, cookie_a) = login(&app, "parent@example.com", "parent-pass").await;
    let (_, cookie_b) = login(&app, "parent@example.com", "parent-pass").await;

    state
        .auth
        .revoke_all_sessions(response.user.id)
        .await
        .unwrap();

    for cookie in [cookie_a, cookie_b] {
        let (status, _, _) = send(&app, cookie_post("/auth/refresh", &cookie)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn duplicate_session_id_is_a_conflict() {
    let store = MemoryStore::new();
    let record = RefreshTokenRecord {
        jti: "fixed-jti".into(),
        user_id: Uuid::new_v4(),
        token: "token-a".into(),
        expires_at: chrono::Utc::now() + chrono::Duration::days(7),
        revoked: false,
        created_at: chrono::Utc::now(),
    };

    store.issue(record.clone()).await.unwrap();
    let duplicate = RefreshTokenRecord {
        token: "token-b".into(),
        ..record
    };
    assert!(matches!(
        store.issue(duplicate).await,
        Err(AuthError::Conflict)
    ));
}
