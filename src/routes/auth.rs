use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};

use crate::{
    error::AuthError,
    models::{auth::AuthenticatedUser, user::LoginRequest, user::UserProfile},
    services::auth::SessionTokens,
    AppState,
};

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Extract a named cookie value from request headers.
fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|part| {
            let part = part.trim();
            part.strip_prefix(&prefix).map(|v| v.to_string())
        })
}

fn refresh_cookie(value: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{REFRESH_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Serialize the session body and attach the refresh cookie. The refresh
/// token travels only in the cookie, never in the JSON body.
fn session_response(tokens: SessionTokens, secure: bool) -> Response {
    let max_age = (tokens.refresh_expires_at - chrono::Utc::now())
        .num_seconds()
        .max(0);
    let body = serde_json::to_string(&tokens.response).unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::SET_COOKIE,
            refresh_cookie(&tokens.refresh_token, max_age, secure),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let tokens = state.auth.login(&body.email, &body.password).await?;
    Ok(session_response(tokens, state.config.cookie_secure))
}

/// Token refresh. The refresh token is read from the HTTP-only cookie only:
/// non-browser clients cannot use this endpoint, which is accepted.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let presented = get_cookie(&headers, REFRESH_COOKIE).ok_or(AuthError::Authentication)?;
    let tokens = state.auth.refresh(&presented).await?;
    Ok(session_response(tokens, state.config.cookie_secure))
}

/// Best-effort revocation. Always 200, always clears the cookie, even when
/// the token is unknown or already revoked.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(presented) = get_cookie(&headers, REFRESH_COOKIE) {
        if let Err(e) = state.auth.logout(&presented).await {
            tracing::warn!("logout revocation failed: {e}");
        }
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::SET_COOKIE,
            refresh_cookie("", 0, state.config.cookie_secure),
        )
        .body(Body::from(r#"{"message":"Logged out"}"#))
        .unwrap()
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserProfile>, AuthError> {
    let profile = state.auth.profile(user.user_id).await?;
    Ok(Json(profile))
}
