use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Fatal startup errors. Raised once while loading configuration,
/// never per-request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for env var {0}")]
    InvalidVar(&'static str),
}

/// Server-side auth failures. Handlers match on the variant, never on the
/// message text; the HTTP mapping lives in the `IntoResponse` impl below.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Any 401-class condition: bad credentials, missing cookie, unknown /
    /// revoked / expired refresh token, invalid signature. Collapsed into a
    /// single variant so callers cannot enumerate session state.
    #[error("authentication failed")]
    Authentication,

    /// Valid identity, insufficient role.
    #[error("insufficient permissions")]
    Authorization,

    /// Session id collision on insert. 128 bits of entropy make this
    /// practically unreachable; surfaced as a server error if it happens.
    #[error("session id collision")]
    Conflict,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Token encoding failed. Only reachable with a broken signing key.
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::Authentication => (StatusCode::UNAUTHORIZED, "Invalid credentials or session"),
            AuthError::Authorization => (StatusCode::FORBIDDEN, "You do not have permission to perform this action"),
            AuthError::Conflict => {
                tracing::error!("refresh token jti collision");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AuthError::Store(e) => {
                tracing::error!("store error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AuthError::Signing(e) => {
                tracing::error!("token signing failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(
            AuthError::Authentication.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Authorization.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::Conflict.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
