use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AuthError;
use crate::models::auth::AuthenticatedUser;
use crate::models::user::UserRole;
use crate::services::token::TokenCodec;

/// Verifies the bearer token on every protected request. Pure signature
/// check — no store lookup, so the gate costs no database round trip.
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::Authentication)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::Authentication)?;

        let codec = parts
            .extensions
            .get::<TokenCodec>()
            .ok_or(AuthError::Authentication)?;

        let claims = codec.verify_access(token)?;

        Ok(AuthenticatedUser {
            user_id: claims.sub.parse().map_err(|_| AuthError::Authentication)?,
            role: claims.role,
        })
    }
}

/// Extractor for admin-only endpoints: valid identity with the wrong role
/// yields 403, distinct from the 401 cases above.
pub struct RequireAdmin(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if user.role != UserRole::Admin {
            return Err(AuthError::Authorization);
        }
        Ok(RequireAdmin(user))
    }
}
