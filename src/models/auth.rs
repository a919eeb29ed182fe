use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserRole;

/// Claims embedded in the JWT access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    pub sub: String, // user UUID
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub iat: usize,
    pub exp: usize,
}

/// Claims embedded in the JWT refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String, // user UUID
    pub jti: String, // session id (enables revocation)
    pub iat: usize,
    pub exp: usize,
}

/// Extracted from the validated JWT — available via Axum extractors
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
}
