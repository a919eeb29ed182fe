use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AuthError,
    models::user::{LoginResponse, RefreshTokenRecord, User, UserProfile, UserRole},
    services::token::{generate_session_id, TokenCodec},
    store::{RefreshTokenStore, UserStore},
};

/// Outcome of login/refresh: the JSON body plus the cookie-carried refresh
/// token and its expiry.
pub struct SessionTokens {
    pub response: LoginResponse,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Issues, refreshes, and revokes login sessions. Constructed once at
/// startup and shared through [`crate::AppState`].
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn RefreshTokenStore>,
    codec: TokenCodec,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn RefreshTokenStore>,
        codec: TokenCodec,
    ) -> Self {
        Self {
            users,
            sessions,
            codec,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Verify credentials and open a new session. Unknown email and wrong
    /// password produce the same error.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError> {
        let email = email.trim().to_lowercase();
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::Authentication)?;

        let valid = bcrypt::verify(password, &user.password_hash)
            .map_err(|_| AuthError::Authentication)?;
        if !valid {
            return Err(AuthError::Authentication);
        }

        let jti = generate_session_id();
        let refresh_token = self.codec.sign_refresh(user.id, &jti)?;
        let now = Utc::now();
        let expires_at = now + self.codec.refresh_ttl();

        self.sessions
            .issue(RefreshTokenRecord {
                jti,
                user_id: user.id,
                token: refresh_token.clone(),
                expires_at,
                revoked: false,
                created_at: now,
            })
            .await?;

        let access_token = self.codec.sign_access(&user)?;
        let profile = self.profile_of(user).await?;

        tracing::info!(user_id = %profile.id, "session opened");

        Ok(SessionTokens {
            response: LoginResponse {
                access_token,
                user: profile,
            },
            refresh_token,
            refresh_expires_at: expires_at,
        })
    }

    /// Exchange a cookie-carried refresh token for a fresh access token,
    /// rotating the refresh token in the same step. Unknown, revoked, and
    /// expired tokens all fail identically.
    pub async fn refresh(&self, presented: &str) -> Result<SessionTokens, AuthError> {
        let record = self
            .sessions
            .lookup(presented)
            .await?
            .ok_or(AuthError::Authentication)?;

        let now = Utc::now();
        if !record.is_usable(presented, now) {
            return Err(AuthError::Authentication);
        }

        // Redundant with the stored-value match above; kept so a forged row
        // in the store still cannot mint tokens.
        self.codec.verify_refresh(presented)?;

        // Re-read the user: role or name changes must reach the new token.
        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(AuthError::Authentication)?;

        let new_jti = generate_session_id();
        let new_refresh = self.codec.sign_refresh(user.id, &new_jti)?;
        let expires_at = now + self.codec.refresh_ttl();

        let rotated = self
            .sessions
            .rotate(
                &record.jti,
                RefreshTokenRecord {
                    jti: new_jti,
                    user_id: user.id,
                    token: new_refresh.clone(),
                    expires_at,
                    revoked: false,
                    created_at: now,
                },
            )
            .await?;
        if !rotated {
            // Lost a concurrent rotation, or the token was already rotated
            // away and is being replayed.
            tracing::warn!(user_id = %user.id, "refresh token reuse detected");
            return Err(AuthError::Authentication);
        }

        let access_token = self.codec.sign_access(&user)?;
        let profile = self.profile_of(user).await?;

        Ok(SessionTokens {
            response: LoginResponse {
                access_token,
                user: profile,
            },
            refresh_token: new_refresh,
            refresh_expires_at: expires_at,
        })
    }

    /// Revoke the session behind a presented refresh token. Idempotent.
    pub async fn logout(&self, presented: &str) -> Result<(), AuthError> {
        self.sessions.revoke(presented).await
    }

    /// Forced logout-everywhere for one subject.
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.sessions.revoke_all_for_user(user_id).await
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile, AuthError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Authentication)?;
        self.profile_of(user).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<UserProfile>, AuthError> {
        let users = self.users.list().await?;
        Ok(users.into_iter().map(UserProfile::from).collect())
    }

    async fn profile_of(&self, user: User) -> Result<UserProfile, AuthError> {
        let mut profile = UserProfile::from(user);
        if profile.role == UserRole::Child {
            profile.child_profile_id = self.users.child_profile_id(profile.id).await?;
        }
        Ok(profile)
    }
}
