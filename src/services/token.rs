use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use uuid::Uuid;

use crate::{
    config::Config,
    error::AuthError,
    models::{
        auth::{AccessClaims, RefreshClaims},
        user::User,
    },
};

/// Signs and verifies both token kinds. Pure: no store access, no side
/// effects beyond reading the clock at signing time.
#[derive(Clone)]
pub struct TokenCodec {
    access_enc: EncodingKey,
    access_dec: DecodingKey,
    refresh_enc: EncodingKey,
    refresh_dec: DecodingKey,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
}

impl TokenCodec {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            &config.jwt_refresh_secret,
            config.jwt_expiry_seconds,
            config.jwt_refresh_expiry_days * 86400,
        )
    }

    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl_seconds: u64,
        refresh_ttl_seconds: u64,
    ) -> Self {
        Self {
            access_enc: EncodingKey::from_secret(access_secret.as_bytes()),
            access_dec: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_enc: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_dec: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_ttl_seconds as i64)
    }

    pub fn sign_access(&self, user: &User) -> Result<String, AuthError> {
        self.sign_access_at(user, Utc::now().timestamp() as usize)
    }

    fn sign_access_at(&self, user: &User, iat: usize) -> Result<String, AuthError> {
        let claims = AccessClaims {
            sub: user.id.to_string(),
            role: user.role(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            iat,
            exp: iat + self.access_ttl_seconds as usize,
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.access_enc,
        )?)
    }

    pub fn sign_refresh(&self, user_id: Uuid, jti: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp() as usize;
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: jti.to_string(),
            iat: now,
            exp: now + self.refresh_ttl_seconds as usize,
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.refresh_enc,
        )?)
    }

    /// Bad signature, malformed structure, and expiry all collapse into the
    /// same error so callers cannot tell them apart.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        decode::<AccessClaims>(token, &self.access_dec, &validation())
            .map(|data| data.claims)
            .map_err(|_| AuthError::Authentication)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        decode::<RefreshClaims>(token, &self.refresh_dec, &validation())
            .map(|data| data.claims)
            .map_err(|_| AuthError::Authentication)
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    // Strict expiry. Access tokens live 15 minutes; there is no reason to
    // honor them past that window.
    validation.leeway = 0;
    validation
}

/// Session id for a refresh token record: 16 random bytes, hex-encoded.
pub fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserRole;

    fn codec() -> TokenCodec {
        TokenCodec::new("access-secret", "refresh-secret", 900, 7 * 86400)
    }

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "hana@example.com".into(),
            password_hash: String::new(),
            first_name: "Hana".into(),
            last_name: "Sato".into(),
            role: "parent".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn access_token_round_trips() {
        let codec = codec();
        let user = sample_user();
        let token = codec.sign_access(&user).unwrap();
        let claims = codec.verify_access(&token).unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, UserRole::Parent);
        assert_eq!(claims.first_name, "Hana");
        assert_eq!(claims.last_name, "Sato");
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn refresh_token_round_trips() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let jti = generate_session_id();
        let token = codec.sign_refresh(user_id, &jti).unwrap();
        let claims = codec.verify_refresh(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.jti, jti);
        assert_eq!(claims.exp - claims.iat, 7 * 86400);
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let codec = codec();
        let sixteen_minutes_ago = (Utc::now().timestamp() - 16 * 60) as usize;
        let token = codec
            .sign_access_at(&sample_user(), sixteen_minutes_ago)
            .unwrap();

        assert!(matches!(
            codec.verify_access(&token),
            Err(AuthError::Authentication)
        ));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let codec = codec();
        let token = codec.sign_access(&sample_user()).unwrap();

        // Corrupt one character of the signature segment.
        let (head, sig) = token.rsplit_once('.').unwrap();
        let flipped = if sig.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{head}.{flipped}{}", &sig[1..]);

        assert!(matches!(
            codec.verify_access(&tampered),
            Err(AuthError::Authentication)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let codec = codec();
        let other = TokenCodec::new("other-access", "other-refresh", 900, 7 * 86400);
        let token = codec.sign_access(&sample_user()).unwrap();

        assert!(other.verify_access(&token).is_err());
    }

    #[test]
    fn access_token_does_not_verify_as_refresh() {
        let codec = codec();
        let token = codec.sign_access(&sample_user()).unwrap();
        assert!(codec.verify_refresh(&token).is_err());
    }

    #[test]
    fn session_ids_are_unique_and_128_bit() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
