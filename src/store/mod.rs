//! Persistence seams for the session core. The server wires the Postgres
//! implementations; integration tests run against the in-memory ones.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::AuthError,
    models::user::{RefreshTokenRecord, User},
};

/// Durable record of issued refresh tokens, one row per login session.
///
/// Implementations must make `rotate` atomic with respect to concurrent
/// rotations of the same session, and `revoke` linearizable with respect to
/// `lookup`.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert a new session record. Fails with [`AuthError::Conflict`] only
    /// on a `jti` collision.
    async fn issue(&self, record: RefreshTokenRecord) -> Result<(), AuthError>;

    /// Exact-value lookup of the presented token.
    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Compare-and-swap rotation: revoke the session `old_jti` iff it is
    /// still unrevoked, and insert `replacement` in the same transaction.
    /// Returns `false` when the old session was already revoked — the caller
    /// lost a concurrent rotation race, or the token is being replayed.
    async fn rotate(
        &self,
        old_jti: &str,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, AuthError>;

    /// Idempotent: revoking an unknown or already-revoked token is a no-op.
    async fn revoke(&self, token: &str) -> Result<(), AuthError>;

    /// Forced logout-everywhere, e.g. after a password change.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError>;
}

/// Subject lookups the session core needs. The refresher re-reads the user
/// on every call so role and name changes reach new access tokens.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;
    /// Learning profile id for child-role users.
    async fn child_profile_id(&self, user_id: Uuid) -> Result<Option<Uuid>, AuthError>;
    async fn list(&self) -> Result<Vec<User>, AuthError>;
}
