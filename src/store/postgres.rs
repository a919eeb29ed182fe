use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AuthError,
    models::user::{RefreshTokenRecord, User},
    store::{RefreshTokenStore, UserStore},
};

/// Postgres-backed store used by the server binary.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(e: sqlx::Error) -> AuthError {
    if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
        return AuthError::Conflict;
    }
    AuthError::Store(e)
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn issue(&self, record: RefreshTokenRecord) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, token, expires_at, revoked, created_at)
             VALUES ($1, $2, $3, $4, FALSE, $5)",
        )
        .bind(&record.jti)
        .bind(record.user_id)
        .bind(&record.token)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;
        Ok(())
    }

    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT jti, user_id, token, expires_at, revoked, created_at
             FROM refresh_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn rotate(
        &self,
        old_jti: &str,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, AuthError> {
        let mut tx = self.pool.begin().await?;

        // The conditional update is the linearization point: of two
        // concurrent rotations, exactly one sees rows_affected = 1.
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE jti = $1 AND revoked = FALSE",
        )
        .bind(old_jti)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, token, expires_at, revoked, created_at)
             VALUES ($1, $2, $3, $4, FALSE, $5)",
        )
        .bind(&replacement.jti)
        .bind(replacement.user_id)
        .bind(&replacement.token)
        .bind(replacement.expires_at)
        .bind(replacement.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, first_name, last_name, role, created_at, updated_at
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, first_name, last_name, role, created_at, updated_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn child_profile_id(&self, user_id: Uuid) -> Result<Option<Uuid>, AuthError> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM children WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<User>, AuthError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, first_name, last_name, role, created_at, updated_at
             FROM users ORDER BY role, last_name, first_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
