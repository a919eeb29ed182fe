use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AuthError,
    models::user::{RefreshTokenRecord, User},
    store::{RefreshTokenStore, UserStore},
};

/// In-memory store for integration tests and local experiments. A single
/// mutex over all tables makes every operation trivially linearizable.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    /// user_id -> child learning profile id
    children: HashMap<Uuid, Uuid>,
    /// keyed by jti
    sessions: HashMap<String, RefreshTokenRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user; the password is hashed with a low bcrypt cost to keep
    /// tests fast.
    pub fn add_user(&self, email: &str, password: &str, role: &str, first: &str, last: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let user = User {
            id,
            email: email.to_string(),
            password_hash: bcrypt::hash(password, 4).expect("bcrypt hash"),
            first_name: first.to_string(),
            last_name: last.to_string(),
            role: role.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().unwrap().users.push(user);
        id
    }

    pub fn add_child_profile(&self, user_id: Uuid) -> Uuid {
        let profile_id = Uuid::new_v4();
        self.inner.lock().unwrap().children.insert(user_id, profile_id);
        profile_id
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn active_session_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .filter(|r| !r.revoked)
            .count()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn issue(&self, record: RefreshTokenRecord) -> Result<(), AuthError> {
        let mut tables = self.inner.lock().unwrap();
        if tables.sessions.contains_key(&record.jti) {
            return Err(AuthError::Conflict);
        }
        tables.sessions.insert(record.jti.clone(), record);
        Ok(())
    }

    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let tables = self.inner.lock().unwrap();
        Ok(tables.sessions.values().find(|r| r.token == token).cloned())
    }

    async fn rotate(
        &self,
        old_jti: &str,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, AuthError> {
        let mut tables = self.inner.lock().unwrap();
        match tables.sessions.get_mut(old_jti) {
            Some(old) if !old.revoked => old.revoked = true,
            _ => return Ok(false),
        }
        if tables.sessions.contains_key(&replacement.jti) {
            return Err(AuthError::Conflict);
        }
        tables.sessions.insert(replacement.jti.clone(), replacement);
        Ok(true)
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let mut tables = self.inner.lock().unwrap();
        if let Some(record) = tables.sessions.values_mut().find(|r| r.token == token) {
            record.revoked = true;
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        let mut tables = self.inner.lock().unwrap();
        for record in tables.sessions.values_mut() {
            if record.user_id == user_id {
                record.revoked = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let tables = self.inner.lock().unwrap();
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let tables = self.inner.lock().unwrap();
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn child_profile_id(&self, user_id: Uuid) -> Result<Option<Uuid>, AuthError> {
        let tables = self.inner.lock().unwrap();
        Ok(tables.children.get(&user_id).copied())
    }

    async fn list(&self) -> Result<Vec<User>, AuthError> {
        let tables = self.inner.lock().unwrap();
        Ok(tables.users.clone())
    }
}
