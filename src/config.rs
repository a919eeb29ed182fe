use std::env;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub jwt_expiry_seconds: u64,
    pub jwt_refresh_expiry_days: u64,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    /// Set the `Secure` attribute on the refresh cookie (production).
    pub cookie_secure: bool,
}

impl Config {
    /// Load configuration from the environment. The signing secrets are
    /// mandatory: a missing secret aborts startup rather than failing on
    /// the first login.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_refresh_secret: required("JWT_REFRESH_SECRET")?,
            jwt_expiry_seconds: parsed("JWT_EXPIRY_SECONDS", 900)?,
            jwt_refresh_expiry_days: parsed("JWT_REFRESH_EXPIRY_DAYS", 7)?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parsed("PORT", 8080)?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            cookie_secure: env::var("COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVar(key))
}

fn parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar(key)),
        Err(_) => Ok(default),
    }
}
