pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::trace::TraceLayer;

use config::Config;
use services::auth::AuthService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub config: Arc<Config>,
}

/// Build the API router. The token codec rides request extensions so the
/// auth gate can verify bearer tokens without touching handler state.
pub fn router(state: AppState) -> Router {
    let codec = state.auth.codec().clone();

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/refresh", post(routes::auth::refresh))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/me", get(routes::auth::me))
        .route("/admin/users", get(routes::users::list_users))
        .layer(Extension(codec))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
