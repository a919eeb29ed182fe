use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manabi_api::{
    config::Config,
    db,
    services::{auth::AuthService, token::TokenCodec},
    store::PgStore,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let store = Arc::new(PgStore::new(pool));
    let codec = TokenCodec::from_config(&config);
    let auth = Arc::new(AuthService::new(store.clone(), store, codec));

    let state = AppState {
        auth,
        config: config.clone(),
    };

    // Credentialed CORS: the refresh cookie only flows for the configured
    // app origin (plus localhost during development).
    let cors_origin = {
        let base = config.app_base_url.clone();
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let o = match origin.to_str() {
                Ok(s) => s,
                Err(_) => return false,
            };
            o == base || o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1")
        })
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(cors_origin)
        .allow_credentials(true);

    let app = manabi_api::router(state).layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    info!("manabi API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
