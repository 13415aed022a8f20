//! Marginalia server entry point

mod annotations;
mod cache;
mod config;
mod error;
mod routes;
mod state;

use std::str::FromStr;
use std::time::Duration;

use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::annotations::{AnnotationStore, CollectionManager, ReactionAggregator, VersionLedger};
use crate::cache::{CacheConfig, ResponseCache};
use crate::config::Config;
use crate::state::AppState;

fn app(state: AppState) -> Router {
    Router::new()
        .nest("/annotations/collections", routes::collections::router())
        .nest("/annotations", routes::annotations::router())
        .with_state(state)
        .merge(routes::health::router())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marginalia_server=debug,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env();

    let options =
        SqliteConnectOptions::from_str(&config.database.url)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    AnnotationStore::new(&pool).init().await?;
    VersionLedger::new(&pool).init().await?;
    ReactionAggregator::new(&pool).init().await?;
    CollectionManager::new(&pool).init().await?;

    let cache = ResponseCache::new(CacheConfig {
        max_entries: config.cache.max_entries,
        short_ttl: Duration::from_secs(config.cache.short_ttl_secs),
        medium_ttl: Duration::from_secs(config.cache.medium_ttl_secs),
        long_ttl: Duration::from_secs(config.cache.long_ttl_secs),
    });

    let state = AppState::new(pool, cache);
    let app = app(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Marginalia server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
