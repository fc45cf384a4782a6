//! Example consumer: serve the configured entities of a PostgreSQL database.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Config file from `GATEWAY_CONFIG` (default `gateway.json`), database from `DATABASE_URL`.

use entity_gateway::{
    build_catalog, common_routes, config::config_path, entity_routes, load_from_path, AppState, PgExecutor,
    QueryEngine,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("entity_gateway=info")),
        )
        .init();

    let config = load_from_path(config_path()).await?;
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/gateway".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let catalog = build_catalog(&pool, &config).await?;
    let engine = QueryEngine::new(&config, Arc::new(catalog), Arc::new(PgExecutor::new(pool)))?;
    let state = AppState::new(engine);

    let app = common_routes().merge(entity_routes(state));
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!(
        "Entity gateway listening on http://127.0.0.1:{}{}",
        port,
        config.rest.path
    );
    axum::serve(listener, app).await?;
    Ok(())
}
