mod api_doc;
mod app;
mod config;
mod delegation;
mod error;
mod handlers;
mod models;
mod proxy;
mod routes;
mod state;
mod status;
mod storage;

use anyhow::Context;
use config::Config;
use routes::RouteTable;
use state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("s3-proxy-gateway starting");

    let config = Config::from_env()?;
    config.log_startup();

    let table = RouteTable::declared().context("Route table is invalid")?;
    for route in table.routes() {
        tracing::info!(
            "  Route {} {} -> {{bucket}}/{} ({} scope)",
            route.method,
            route.pattern_source,
            route.key_template,
            route.scope
        );
    }

    let store = storage::from_config(&config).await?;
    let bind_address = config.bind_address();
    let state = AppState::new(config, table, store);
    let app = app::build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("s3-proxy-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
