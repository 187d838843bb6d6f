use std::sync::Arc;

use anyhow::Context;
use faas_executor::WasmExecutor;
use faas_gateway_server::{config::ServerConfig, create_app, AppState};
use faas_store::MetadataStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,faas_gateway_server=debug")),
        )
        .init();

    let config = ServerConfig::load().context("failed to load server config")?;
    config
        .make_dirs()
        .context("failed to create storage directories")?;

    let store = MetadataStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open metadata store {}", config.db_path.display()))?;
    let executor = WasmExecutor::new(config.executor_config())?;
    let addr = config.socket_addr()?;

    let state = AppState::new(config, store, Arc::new(executor));
    let app = create_app(state);

    info!("FaaS Gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
