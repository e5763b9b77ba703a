use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use postit_api::config;
use postit_api::database::DatabaseManager;
use postit_api::schedule::ScheduleSnapshotReader;
use postit_api::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize configuration (this loads the config singleton)
    let config = config::config();
    tracing::info!("Starting Postit API in {:?} mode", config.environment);

    let pool = DatabaseManager::connect_lazy(
        config.database.url.as_deref(),
        config.database.max_connections,
        Duration::from_secs(config.database.connection_timeout),
    )?;
    let snapshots = Arc::new(ScheduleSnapshotReader::new(pool));

    let state = server::build_state(config, snapshots)?;
    tracing::info!(root = %state.staging.root().display(), "staging area ready");
    let app = server::app(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Postit API listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
