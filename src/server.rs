use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{HttpRefreshClient, TokenGate};
use crate::broadcast::StatusBroadcaster;
use crate::config::AppConfig;
use crate::handlers::{file, socket};
use crate::media::{ImageNormalizer, IngestConfig, MediaIngestWorker};
use crate::middleware::jwt_auth_middleware;
use crate::schedule::SnapshotSource;
use crate::staging::StagingArea;
use crate::state::AppState;

/// Wire the components described by `config`. Must run inside a tokio
/// runtime: the ingest pool starts immediately.
pub fn build_state(config: &AppConfig, snapshots: Arc<dyn SnapshotSource>) -> anyhow::Result<AppState> {
    let security = &config.security;
    if security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set outside development");
    }

    let mut gate = TokenGate::new(&security.jwt_secret, security.platform_audience.clone());
    match &security.auth_server_url {
        Some(url) => {
            let client = HttpRefreshClient::new(url, Duration::from_secs(security.refresh_timeout_secs))
                .context("invalid AUTHENTICATION_SERVER_URL")?;
            gate = gate.with_refresher(Arc::new(client));
        }
        None => tracing::warn!("AUTHENTICATION_SERVER_URL not set; expired tokens will not trigger a refresh"),
    }

    let staging = StagingArea::new(&config.staging.root, config.staging.index_file_name.clone())
        .context("cannot resolve staging root")?;
    let normalizer = Arc::new(ImageNormalizer::new(config.media.target_width, config.media.brightness));
    let ingest = MediaIngestWorker::start(
        staging.clone(),
        normalizer,
        IngestConfig {
            workers: config.staging.ingest_workers,
            queue_depth: config.staging.ingest_queue_depth,
        },
    );

    Ok(AppState {
        gate: Arc::new(gate),
        staging,
        ingest,
        broadcaster: StatusBroadcaster::new(snapshots, config.broadcast.interval()),
        max_upload_bytes: config.staging.max_upload_bytes,
    })
}

pub fn app(state: AppState, config: &AppConfig) -> Router {
    let router = Router::new()
        .merge(file_routes(state.clone()))
        .merge(socket_routes())
        // Global middleware
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors_layer(&config.security.cors_origins))
        .with_state(state);

    if config.server.enable_request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn file_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/file/upload", post(file::upload_post).delete(file::upload_delete))
        .route("/file/staged", get(file::staging_list))
        .route("/delete/all", delete(file::staging_flush))
        .route_layer(from_fn_with_state(state, jwt_auth_middleware))
}

fn socket_routes() -> Router<AppState> {
    Router::new().route("/pws/schedule-status", get(socket::schedule_status))
}

/// Permissive when no origins are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::permissive().allow_origin(AllowOrigin::list(allowed))
    }
}
