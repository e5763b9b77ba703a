#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use postit_api::auth::{generate_jwt, Claims, TokenGate};
use postit_api::broadcast::StatusBroadcaster;
use postit_api::config::AppConfig;
use postit_api::media::{ImageNormalizer, IngestConfig, MediaIngestWorker};
use postit_api::schedule::{ScheduleSnapshot, SnapshotError, SnapshotSource};
use postit_api::server;
use postit_api::staging::StagingArea;
use postit_api::state::AppState;
use postit_api::types::TenantNamespace;
use tempfile::TempDir;

pub const SECRET: &str = "integration-secret";
pub const AUDIENCE: &str = "postit-audience";
pub const TENANT: &str = "acme";

pub struct ServerOptions {
    pub max_upload_bytes: usize,
    pub broadcast_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: 2 * 1024 * 1024,
            broadcast_interval: Duration::from_millis(200),
        }
    }
}

pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub staging: StagingArea,
    pub snapshots: Arc<FixedSnapshots>,
    _root: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn staging_dir(&self, tenant: &str) -> PathBuf {
        self.staging.tenant_dir(&TenantNamespace::parse(tenant).unwrap())
    }
}

/// Snapshot source returning whatever the test stored.
#[derive(Default)]
pub struct FixedSnapshots {
    snapshots: Mutex<Vec<ScheduleSnapshot>>,
}

impl FixedSnapshots {
    pub fn set(&self, snapshots: Vec<ScheduleSnapshot>) {
        *self.snapshots.lock().unwrap() = snapshots;
    }
}

#[async_trait]
impl SnapshotSource for FixedSnapshots {
    async fn snapshot(&self, _tenant: &TenantNamespace) -> Result<Vec<ScheduleSnapshot>, SnapshotError> {
        Ok(self.snapshots.lock().unwrap().clone())
    }
}

static TRACING: Once = Once::new();

/// Honour RUST_LOG in tests; silent by default.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub async fn spawn_server() -> Result<TestServer> {
    spawn_server_with(ServerOptions::default()).await
}

/// Run the router in-process on a free port with a temporary staging root.
pub async fn spawn_server_with(options: ServerOptions) -> Result<TestServer> {
    init_tracing();
    let root = tempfile::tempdir()?;
    let staging = StagingArea::new(root.path(), "f.json")?;
    let snapshots = Arc::new(FixedSnapshots::default());

    let state = AppState {
        gate: Arc::new(TokenGate::new(SECRET, AUDIENCE)),
        staging: staging.clone(),
        ingest: MediaIngestWorker::start(
            staging.clone(),
            Arc::new(ImageNormalizer::new(500, -5)),
            IngestConfig {
                workers: 2,
                queue_depth: 16,
            },
        ),
        broadcaster: StatusBroadcaster::new(snapshots.clone(), options.broadcast_interval),
        max_upload_bytes: options.max_upload_bytes,
    };

    let mut config = AppConfig::from_env();
    config.server.enable_request_logging = false;
    config.security.cors_origins.clear();
    let app = server::app(state, &config);

    // Pick an unused port for isolation
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Ok(TestServer {
        base_url: format!("http://127.0.0.1:{port}"),
        ws_url: format!("ws://127.0.0.1:{port}"),
        staging,
        snapshots,
        _root: root,
    })
}

pub fn token_for(audience: &[&str], ttl_secs: i64) -> String {
    let claims = Claims::new(
        "user-1",
        audience.iter().map(|a| a.to_string()).collect(),
        chrono::Duration::seconds(ttl_secs),
    );
    generate_jwt(&claims, SECRET).unwrap()
}

pub fn tenant_token(tenant: &str) -> String {
    token_for(&[AUDIENCE, tenant], 3600)
}

/// A client request carrying the headers every protected route requires.
pub fn authed(builder: reqwest::RequestBuilder, tenant: &str) -> reqwest::RequestBuilder {
    builder
        .header("trace-id", "trace-123")
        .header("tenant-namespace", tenant)
        .bearer_auth(tenant_token(tenant))
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    buffer
}

/// Poll `GET /file/staged` until `filename` shows up.
pub async fn wait_until_staged(server: &TestServer, tenant: &str, filename: &str) -> Result<PathBuf> {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let body: serde_json::Value = authed(client.get(server.url("/file/staged")), tenant)
            .send()
            .await?
            .json()
            .await?;
        let found = body["data"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|entry| entry["filename"] == filename)
            .and_then(|entry| entry["path"].as_str())
            .map(PathBuf::from);
        if let Some(path) = found {
            return Ok(path);
        }
        if Instant::now() > deadline {
            anyhow::bail!("{filename} was never staged for {tenant}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
