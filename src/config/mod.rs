use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub staging: StagingConfig,
    pub media: MediaConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    /// Audience tag every platform token must carry next to the tenant
    pub platform_audience: String,
    /// Base URL of the authentication service exposing `POST /refresh-token`
    pub auth_server_url: Option<String>,
    pub refresh_timeout_secs: u64,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Root holding one staging directory per tenant. Relative paths resolve
    /// against the working directory.
    pub root: PathBuf,
    pub index_file_name: String,
    pub max_upload_bytes: usize,
    pub ingest_workers: usize,
    pub ingest_queue_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub target_width: u32,
    pub brightness: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub interval_secs: u64,
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Some(v) = env::var("POSTIT_API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.server.enable_request_logging = v.parse().unwrap_or(self.server.enable_request_logging);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("PLATFORM_AUDIENCE") {
            self.security.platform_audience = v;
        }
        if let Ok(v) = env::var("AUTHENTICATION_SERVER_URL") {
            self.security.auth_server_url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("SECURITY_REFRESH_TIMEOUT_SECS") {
            self.security.refresh_timeout_secs = v.parse().unwrap_or(self.security.refresh_timeout_secs);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Staging overrides
        if let Ok(v) = env::var("STAGING_ROOT") {
            self.staging.root = PathBuf::from(v);
        }
        if let Ok(v) = env::var("STAGING_INDEX_FILE") {
            self.staging.index_file_name = v;
        }
        if let Ok(v) = env::var("STAGING_MAX_UPLOAD_BYTES") {
            self.staging.max_upload_bytes = v.parse().unwrap_or(self.staging.max_upload_bytes);
        }
        if let Ok(v) = env::var("STAGING_INGEST_WORKERS") {
            self.staging.ingest_workers = v.parse().unwrap_or(self.staging.ingest_workers);
        }
        if let Ok(v) = env::var("STAGING_INGEST_QUEUE_DEPTH") {
            self.staging.ingest_queue_depth = v.parse().unwrap_or(self.staging.ingest_queue_depth);
        }

        // Media overrides
        if let Ok(v) = env::var("MEDIA_TARGET_WIDTH") {
            self.media.target_width = v.parse().unwrap_or(self.media.target_width);
        }
        if let Ok(v) = env::var("MEDIA_BRIGHTNESS") {
            self.media.brightness = v.parse().unwrap_or(self.media.brightness);
        }

        // Broadcast overrides
        if let Ok(v) = env::var("BROADCAST_INTERVAL_SECS") {
            self.broadcast.interval_secs = v.parse().unwrap_or(self.broadcast.interval_secs);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 3000,
                enable_request_logging: true,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                jwt_secret: "postit-dev-secret".to_string(),
                platform_audience: "postit-audience".to_string(),
                auth_server_url: None,
                refresh_timeout_secs: 10,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
            },
            staging: StagingConfig {
                root: PathBuf::from("pkg"),
                index_file_name: "f.json".to_string(),
                max_upload_bytes: 10 * 1024 * 1024, // 10MB
                ingest_workers: 4,
                ingest_queue_depth: 64,
            },
            media: MediaConfig {
                target_width: 500,
                brightness: -5,
            },
            broadcast: BroadcastConfig { interval_secs: 5 },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.server.enable_request_logging = true;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.security.jwt_secret = String::new();
        config.security.cors_origins = vec!["https://staging.example.com".to_string()];
        config.staging.root = PathBuf::from("/var/lib/postit/staging");
        config
    }

    fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.server.enable_request_logging = false;
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.security.jwt_secret = String::new();
        config.security.refresh_timeout_secs = 5;
        config.security.cors_origins = vec!["https://app.example.com".to_string()];
        config.staging.root = PathBuf::from("/var/lib/postit/staging");
        config.staging.ingest_workers = 8;
        config.staging.ingest_queue_depth = 256;
        config
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
