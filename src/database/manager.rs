use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::types::TenantNamespace;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Builds the shared PostgreSQL pool. Tenant data lives in one schema per
/// tenant namespace, so a single pool serves every tenant.
pub struct DatabaseManager;

impl DatabaseManager {
    /// Create the pool without opening a connection. The server starts even
    /// when the database is down; queries fail until it comes back.
    pub fn connect_lazy(
        database_url: Option<&str>,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<PgPool, DatabaseError> {
        let database_url = database_url.ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;
        let url = url::Url::parse(database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(DatabaseError::InvalidDatabaseUrl);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url.as_str())?;

        info!(
            host = url.host_str().unwrap_or("localhost"),
            database = url.path().trim_start_matches('/'),
            max_connections,
            "database pool configured"
        );
        Ok(pool)
    }

    /// Quote SQL identifier to prevent injection
    pub fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// `"tenant"."table"` for a table inside a tenant's schema.
    pub fn tenant_table(tenant: &TenantNamespace, table: &str) -> String {
        format!(
            "{}.{}",
            Self::quote_identifier(tenant.as_str()),
            Self::quote_identifier(table)
        )
    }
}
