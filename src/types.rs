/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_NAMESPACE_LEN: usize = 63;

/// Tenant namespace as received in the `tenant-namespace` header or the
/// status socket handshake.
///
/// The same value names the tenant's staging directory and the PostgreSQL
/// schema holding its schedules, so only `[A-Za-z0-9_]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantNamespace(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tenant namespace '{0}'")]
pub struct InvalidNamespace(pub String);

impl TenantNamespace {
    pub fn parse(raw: &str) -> Result<Self, InvalidNamespace> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > MAX_NAMESPACE_LEN
            || !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(InvalidNamespace(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantNamespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for TenantNamespace {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TenantNamespace::parse(&raw).map_err(serde::de::Error::custom)
    }
}
