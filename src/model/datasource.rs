//! Upstream connection records.
//!
//! Secrets are accepted on input but never serialized back out.

use serde::{Deserialize, Serialize};

/// Bastion host used to reach an upstream that is not directly routable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BastionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing)]
    pub private_key: String,
    #[serde(default, skip_serializing)]
    pub key_passphrase: String,
}

/// A tenant-owned connection to an upstream MySQL-compatible database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub bastion: Option<BastionConfig>,
    /// Upper bound on pooled connections; 0 means driver default.
    #[serde(default)]
    pub max_connections: u32,
    /// Connection lifetime bound in seconds; 0 means driver default.
    #[serde(default)]
    pub query_timeout_seconds: u64,
}

impl DataSource {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            name: String::new(),
            host: host.into(),
            port,
            database: database.into(),
            username: String::new(),
            password: String::new(),
            bastion: None,
            max_connections: 0,
            query_timeout_seconds: 0,
        }
    }

    /// Whether the upstream is reached through a bastion host.
    pub fn uses_bastion(&self) -> bool {
        self.bastion
            .as_ref()
            .is_some_and(|b| !b.host.is_empty() && b.port > 0)
    }
}
