//! Upstream connection configuration.
//!
//! Derives driver options from a [`DataSource`] record:
//! - effective host, with the localhost alias applied when no tunnel is used
//! - pool bounds from `maxConnections` / `queryTimeoutSeconds`
//! - a fixed dial timeout

use std::time::Duration;

use serde::Serialize;

use crate::model::DataSource;

/// Time allowed to establish an upstream connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling on idle pooled connections.
const MAX_IDLE_CAP: u32 = 5;

/// Rewrite loopback hosts to `alias`.
///
/// `localhost`, `127.0.0.1` and `::1` are matched case-insensitively after
/// trimming. Any other host, or an empty alias, returns the trimmed host.
pub fn resolve_host(host: &str, alias: Option<&str>) -> String {
    let trimmed = host.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let alias = alias.map(str::trim).unwrap_or_default();
    if alias.is_empty() {
        return trimmed.to_string();
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "localhost" | "127.0.0.1" | "::1" => alias.to_string(),
        _ => trimmed.to_string(),
    }
}

/// Connection pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSettings {
    pub max_open: u32,
    pub max_idle: u32,
    /// Maximum connection lifetime; `None` leaves the driver default.
    pub max_lifetime: Option<Duration>,
}

impl PoolSettings {
    pub fn for_datasource(ds: &DataSource) -> Self {
        let max_open = if ds.max_connections > 0 {
            ds.max_connections
        } else {
            10
        };
        Self {
            max_open,
            max_idle: (max_open / 2).min(MAX_IDLE_CAP),
            max_lifetime: (ds.query_timeout_seconds > 0)
                .then(|| Duration::from_secs(ds.query_timeout_seconds)),
        }
    }
}

/// Everything the driver needs to reach one upstream database.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub pool: PoolSettings,
    pub dial_timeout: Duration,
}

impl ConnectionSettings {
    /// Build settings for a datasource.
    ///
    /// `tunnel_local_addr` is the `(host, port)` of an already established
    /// tunnel listener. When present it replaces the upstream coordinates and
    /// the localhost alias is not applied.
    pub fn for_datasource(
        ds: &DataSource,
        localhost_alias: Option<&str>,
        tunnel_local_addr: Option<(&str, u16)>,
    ) -> Self {
        let (host, port) = match tunnel_local_addr {
            Some((host, port)) => (host.to_string(), port),
            None => (resolve_host(&ds.host, localhost_alias), ds.port),
        };

        Self {
            host,
            port,
            database: ds.database.clone(),
            username: ds.username.clone(),
            password: ds.password.clone(),
            pool: PoolSettings::for_datasource(ds),
            dial_timeout: DIAL_TIMEOUT,
        }
    }
}
