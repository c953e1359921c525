//! Configuration module.
//!
//! Handles settings files, environment variables, and upstream connection options.

mod connection;
mod settings;

pub use connection::{resolve_host, ConnectionSettings, PoolSettings, DIAL_TIMEOUT};
pub use settings::{
    expand_env_vars, CacheSettings, DatasourceSettings, Settings, SettingsError, CONFIG_ENV,
    LOCALHOST_ALIAS_ENV,
};
