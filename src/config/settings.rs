//! TOML-based configuration.
//!
//! Supports a config file (datasetq.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [cache]
//! enabled = true
//! path = "${XDG_CACHE_HOME}/datasetq/metadata.db"
//! default_ttl_seconds = 1800
//!
//! [datasource]
//! localhost_alias = "host.docker.internal"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DatasetError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "DATASETQ_CONFIG";

/// Environment variable overriding `[datasource] localhost_alias`.
pub const LOCALHOST_ALIAS_ENV: &str = "DATASOURCE_LOCALHOST_ALIAS";

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<SettingsError> for DatasetError {
    fn from(err: SettingsError) -> Self {
        DatasetError::Validation(err.to_string())
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Metadata cache configuration.
    pub cache: CacheSettings,

    /// Upstream datasource configuration.
    pub datasource: DatasourceSettings,
}

/// Metadata cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Enable the metadata cache. Disabled runs a no-op store.
    pub enabled: bool,

    /// SQLite file backing the cache; `:memory:` keeps it in-process.
    /// Defaults to the platform cache directory.
    pub path: Option<String>,

    /// TTL used when a write does not name one.
    pub default_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            default_ttl_seconds: 300,
        }
    }
}

/// Upstream datasource configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasourceSettings {
    /// Host substituted for loopback upstream hosts when no tunnel is used.
    pub localhost_alias: Option<String>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text and expand environment variables.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let mut settings: Settings = toml::from_str(content)?;
        settings.resolve_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `DATASETQ_CONFIG`
    /// 2. `./datasetq.toml`
    /// 3. `~/.config/datasetq/config.toml`
    ///
    /// `DATASOURCE_LOCALHOST_ALIAS` overrides the file in every case.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = Self::load_file()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn load_file() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("datasetq.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("datasetq").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn resolve_env(&mut self) -> Result<(), SettingsError> {
        if let Some(path) = &self.cache.path {
            self.cache.path = Some(expand_env_vars(path)?);
        }
        if let Some(alias) = &self.datasource.localhost_alias {
            self.datasource.localhost_alias = Some(expand_env_vars(alias)?);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.cache.enabled && self.cache.default_ttl_seconds == 0 {
            return Err(SettingsError::InvalidConfig(
                "cache.default_ttl_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variables that take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(alias) = env::var(LOCALHOST_ALIAS_ENV) {
            let alias = alias.trim();
            if !alias.is_empty() {
                self.datasource.localhost_alias = Some(alias.to_string());
            }
        }
    }

    /// Trimmed, non-empty localhost alias.
    pub fn localhost_alias(&self) -> Option<&str> {
        self.datasource
            .localhost_alias
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
            let value =
                env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
            result.push_str(&value);
        } else {
            // $VAR ends at the first non-alphanumeric/underscore
            let mut var_name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                result.push('$');
            } else {
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            }
        }
    }

    Ok(result)
}
