//! Caching for the dataset query core.
//!
//! Two independent caches live here:
//!
//! - [`ComputedFieldCache`] - in-process memo of translated computed-field
//!   fragments, keyed by field id
//! - [`MetadataCache`] - tenant-partitioned front for upstream introspection
//!   results, backed by a pluggable [`CacheProvider`]
//!
//! # Metadata cache
//!
//! The metadata cache is advisory. Values are the caller's opaque bytes and
//! every key follows the layout in [`key`]. When the backing store cannot be
//! reached at startup the cache runs *degraded*: reads miss, writes succeed,
//! and failures are only counted.
//!
//! ```text
//! MetadataCache ──► CacheProvider ──┬── NoopProvider   (disabled / degraded)
//!   degraded flag                   ├── SqliteProvider (persistent file)
//!   hit/miss counters               └── any network store
//! ```

pub mod computed;
pub mod key;
pub mod noop;
pub mod sqlite;

pub use computed::{ComputedFieldCache, ExpressionCache};
pub use key::{
    build_key, build_prefix, hash_params, CacheParams, DOMAIN_DATASOURCE_FIELDS,
    DOMAIN_DATASOURCE_TABLES,
};
pub use noop::NoopProvider;
pub use sqlite::SqliteProvider;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::error::DatasetError;

/// Time allowed for the backing store to answer at startup.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-operation deadline.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to determine cache directory")]
    NoCacheDir,

    #[error("cache lock poisoned")]
    Poisoned,

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for DatasetError {
    fn from(err: CacheError) -> Self {
        DatasetError::CacheDegraded(err.to_string())
    }
}

/// Key/value store with TTL behind the metadata cache.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Read a value. A missing or expired key is `Ok(None)`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete every key starting with `prefix`. Returns the number removed
    /// when the store reports it.
    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Check the store is reachable.
    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Provider failures, suppressed or not.
    pub failures: u64,
    /// Failures that were returned to the caller.
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    errors: AtomicU64,
}

/// Tenant-scoped metadata cache.
pub struct MetadataCache {
    provider: Arc<dyn CacheProvider>,
    degraded: AtomicBool,
    default_ttl: Duration,
    op_timeout: Duration,
    metrics: Metrics,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("provider", &self.provider.name())
            .field("degraded", &self.is_degraded())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl MetadataCache {
    /// Wrap a provider without probing it.
    pub fn new(provider: Arc<dyn CacheProvider>, default_ttl: Duration) -> Self {
        Self {
            provider,
            degraded: AtomicBool::new(false),
            default_ttl,
            op_timeout: OPERATION_TIMEOUT,
            metrics: Metrics::default(),
        }
    }

    /// A cache that never stores anything and never fails.
    pub fn disabled() -> Self {
        let cache = Self::new(Arc::new(NoopProvider), Duration::ZERO);
        cache.degraded.store(true, Ordering::Relaxed);
        cache
    }

    /// Probe `provider` and fall back to a degraded no-op cache if it does
    /// not answer within [`BOOTSTRAP_TIMEOUT`].
    pub async fn connect(provider: Arc<dyn CacheProvider>, default_ttl: Duration) -> Self {
        let name = provider.name();
        match tokio::time::timeout(BOOTSTRAP_TIMEOUT, provider.ping()).await {
            Ok(Ok(())) => {
                debug!(provider = name, "metadata cache connected");
                Self::new(provider, default_ttl)
            }
            Ok(Err(e)) => {
                warn!(provider = name, error = %e, "metadata cache unavailable, running degraded");
                Self::degraded(default_ttl)
            }
            Err(_) => {
                warn!(provider = name, "metadata cache ping timed out, running degraded");
                Self::degraded(default_ttl)
            }
        }
    }

    /// Build the cache described by `settings`.
    ///
    /// A disabled cache or a store that cannot be opened yields a degraded
    /// cache; construction never fails.
    pub async fn from_settings(settings: &CacheSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }

        let ttl = Duration::from_secs(settings.default_ttl_seconds);
        let opened = match &settings.path {
            Some(path) => SqliteProvider::open(path),
            None => SqliteProvider::default_path().and_then(SqliteProvider::open),
        };

        match opened {
            Ok(provider) => Self::connect(Arc::new(provider), ttl).await,
            Err(e) => {
                warn!(error = %e, "failed to open metadata cache, running degraded");
                Self::degraded(ttl)
            }
        }
    }

    fn degraded(default_ttl: Duration) -> Self {
        let cache = Self::new(Arc::new(NoopProvider), default_ttl);
        cache.degraded.store(true, Ordering::Relaxed);
        cache
    }

    /// Override the per-operation deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn bounded<T>(&self, op: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        }
    }

    /// Count a provider failure and decide whether the caller sees it.
    fn fail(&self, op: &'static str, err: CacheError) -> Result<(), DatasetError> {
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        if self.is_degraded() {
            warn!(op, error = %err, "metadata cache failure suppressed");
            return Ok(());
        }
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        Err(err.into())
    }

    /// Look up an entry. `Ok(None)` is a miss.
    pub async fn get(
        &self,
        tenant_id: &str,
        domain: &str,
        identity: &str,
        params: &CacheParams,
    ) -> Result<Option<Vec<u8>>, DatasetError> {
        let key = build_key(tenant_id, domain, identity, &hash_params(params));

        match self.bounded(self.provider.get(&key)).await {
            Ok(Some(value)) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Ok(None) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => self.fail("get", e).map(|_| None),
        }
    }

    /// Store an entry. `ttl = None` uses the configured default.
    pub async fn set(
        &self,
        tenant_id: &str,
        domain: &str,
        identity: &str,
        params: &CacheParams,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), DatasetError> {
        let key = build_key(tenant_id, domain, identity, &hash_params(params));
        let ttl = ttl.unwrap_or(self.default_ttl);

        match self.bounded(self.provider.set(&key, value, ttl)).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail("set", e),
        }
    }

    /// Delete a single entry.
    pub async fn delete(
        &self,
        tenant_id: &str,
        domain: &str,
        identity: &str,
        params: &CacheParams,
    ) -> Result<(), DatasetError> {
        let key = build_key(tenant_id, domain, identity, &hash_params(params));
        match self.bounded(self.provider.delete(&key)).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail("delete", e),
        }
    }

    /// Drop every entry of a tenant's domain.
    pub async fn invalidate(&self, tenant_id: &str, domain: &str) -> Result<(), DatasetError> {
        let prefix = build_prefix(tenant_id, domain);
        match self.bounded(self.provider.delete_by_prefix(&prefix)).await {
            Ok(removed) => {
                debug!(tenant_id, domain, removed, "metadata cache invalidated");
                Ok(())
            }
            Err(e) => self.fail("invalidate", e),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            errors: self.metrics.errors.load(Ordering::Relaxed),
        }
    }

    /// Hits over lookups, 0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let m = self.metrics();
        let total = m.hits + m.misses;
        if total == 0 {
            return 0.0;
        }
        m.hits as f64 / total as f64
    }

    /// Counters as strings, for a metrics endpoint.
    pub fn export_metrics(&self) -> BTreeMap<&'static str, String> {
        let m = self.metrics();
        BTreeMap::from([
            ("cache_hits", m.hits.to_string()),
            ("cache_misses", m.misses.to_string()),
            ("cache_failures", m.failures.to_string()),
            ("cache_errors", m.errors.to_string()),
            ("cache_hit_rate", format!("{:.4}", self.hit_rate())),
            ("cache_degraded", self.is_degraded().to_string()),
        ])
    }

    pub async fn close(&self) -> Result<(), DatasetError> {
        self.provider.close().await.map_err(DatasetError::from)
    }
}
