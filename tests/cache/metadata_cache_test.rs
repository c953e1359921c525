use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use datasetq::cache::{
    build_key, CacheError, CacheParams, CacheProvider, CacheResult, MetadataCache,
    SqliteProvider, DOMAIN_DATASOURCE_FIELDS, DOMAIN_DATASOURCE_TABLES,
};
use datasetq::config::CacheSettings;
use datasetq::error::DatasetError;

/// In-memory store that remembers every key it was handed.
#[derive(Default)]
struct RecordingProvider {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    keys: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingProvider {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    fn check(&self) -> CacheResult<()> {
        if self.fail {
            return Err(CacheError::Unavailable("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.keys.lock().unwrap().push(key.to_string());
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8], _ttl: Duration) -> CacheResult<()> {
        self.keys.lock().unwrap().push(key.to_string());
        self.check()?;
        self.entries.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

fn sqlite_cache() -> MetadataCache {
    MetadataCache::new(
        Arc::new(SqliteProvider::open_in_memory().unwrap()),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_table_list_key_layout() {
    let provider = Arc::new(RecordingProvider::default());
    let cache = MetadataCache::new(provider.clone(), Duration::from_secs(60));

    cache
        .set("t1", DOMAIN_DATASOURCE_TABLES, "ds-1", &CacheParams::new(), b"[]", None)
        .await
        .unwrap();

    assert_eq!(provider.keys(), vec!["jr:t1:datasource:tables:ds-1:none"]);
}

#[tokio::test]
async fn test_params_change_the_fingerprint() {
    let provider = Arc::new(RecordingProvider::default());
    let cache = MetadataCache::new(provider.clone(), Duration::from_secs(60));

    let mut params = CacheParams::new();
    params.insert("schema".into(), "sales".into());
    cache
        .set("t1", DOMAIN_DATASOURCE_FIELDS, "ds-1:orders", &params, b"[]", None)
        .await
        .unwrap();

    let keys = provider.keys();
    let key = &keys[0];
    assert!(key.starts_with("jr:t1:datasource:fields:ds-1:orders:"));
    let fingerprint = key.rsplit(':').next().unwrap();
    assert_eq!(fingerprint.len(), 8);
    assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));

    // Same params, same entry.
    let hit = cache
        .get("t1", DOMAIN_DATASOURCE_FIELDS, "ds-1:orders", &params)
        .await
        .unwrap();
    assert!(hit.is_some());
    assert!(cache
        .get("t1", DOMAIN_DATASOURCE_FIELDS, "ds-1:orders", &CacheParams::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_expired_entry_reads_as_miss() {
    let cache = sqlite_cache();
    let params = CacheParams::new();

    cache
        .set(
            "t1",
            DOMAIN_DATASOURCE_TABLES,
            "ds-1",
            &params,
            b"[\"orders\"]",
            Some(Duration::from_millis(5)),
        )
        .await
        .unwrap();
    std::thread::sleep(Duration::from_millis(30));

    let value = cache
        .get("t1", DOMAIN_DATASOURCE_TABLES, "ds-1", &params)
        .await
        .unwrap();
    assert!(value.is_none());
    assert_eq!(cache.metrics().misses, 1);
}

#[tokio::test]
async fn test_invalidation_is_per_tenant_and_domain() {
    let cache = sqlite_cache();
    let params = CacheParams::new();
    for (tenant, domain) in [
        ("t1", DOMAIN_DATASOURCE_TABLES),
        ("t1", DOMAIN_DATASOURCE_FIELDS),
        ("t2", DOMAIN_DATASOURCE_TABLES),
    ] {
        cache.set(tenant, domain, "ds-1", &params, b"v", None).await.unwrap();
    }

    cache.invalidate("t1", DOMAIN_DATASOURCE_TABLES).await.unwrap();

    assert!(!live(&cache, "t1", DOMAIN_DATASOURCE_TABLES).await);
    assert!(live(&cache, "t1", DOMAIN_DATASOURCE_FIELDS).await);
    assert!(live(&cache, "t2", DOMAIN_DATASOURCE_TABLES).await);
}

async fn live(cache: &MetadataCache, tenant: &str, domain: &str) -> bool {
    cache
        .get(tenant, domain, "ds-1", &CacheParams::new())
        .await
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn test_prefix_does_not_match_longer_tenant() {
    let cache = sqlite_cache();
    let params = CacheParams::new();
    cache.set("t1", DOMAIN_DATASOURCE_TABLES, "ds", &params, b"v", None).await.unwrap();
    cache.set("t10", DOMAIN_DATASOURCE_TABLES, "ds", &params, b"v", None).await.unwrap();

    cache.invalidate("t1", DOMAIN_DATASOURCE_TABLES).await.unwrap();

    assert!(cache
        .get("t10", DOMAIN_DATASOURCE_TABLES, "ds", &params)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_live_store_failure_is_returned() {
    let cache = MetadataCache::new(Arc::new(RecordingProvider::failing()), Duration::from_secs(60));

    let err = cache
        .set("t1", DOMAIN_DATASOURCE_TABLES, "ds-1", &CacheParams::new(), b"v", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::CacheDegraded(_)));
    assert!(err.is_retriable());

    let metrics = cache.export_metrics();
    assert_eq!(metrics["cache_failures"], "1");
    assert_eq!(metrics["cache_errors"], "1");
    assert_eq!(metrics["cache_degraded"], "false");
}

#[tokio::test]
async fn test_disabled_settings_yield_degraded_cache() {
    let settings = CacheSettings {
        enabled: false,
        ..Default::default()
    };
    let cache = MetadataCache::from_settings(&settings).await;

    assert!(cache.is_degraded());
    cache.invalidate("t1", DOMAIN_DATASOURCE_TABLES).await.unwrap();
    assert_eq!(cache.hit_rate(), 0.0);
}

#[tokio::test]
async fn test_file_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("metadata.db");
    let settings = CacheSettings {
        enabled: true,
        path: Some(path.to_string_lossy().into_owned()),
        default_ttl_seconds: 600,
    };
    let params = CacheParams::new();

    {
        let cache = MetadataCache::from_settings(&settings).await;
        assert!(!cache.is_degraded());
        cache
            .set("t1", DOMAIN_DATASOURCE_TABLES, "ds-1", &params, b"[\"orders\"]", None)
            .await
            .unwrap();
        cache.close().await.unwrap();
    }

    let reopened = MetadataCache::from_settings(&settings).await;
    let value = reopened
        .get("t1", DOMAIN_DATASOURCE_TABLES, "ds-1", &params)
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some(&b"[\"orders\"]"[..]));
    assert_eq!(
        build_key("t1", DOMAIN_DATASOURCE_TABLES, "ds-1", "none"),
        "jr:t1:datasource:tables:ds-1:none"
    );
}
