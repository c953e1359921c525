//! Provider that stores nothing.

use std::time::Duration;

use async_trait::async_trait;

use super::{CacheProvider, CacheResult};

/// Every read misses, every write succeeds.
///
/// Backs the cache when it is disabled or the real store was unreachable
/// at startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvider;

#[async_trait]
impl CacheProvider for NoopProvider {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> CacheResult<u64> {
        Ok(0)
    }
}
