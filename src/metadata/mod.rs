//! Upstream introspection through the metadata cache.
//!
//! ```text
//! CachedMetadataService
//!   ├── get_tables(tenant, datasource)         datasource:tables  identity = datasource id
//!   └── get_fields(tenant, datasource, table)  datasource:fields  identity = "<datasource>:<table>"
//!            │ miss
//!            ▼
//!      information_schema via QueryExecutor
//! ```
//!
//! Values are stored as JSON. An entry that fails to decode is treated as a
//! miss, and so is any cache error: introspection always falls through to
//! the live database.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheParams, MetadataCache, DOMAIN_DATASOURCE_FIELDS, DOMAIN_DATASOURCE_TABLES};
use crate::error::{DatasetError, DatasetResult};
use crate::model::{DataSource, Row};
use crate::repository::DatasourceRepository;
use crate::upstream::QueryExecutor;

/// Lifetime of cached introspection results.
pub const METADATA_TTL: Duration = Duration::from_secs(30 * 60);

const TABLES_SQL: &str = "SELECT table_name AS name FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name";

const FIELDS_SQL: &str = "SELECT column_name AS name, data_type AS type, \
     is_nullable AS nullable, column_comment AS comment FROM information_schema.columns \
     WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position";

/// A column of an upstream table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub comment: String,
}

impl FieldInfo {
    fn from_row(row: &Row) -> Self {
        Self {
            name: text(row, "name"),
            data_type: text(row, "type"),
            nullable: text(row, "nullable").eq_ignore_ascii_case("YES"),
            comment: text(row, "comment"),
        }
    }
}

fn text(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Table and column listings for a tenant's datasources.
pub struct CachedMetadataService {
    datasources: Arc<dyn DatasourceRepository>,
    executor: Arc<QueryExecutor>,
    cache: Arc<MetadataCache>,
}

impl CachedMetadataService {
    pub fn new(
        datasources: Arc<dyn DatasourceRepository>,
        executor: Arc<QueryExecutor>,
        cache: Arc<MetadataCache>,
    ) -> Self {
        Self {
            datasources,
            executor,
            cache,
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    async fn datasource(&self, tenant_id: &str, datasource_id: &str) -> DatasetResult<DataSource> {
        match self.datasources.get(datasource_id).await? {
            Some(ds) if ds.tenant_id == tenant_id => Ok(ds),
            _ => Err(DatasetError::not_found("datasource")),
        }
    }

    /// Base tables of a datasource, ordered by name.
    #[instrument(skip(self), err)]
    pub async fn get_tables(
        &self,
        tenant_id: &str,
        datasource_id: &str,
    ) -> DatasetResult<Vec<String>> {
        let ds = self.datasource(tenant_id, datasource_id).await?;

        if let Some(tables) = self
            .lookup(tenant_id, DOMAIN_DATASOURCE_TABLES, datasource_id)
            .await
        {
            return Ok(tables);
        }

        let rows = self.executor.fetch(&ds, TABLES_SQL, &[]).await?;
        let tables: Vec<String> = rows.iter().map(|r| text(r, "name")).collect();
        debug!(count = tables.len(), "tables introspected");

        self.store(tenant_id, DOMAIN_DATASOURCE_TABLES, datasource_id, &tables)
            .await;
        Ok(tables)
    }

    /// Columns of one table, in ordinal order.
    #[instrument(skip(self), err)]
    pub async fn get_fields(
        &self,
        tenant_id: &str,
        datasource_id: &str,
        table: &str,
    ) -> DatasetResult<Vec<FieldInfo>> {
        let ds = self.datasource(tenant_id, datasource_id).await?;
        let identity = format!("{datasource_id}:{table}");

        if let Some(fields) = self
            .lookup(tenant_id, DOMAIN_DATASOURCE_FIELDS, &identity)
            .await
        {
            return Ok(fields);
        }

        let rows = self
            .executor
            .fetch(&ds, FIELDS_SQL, &[Value::String(table.to_string())])
            .await?;
        let fields: Vec<FieldInfo> = rows.iter().map(FieldInfo::from_row).collect();
        debug!(count = fields.len(), "columns introspected");

        self.store(tenant_id, DOMAIN_DATASOURCE_FIELDS, &identity, &fields)
            .await;
        Ok(fields)
    }

    /// Drop every cached listing for a tenant. Both domains are attempted;
    /// the first failure is returned.
    pub async fn invalidate_tenant(&self, tenant_id: &str) -> DatasetResult<()> {
        let tables = self
            .cache
            .invalidate(tenant_id, DOMAIN_DATASOURCE_TABLES)
            .await;
        let fields = self
            .cache
            .invalidate(tenant_id, DOMAIN_DATASOURCE_FIELDS)
            .await;
        tables.and(fields)
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        tenant_id: &str,
        domain: &str,
        identity: &str,
    ) -> Option<T> {
        let bytes = match self
            .cache
            .get(tenant_id, domain, identity, &CacheParams::new())
            .await
        {
            Ok(hit) => hit?,
            Err(e) => {
                warn!(domain, error = %e, "metadata cache read failed, introspecting");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(domain, error = %e, "discarding undecodable metadata cache entry");
                None
            }
        }
    }

    async fn store<T: Serialize + ?Sized>(
        &self,
        tenant_id: &str,
        domain: &str,
        identity: &str,
        value: &T,
    ) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(domain, error = %e, "failed to encode metadata cache entry");
                return;
            }
        };

        if let Err(e) = self
            .cache
            .set(
                tenant_id,
                domain,
                identity,
                &CacheParams::new(),
                &bytes,
                Some(METADATA_TTL),
            )
            .await
        {
            warn!(domain, error = %e, "metadata cache write failed");
        }
    }
}
