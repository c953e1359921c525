//! Persistence seams for datasets, fields and datasources.
//!
//! Repositories are plain CRUD and tenant-naive. Every ownership check lives
//! in [`DatasetService`](crate::service::DatasetService).

mod memory;

pub use memory::InMemoryRepository;

use async_trait::async_trait;

use crate::error::DatasetResult;
use crate::model::{DataSource, Dataset, DatasetField, FieldRole};

/// Storage for dataset records.
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    async fn create(&self, dataset: &Dataset) -> DatasetResult<()>;

    async fn update(&self, dataset: &Dataset) -> DatasetResult<()>;

    /// Fetch a live (not soft-deleted) dataset without its fields.
    async fn get(&self, id: &str) -> DatasetResult<Option<Dataset>>;

    /// Fetch a live dataset with its fields ordered by `sort_index`.
    async fn get_with_fields(&self, id: &str) -> DatasetResult<Option<Dataset>>;

    /// One page of a tenant's live datasets, newest first, plus the total count.
    async fn list(
        &self,
        tenant_id: &str,
        offset: usize,
        limit: usize,
    ) -> DatasetResult<(Vec<Dataset>, i64)>;

    async fn soft_delete(&self, id: &str) -> DatasetResult<()>;

    /// Remove the record entirely. Used to roll back a failed create.
    async fn delete(&self, id: &str) -> DatasetResult<()>;
}

/// Storage for dataset fields.
#[async_trait]
pub trait FieldRepository: Send + Sync {
    async fn create(&self, field: &DatasetField) -> DatasetResult<()>;

    async fn update(&self, field: &DatasetField) -> DatasetResult<()>;

    async fn delete(&self, id: &str) -> DatasetResult<()>;

    async fn get(&self, id: &str) -> DatasetResult<Option<DatasetField>>;

    /// Fields of a dataset ordered by `sort_index`.
    async fn list(&self, dataset_id: &str) -> DatasetResult<Vec<DatasetField>>;

    /// Fields of a dataset with the given role, ordered by `sort_index`.
    async fn list_by_type(
        &self,
        dataset_id: &str,
        role: FieldRole,
    ) -> DatasetResult<Vec<DatasetField>>;

    /// Drop every extracted field of a dataset, keeping computed and
    /// grouping fields. Returns the count removed.
    async fn delete_extracted_fields(&self, dataset_id: &str) -> DatasetResult<u64>;

    /// Drop every computed field of a dataset. Returns the count removed.
    async fn delete_computed_fields(&self, dataset_id: &str) -> DatasetResult<u64>;
}

/// Read access to datasource connection records.
#[async_trait]
pub trait DatasourceRepository: Send + Sync {
    async fn get(&self, id: &str) -> DatasetResult<Option<DataSource>>;
}
