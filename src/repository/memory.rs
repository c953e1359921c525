//! In-memory repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{DatasetRepository, DatasourceRepository, FieldRepository};
use crate::error::{DatasetError, DatasetResult};
use crate::model::{DataSource, Dataset, DatasetField, FieldRole};

/// One store backing all three repository traits.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    datasets: RwLock<HashMap<String, Dataset>>,
    fields: RwLock<HashMap<String, DatasetField>>,
    datasources: RwLock<HashMap<String, DataSource>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a datasource record.
    pub async fn insert_datasource(&self, ds: DataSource) {
        self.datasources.write().await.insert(ds.id.clone(), ds);
    }

    async fn fields_where(
        &self,
        dataset_id: &str,
        keep: impl Fn(&DatasetField) -> bool,
    ) -> Vec<DatasetField> {
        let mut fields: Vec<DatasetField> = self
            .fields
            .read()
            .await
            .values()
            .filter(|f| f.dataset_id == dataset_id && keep(f))
            .cloned()
            .collect();
        fields.sort_by(|a, b| a.sort_index.cmp(&b.sort_index).then(a.name.cmp(&b.name)));
        fields
    }

    async fn remove_fields_where(
        &self,
        dataset_id: &str,
        remove: impl Fn(&DatasetField) -> bool,
    ) -> u64 {
        let mut fields = self.fields.write().await;
        let before = fields.len();
        fields.retain(|_, f| !(f.dataset_id == dataset_id && remove(f)));
        (before - fields.len()) as u64
    }
}

#[async_trait]
impl DatasetRepository for InMemoryRepository {
    async fn create(&self, dataset: &Dataset) -> DatasetResult<()> {
        let mut stored = dataset.clone();
        stored.fields.clear();
        self.datasets.write().await.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn update(&self, dataset: &Dataset) -> DatasetResult<()> {
        let mut datasets = self.datasets.write().await;
        match datasets.get_mut(&dataset.id) {
            Some(existing) if !existing.deleted => {
                let mut stored = dataset.clone();
                stored.fields.clear();
                stored.updated_at = Utc::now();
                *existing = stored;
                Ok(())
            }
            _ => Err(DatasetError::not_found("dataset")),
        }
    }

    async fn get(&self, id: &str) -> DatasetResult<Option<Dataset>> {
        Ok(self
            .datasets
            .read()
            .await
            .get(id)
            .filter(|d| !d.deleted)
            .cloned())
    }

    async fn get_with_fields(&self, id: &str) -> DatasetResult<Option<Dataset>> {
        let Some(mut dataset) = DatasetRepository::get(self, id).await? else {
            return Ok(None);
        };
        dataset.fields = self.fields_where(id, |_| true).await;
        Ok(Some(dataset))
    }

    async fn list(
        &self,
        tenant_id: &str,
        offset: usize,
        limit: usize,
    ) -> DatasetResult<(Vec<Dataset>, i64)> {
        let mut owned: Vec<Dataset> = self
            .datasets
            .read()
            .await
            .values()
            .filter(|d| d.tenant_id == tenant_id && !d.deleted)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = owned.len() as i64;
        let page = owned.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn soft_delete(&self, id: &str) -> DatasetResult<()> {
        match self.datasets.write().await.get_mut(id) {
            Some(d) if !d.deleted => {
                d.deleted = true;
                d.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(DatasetError::not_found("dataset")),
        }
    }

    async fn delete(&self, id: &str) -> DatasetResult<()> {
        self.datasets
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DatasetError::not_found("dataset"))
    }
}

#[async_trait]
impl FieldRepository for InMemoryRepository {
    async fn create(&self, field: &DatasetField) -> DatasetResult<()> {
        let mut fields = self.fields.write().await;
        let duplicate = fields
            .values()
            .any(|f| f.dataset_id == field.dataset_id && f.name == field.name);
        if duplicate {
            return Err(DatasetError::validation(format!(
                "field name '{}' already exists",
                field.name
            )));
        }
        fields.insert(field.id.clone(), field.clone());
        Ok(())
    }

    async fn update(&self, field: &DatasetField) -> DatasetResult<()> {
        let mut fields = self.fields.write().await;
        match fields.get_mut(&field.id) {
            Some(existing) => {
                *existing = field.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(DatasetError::not_found("field")),
        }
    }

    async fn delete(&self, id: &str) -> DatasetResult<()> {
        self.fields
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DatasetError::not_found("field"))
    }

    async fn get(&self, id: &str) -> DatasetResult<Option<DatasetField>> {
        Ok(self.fields.read().await.get(id).cloned())
    }

    async fn list(&self, dataset_id: &str) -> DatasetResult<Vec<DatasetField>> {
        Ok(self.fields_where(dataset_id, |_| true).await)
    }

    async fn list_by_type(
        &self,
        dataset_id: &str,
        role: FieldRole,
    ) -> DatasetResult<Vec<DatasetField>> {
        Ok(self.fields_where(dataset_id, |f| f.role == role).await)
    }

    async fn delete_extracted_fields(&self, dataset_id: &str) -> DatasetResult<u64> {
        Ok(self.remove_fields_where(dataset_id, |f| f.is_extracted()).await)
    }

    async fn delete_computed_fields(&self, dataset_id: &str) -> DatasetResult<u64> {
        Ok(self.remove_fields_where(dataset_id, |f| f.is_computed).await)
    }
}

#[async_trait]
impl DatasourceRepository for InMemoryRepository {
    async fn get(&self, id: &str) -> DatasetResult<Option<DataSource>> {
        Ok(self.datasources.read().await.get(id).cloned())
    }
}
