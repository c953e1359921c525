//! Dataset service facade.
//!
//! Orchestrates the rest of the crate for one request at a time:
//!
//! ```text
//! create/update ─► safety gate ─► persist ─► schema probe ─► fields
//! query         ─► tenant check ─► QueryAssembler ─► QueryExecutor
//! field CRUD    ─► expression validation ─► computed-field cache invalidation
//! ```
//!
//! Every ownership check compares the tenant of the stored record with the
//! request tenant. A mismatch is reported exactly like a missing record.

mod dependencies;
mod request;

pub use dependencies::resolve_dependencies;
pub use request::{
    CreateFieldRequest, CreateRequest, DatasetPage, SchemaResponse, UpdateFieldRequest,
    UpdateRequest,
};

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ComputedFieldCache, MetadataCache};
use crate::error::{DatasetError, DatasetResult};
use crate::expr::{references_field, validate_expression};
use crate::metadata::CachedMetadataService;
use crate::model::{
    DataSource, Dataset, DatasetField, DatasetType, FieldDataType, FieldRole, QueryRequest,
    QueryResponse, Row,
};
use crate::query::{normalize_pagination, QueryAssembler};
use crate::repository::{
    DatasetRepository, DatasourceRepository, FieldRepository, InMemoryRepository,
};
use crate::schema::{extract_fields, probe_query};
use crate::sql::validate_sql_safety;
use crate::upstream::QueryExecutor;

/// The repositories the facade persists through.
#[derive(Clone)]
pub struct Repositories {
    pub datasets: Arc<dyn DatasetRepository>,
    pub fields: Arc<dyn FieldRepository>,
    pub datasources: Arc<dyn DatasourceRepository>,
}

impl Repositories {
    /// Use one in-memory store for all three.
    pub fn in_memory(store: Arc<InMemoryRepository>) -> Self {
        Self {
            datasets: store.clone(),
            fields: store.clone(),
            datasources: store,
        }
    }
}

/// Dataset operations scoped to a tenant.
pub struct DatasetService {
    datasets: Arc<dyn DatasetRepository>,
    fields: Arc<dyn FieldRepository>,
    datasources: Arc<dyn DatasourceRepository>,
    executor: Arc<QueryExecutor>,
    assembler: QueryAssembler,
    metadata: CachedMetadataService,
}

impl DatasetService {
    pub fn new(
        repos: Repositories,
        executor: Arc<QueryExecutor>,
        cache: Arc<MetadataCache>,
    ) -> Self {
        let metadata =
            CachedMetadataService::new(repos.datasources.clone(), executor.clone(), cache);
        Self {
            datasets: repos.datasets,
            fields: repos.fields,
            datasources: repos.datasources,
            executor,
            assembler: QueryAssembler::new(Arc::new(ComputedFieldCache::new())),
            metadata,
        }
    }

    /// Replace the assembler, e.g. to share a computed-field cache.
    pub fn with_assembler(mut self, assembler: QueryAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn computed_cache(&self) -> &ComputedFieldCache {
        self.assembler.cache()
    }

    /// Table and column introspection for the tenant's datasources.
    pub fn metadata(&self) -> &CachedMetadataService {
        &self.metadata
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    /// Create a dataset and, for SQL datasets, extract its fields.
    ///
    /// If extraction fails the new record is removed again and the
    /// extraction error is returned.
    #[instrument(skip_all, fields(tenant = %req.tenant_id), err)]
    pub async fn create(&self, req: CreateRequest) -> DatasetResult<Dataset> {
        if req.name.trim().is_empty() {
            return Err(DatasetError::validation("name is required"));
        }
        let dataset_type = DatasetType::parse(&req.dataset_type)?;
        if dataset_type == DatasetType::Sql && req.datasource_id.is_none() {
            return Err(DatasetError::validation(
                "datasourceId is required for SQL datasets",
            ));
        }

        let datasource = match &req.datasource_id {
            Some(id) => Some(self.owned_datasource(&req.tenant_id, id).await?),
            None => None,
        };

        let mut dataset = Dataset::new(
            req.tenant_id,
            req.name,
            dataset_type,
            req.datasource_id,
            config_text(&req.config),
        );
        dataset.created_by = req.created_by;
        if dataset_type == DatasetType::Sql {
            validate_sql_safety(&dataset.base_query()?)?;
        }

        self.datasets.create(&dataset).await?;

        if let Some(ds) = datasource.filter(|_| dataset.is_sql_backed()) {
            if let Err(err) = self.extract_schema(&dataset, &ds).await {
                let err = err.context("failed to extract fields");
                return match self.datasets.delete(&dataset.id).await {
                    Ok(()) => Err(err),
                    Err(rollback) => {
                        warn!(dataset_id = %dataset.id, error = %rollback, "rollback of failed create failed");
                        Err(err.map_message(|m| format!("{m} (rollback failed: {rollback})")))
                    }
                };
            }
        }

        info!(dataset_id = %dataset.id, "dataset created");
        self.load_with_fields(&dataset.id).await
    }

    /// Fetch a dataset without its fields.
    #[instrument(skip(self), err)]
    pub async fn get(&self, tenant_id: &str, id: &str) -> DatasetResult<Dataset> {
        match self.datasets.get(id).await? {
            Some(d) if d.tenant_id == tenant_id => Ok(d),
            _ => Err(DatasetError::not_found("dataset")),
        }
    }

    /// Fetch a dataset with its fields ordered by `sort_index`.
    #[instrument(skip(self), err)]
    pub async fn get_with_fields(&self, tenant_id: &str, id: &str) -> DatasetResult<Dataset> {
        match self.datasets.get_with_fields(id).await? {
            Some(d) if d.tenant_id == tenant_id => Ok(d),
            _ => Err(DatasetError::not_found("dataset")),
        }
    }

    /// One page of the tenant's datasets.
    pub async fn list(
        &self,
        tenant_id: &str,
        page: i64,
        page_size: i64,
    ) -> DatasetResult<DatasetPage> {
        let (page, page_size) = normalize_pagination(page, page_size);
        let offset = ((page - 1) * page_size) as usize;
        let (items, total) = self
            .datasets
            .list(tenant_id, offset, page_size as usize)
            .await?;
        Ok(DatasetPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Patch a dataset. A changed config is re-validated and re-extracted.
    #[instrument(skip_all, fields(tenant = %req.tenant_id, dataset_id = %req.id), err)]
    pub async fn update(&self, req: UpdateRequest) -> DatasetResult<Dataset> {
        if req.id.is_empty() {
            return Err(DatasetError::validation("id is required"));
        }
        let mut dataset = self.get(&req.tenant_id, &req.id).await?;

        if let Some(name) = req.name {
            if name.trim().is_empty() {
                return Err(DatasetError::validation("name is required"));
            }
            dataset.name = name;
        }

        if let Some(config) = &req.config {
            let config = config_text(config);
            if config != dataset.config {
                dataset.config = config;
                if dataset.dataset_type == DatasetType::Sql {
                    validate_sql_safety(&dataset.base_query()?)?;
                }
                if dataset.is_sql_backed() {
                    let ds = self.dataset_datasource(&dataset).await?;
                    self.extract_schema(&dataset, &ds)
                        .await
                        .map_err(|e| e.context("failed to re-extract fields"))?;
                }
            }
        }

        if let Some(status) = req.status {
            dataset.status = status;
        }

        self.datasets.update(&dataset).await?;
        self.load_with_fields(&dataset.id).await
    }

    /// Soft-delete a dataset and drop the tenant's cached introspection.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, tenant_id: &str, id: &str) -> DatasetResult<()> {
        let dataset = self.get(tenant_id, id).await?;
        self.datasets.soft_delete(&dataset.id).await?;

        let fields = self.fields.list(&dataset.id).await?;
        self.invalidate_computed(&fields);
        if let Err(e) = self.invalidate_datasource(tenant_id).await {
            warn!(error = %e, "metadata cache invalidation failed");
        }

        info!(dataset_id = %dataset.id, "dataset deleted");
        Ok(())
    }

    /// Drop every cached table and column listing of the tenant.
    pub async fn invalidate_datasource(&self, tenant_id: &str) -> DatasetResult<()> {
        self.metadata.invalidate_tenant(tenant_id).await
    }

    /// First rows of a SQL dataset's base query.
    #[instrument(skip(self), err)]
    pub async fn preview(&self, tenant_id: &str, id: &str) -> DatasetResult<Vec<Row>> {
        let dataset = self.get_with_fields(tenant_id, id).await?;
        if !dataset.is_sql_backed() {
            return Err(DatasetError::validation(
                "preview not implemented for this dataset type",
            ));
        }

        let ds = self.dataset_datasource(&dataset).await?;
        let sql = self.assembler.preview_sql(&dataset)?;
        self.executor.preview(&ds, &sql).await
    }

    /// Run a query against a SQL dataset.
    #[instrument(skip(self, request), fields(dataset_id = %request.dataset_id), err)]
    pub async fn query(
        &self,
        tenant_id: &str,
        request: &QueryRequest,
    ) -> DatasetResult<QueryResponse> {
        let dataset = self.get_with_fields(tenant_id, &request.dataset_id).await?;
        if !dataset.is_sql_backed() {
            return Err(DatasetError::validation(
                "query not implemented for this dataset type",
            ));
        }

        let ds = self.dataset_datasource(&dataset).await?;
        let assembled = self.assembler.assemble(&dataset, request)?;
        self.executor.execute(&ds, &assembled).await
    }

    /// Fields split into dimensions, measures and computed fields.
    pub async fn get_schema(&self, tenant_id: &str, id: &str) -> DatasetResult<SchemaResponse> {
        let dataset = self.get_with_fields(tenant_id, id).await?;
        Ok(SchemaResponse::from_fields(dataset.fields))
    }

    // =========================================================================
    // Fields
    // =========================================================================

    /// Add a computed or grouping field.
    #[instrument(skip_all, fields(tenant = %req.tenant_id, dataset_id = %req.dataset_id), err)]
    pub async fn create_computed_field(
        &self,
        req: CreateFieldRequest,
    ) -> DatasetResult<DatasetField> {
        if req.name.trim().is_empty() {
            return Err(DatasetError::validation("name is required"));
        }
        let role = FieldRole::parse(&req.role)?;
        let data_type = parse_data_type(&req.data_type)?;

        let expression = req.expression.filter(|e| !e.trim().is_empty());
        let grouping_rule = req.grouping_rule.filter(|r| !r.trim().is_empty());
        if req.is_grouping_field {
            if grouping_rule.is_none() {
                return Err(DatasetError::validation(
                    "groupingRule is required for grouping fields",
                ));
            }
        } else if expression.is_none() {
            return Err(DatasetError::validation(
                "expression is required for computed fields",
            ));
        }

        let dataset = self.get(&req.tenant_id, &req.dataset_id).await?;
        let existing = self.fields.list(&dataset.id).await?;
        if existing.iter().any(|f| f.name == req.name) {
            return Err(DatasetError::validation(format!(
                "field name '{}' already exists",
                req.name
            )));
        }

        if let (false, Some(expr)) = (req.is_grouping_field, &expression) {
            check_expression(expr, &req.name, &existing)?;
        }

        let mut field = DatasetField::computed(
            &dataset.id,
            req.name,
            role,
            data_type,
            expression.unwrap_or_default(),
        );
        field.display_name = req.display_name;
        field.is_computed = !req.is_grouping_field;
        if !field.is_computed {
            field.expression = None;
        }
        field.is_grouping_field = req.is_grouping_field;
        field.grouping_rule = grouping_rule;
        field.grouping_enabled = req.grouping_enabled;

        if field.is_computed {
            let mut patched = existing;
            patched.push(field.clone());
            resolve_dependencies(&patched, &field.id)?;
        }

        self.fields.create(&field).await?;
        self.computed_cache().invalidate_field(&field.id);

        debug!(field_id = %field.id, "computed field created");
        Ok(field)
    }

    /// Patch a field.
    ///
    /// Whether a field is computed cannot change, and only computed fields
    /// take an expression.
    #[instrument(skip_all, fields(tenant = %req.tenant_id, field_id = %req.field_id), err)]
    pub async fn update_field(&self, req: UpdateFieldRequest) -> DatasetResult<DatasetField> {
        let (mut field, dataset) = self.owned_field(&req.tenant_id, &req.field_id).await?;

        if req.is_computed.is_some_and(|c| c != field.is_computed) {
            return Err(DatasetError::validation("isComputed cannot be changed"));
        }

        if let Some(display_name) = req.display_name {
            field.display_name = Some(display_name);
        }
        if let Some(role) = &req.role {
            field.role = FieldRole::parse(role)?;
        }
        if let Some(data_type) = &req.data_type {
            field.data_type = parse_data_type(data_type)?;
        }
        if let Some(sortable) = req.is_sortable {
            field.is_sortable = sortable;
        }
        if let Some(groupable) = req.is_groupable {
            field.is_groupable = groupable;
        }
        if let Some(order) = req.sort_order {
            field.default_sort_order = order;
        }
        if let Some(grouping) = req.is_grouping_field {
            field.is_grouping_field = grouping;
        }
        if let Some(rule) = req.grouping_rule {
            field.grouping_rule = Some(rule);
        }
        if let Some(enabled) = req.grouping_enabled {
            field.grouping_enabled = Some(enabled);
        }

        let fields = self.fields.list(&dataset.id).await?;
        if let Some(expression) = req.expression {
            if !field.is_computed {
                return Err(DatasetError::validation(
                    "expression can only be set on computed fields",
                ));
            }
            if expression.trim().is_empty() {
                return Err(DatasetError::validation(
                    "expression is required for computed fields",
                ));
            }
            let others: Vec<DatasetField> =
                fields.iter().filter(|f| f.id != field.id).cloned().collect();
            check_expression(&expression, &field.name, &others)?;
            field.expression = Some(expression);

            let mut patched = others;
            patched.push(field.clone());
            resolve_dependencies(&patched, &field.id)?;
        }

        self.fields.update(&field).await?;
        self.invalidate_computed(&fields);
        Ok(field)
    }

    /// Remove a computed or grouping field. Extracted fields only change
    /// through re-extraction, and a field other computed fields still
    /// reference stays.
    #[instrument(skip(self), err)]
    pub async fn delete_field(&self, tenant_id: &str, field_id: &str) -> DatasetResult<()> {
        let (field, dataset) = self.owned_field(tenant_id, field_id).await?;
        if field.is_extracted() {
            return Err(DatasetError::validation("cannot delete non-computed fields"));
        }

        let fields = self.fields.list(&dataset.id).await?;
        if let Some(dependant) = fields.iter().find(|f| {
            f.id != field.id
                && f.computed_expression()
                    .is_some_and(|e| references_field(e, &field.name))
        }) {
            return Err(DatasetError::validation(format!(
                "field '{}' is referenced by '{}'",
                field.name, dependant.name
            )));
        }

        self.fields.delete(&field.id).await?;
        self.invalidate_computed(&fields);
        Ok(())
    }

    pub async fn list_fields(
        &self,
        tenant_id: &str,
        dataset_id: &str,
    ) -> DatasetResult<Vec<DatasetField>> {
        let dataset = self.get(tenant_id, dataset_id).await?;
        self.fields.list(&dataset.id).await
    }

    pub async fn list_dimensions(
        &self,
        tenant_id: &str,
        dataset_id: &str,
    ) -> DatasetResult<Vec<DatasetField>> {
        let dataset = self.get(tenant_id, dataset_id).await?;
        self.fields.list_by_type(&dataset.id, FieldRole::Dimension).await
    }

    pub async fn list_measures(
        &self,
        tenant_id: &str,
        dataset_id: &str,
    ) -> DatasetResult<Vec<DatasetField>> {
        let dataset = self.get(tenant_id, dataset_id).await?;
        self.fields.list_by_type(&dataset.id, FieldRole::Measure).await
    }

    /// Computed fields `field_id` depends on, dependencies first.
    pub async fn resolve_computed_field_dependencies(
        &self,
        tenant_id: &str,
        dataset_id: &str,
        field_id: &str,
    ) -> DatasetResult<Vec<DatasetField>> {
        let dataset = self.get(tenant_id, dataset_id).await?;
        let fields = self.fields.list(&dataset.id).await?;
        resolve_dependencies(&fields, field_id)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn owned_datasource(&self, tenant_id: &str, id: &str) -> DatasetResult<DataSource> {
        match self.datasources.get(id).await? {
            Some(ds) if ds.tenant_id == tenant_id => Ok(ds),
            _ => Err(DatasetError::not_found("datasource")),
        }
    }

    async fn dataset_datasource(&self, dataset: &Dataset) -> DatasetResult<DataSource> {
        let id = dataset
            .datasource_id
            .as_deref()
            .ok_or_else(|| DatasetError::validation("datasourceId is required for SQL datasets"))?;
        self.owned_datasource(&dataset.tenant_id, id).await
    }

    async fn owned_field(
        &self,
        tenant_id: &str,
        field_id: &str,
    ) -> DatasetResult<(DatasetField, Dataset)> {
        let field = self
            .fields
            .get(field_id)
            .await?
            .ok_or_else(|| DatasetError::not_found("field"))?;
        match self.datasets.get(&field.dataset_id).await? {
            Some(d) if d.tenant_id == tenant_id => Ok((field, d)),
            _ => Err(DatasetError::not_found("field")),
        }
    }

    async fn load_with_fields(&self, id: &str) -> DatasetResult<Dataset> {
        self.datasets
            .get_with_fields(id)
            .await?
            .ok_or_else(|| DatasetError::not_found("dataset"))
    }

    /// Probe the base query and rewrite the dataset's extracted fields.
    /// Computed and grouping fields are kept.
    async fn extract_schema(&self, dataset: &Dataset, ds: &DataSource) -> DatasetResult<usize> {
        let base = dataset.base_query()?;
        let columns = self.executor.describe(ds, &probe_query(&base)).await?;
        let extracted = extract_fields(&dataset.id, &columns);

        let existing = self.fields.list(&dataset.id).await?;
        let authored: HashSet<&str> = existing
            .iter()
            .filter(|f| !f.is_extracted())
            .map(|f| f.name.as_str())
            .collect();
        if let Some(clash) = extracted.iter().find(|f| authored.contains(f.name.as_str())) {
            return Err(DatasetError::validation(format!(
                "column '{}' conflicts with a computed field",
                clash.name
            )));
        }

        let removed = self.fields.delete_extracted_fields(&dataset.id).await?;
        for field in &extracted {
            self.fields.create(field).await?;
        }
        self.invalidate_computed(&existing);

        debug!(
            dataset_id = %dataset.id,
            removed,
            extracted = extracted.len(),
            "fields extracted"
        );
        Ok(extracted.len())
    }

    /// Computed fragments embed their dependencies, so any field change
    /// drops the whole dataset's entries.
    fn invalidate_computed(&self, fields: &[DatasetField]) {
        for field in fields.iter().filter(|f| f.is_computed) {
            self.computed_cache().invalidate_field(&field.id);
        }
    }
}

fn config_text(config: &Value) -> String {
    match config {
        Value::Null => "{}".to_string(),
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn parse_data_type(s: &str) -> DatasetResult<FieldDataType> {
    if s.is_empty() {
        Ok(FieldDataType::default())
    } else {
        FieldDataType::parse(s)
    }
}

/// Write-time checks on a computed expression: no self-reference, and every
/// reference names one of `others`.
fn check_expression(
    expression: &str,
    own_name: &str,
    others: &[DatasetField],
) -> DatasetResult<()> {
    if references_field(expression, own_name) {
        return Err(DatasetError::validation("expression cannot reference itself"));
    }
    let names: Vec<String> = others.iter().map(|f| f.name.clone()).collect();
    validate_expression(expression, &names)?;
    Ok(())
}
