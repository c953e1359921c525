mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datasetq::error::{DatasetError, SafetyViolation};
use datasetq::model::{Dataset, FieldDataType, FieldRole, Filter, QueryRequest};
use datasetq::repository::{DatasetRepository, InMemoryRepository};
use datasetq::schema::ColumnMeta;
use datasetq::service::{CreateFieldRequest, CreateRequest, Repositories, UpdateRequest};
use datasetq::upstream::UpstreamError;
use datasetq::DatasetResult;
use serde_json::json;
use support::{field_names, sql_request, Harness, ORDERS_SQL};

/// Dataset store whose hard delete always fails.
struct UndeletableDatasets(Arc<InMemoryRepository>);

#[async_trait]
impl DatasetRepository for UndeletableDatasets {
    async fn create(&self, dataset: &Dataset) -> DatasetResult<()> {
        DatasetRepository::create(&*self.0, dataset).await
    }

    async fn update(&self, dataset: &Dataset) -> DatasetResult<()> {
        DatasetRepository::update(&*self.0, dataset).await
    }

    async fn get(&self, id: &str) -> DatasetResult<Option<Dataset>> {
        DatasetRepository::get(&*self.0, id).await
    }

    async fn get_with_fields(&self, id: &str) -> DatasetResult<Option<Dataset>> {
        self.0.get_with_fields(id).await
    }

    async fn list(
        &self,
        tenant_id: &str,
        offset: usize,
        limit: usize,
    ) -> DatasetResult<(Vec<Dataset>, i64)> {
        DatasetRepository::list(&*self.0, tenant_id, offset, limit).await
    }

    async fn soft_delete(&self, id: &str) -> DatasetResult<()> {
        self.0.soft_delete(id).await
    }

    async fn delete(&self, _id: &str) -> DatasetResult<()> {
        Err(DatasetError::upstream("database is read-only"))
    }
}

#[tokio::test]
async fn test_create_extracts_fields_from_probe() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    assert_eq!(dataset.tenant_id, "t1");
    assert_eq!(dataset.created_by, "user-1");
    assert_eq!(field_names(&dataset), vec!["created", "flag", "id", "name"]);
    assert!(dataset.fields.iter().all(|f| !f.is_computed));
    assert_eq!(
        h.warehouse.statements(),
        vec![format!("SELECT * FROM ({ORDERS_SQL}) AS tmp LIMIT 0")]
    );
}

#[tokio::test]
async fn test_schema_buckets_by_role() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    let schema = h.service.get_schema("t1", &dataset.id).await.unwrap();
    let names = |fields: &[datasetq::model::DatasetField]| -> Vec<String> {
        fields.iter().map(|f| f.name.clone()).collect()
    };

    assert_eq!(names(&schema.dimensions), vec!["name", "created", "flag"]);
    assert_eq!(names(&schema.measures), vec!["id"]);
    assert!(schema.computed.is_empty());

    let flag = &schema.dimensions[2];
    assert_eq!(flag.data_type, FieldDataType::Boolean);
    assert_eq!(schema.dimensions[1].data_type, FieldDataType::Date);
    assert_eq!(schema.measures[0].role, FieldRole::Measure);
}

#[tokio::test]
async fn test_unsafe_query_rejected_before_persisting() {
    let h = Harness::new().await;

    let err = h
        .service
        .create(sql_request("t1", "bad", "ds-1", "SELECT * FROM t; DROP TABLE t"))
        .await
        .unwrap_err();

    assert_eq!(err, DatasetError::Safety(SafetyViolation::MultipleStatements));
    assert_eq!(h.service.list("t1", 1, 10).await.unwrap().total, 0);
    assert!(h.warehouse.statements().is_empty());
}

#[tokio::test]
async fn test_create_input_checks() {
    let h = Harness::new().await;

    let mut req = sql_request("t1", "orders", "ds-1", ORDERS_SQL);
    req.datasource_id = None;
    assert_eq!(
        h.service.create(req).await.unwrap_err(),
        DatasetError::Validation("datasourceId is required for SQL datasets".into())
    );

    let req = sql_request("t1", "  ", "ds-1", ORDERS_SQL);
    assert!(matches!(
        h.service.create(req).await,
        Err(DatasetError::Validation(_))
    ));

    let mut req = sql_request("t1", "orders", "ds-1", ORDERS_SQL);
    req.dataset_type = "graphql".into();
    assert!(matches!(
        h.service.create(req).await,
        Err(DatasetError::Validation(_))
    ));
}

#[tokio::test]
async fn test_foreign_datasource_is_not_found() {
    let h = Harness::new().await;

    let err = h
        .service
        .create(sql_request("t1", "orders", "ds-2", ORDERS_SQL))
        .await
        .unwrap_err();
    assert_eq!(err, DatasetError::NotFound("datasource".into()));
}

#[tokio::test]
async fn test_failed_extraction_removes_dataset() {
    let h = Harness::new().await;
    h.warehouse
        .fail_describe(UpstreamError::query("Unknown column 'x' in 'field list'"));

    let err = h
        .service
        .create(sql_request("t1", "orders", "ds-1", "SELECT x FROM orders"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        DatasetError::Upstream(
            "failed to extract fields: query execution failed: Unknown column 'x' in 'field list'"
                .into()
        )
    );
    assert_eq!(h.service.list("t1", 1, 10).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let store = Arc::new(InMemoryRepository::new());
    let repos = Repositories {
        datasets: Arc::new(UndeletableDatasets(store.clone())),
        fields: store.clone(),
        datasources: store.clone(),
    };
    let h = Harness::with_repositories(store, repos).await;
    h.warehouse.fail_describe(UpstreamError::query("syntax error"));

    let err = h
        .service
        .create(sql_request("t1", "orders", "ds-1", ORDERS_SQL))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with("failed to extract fields: "), "{message}");
    assert!(
        message.ends_with("(rollback failed: database is read-only)"),
        "{message}"
    );
}

#[tokio::test]
async fn test_tenants_cannot_see_each_other() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let not_found = DatasetError::NotFound("dataset".into());

    assert_eq!(h.service.get("t2", &dataset.id).await.unwrap_err(), not_found);
    assert_eq!(
        h.service.get_with_fields("t2", &dataset.id).await.unwrap_err(),
        not_found
    );
    assert_eq!(
        h.service.get_schema("t2", &dataset.id).await.unwrap_err(),
        not_found
    );
    assert_eq!(h.service.preview("t2", &dataset.id).await.unwrap_err(), not_found);
    assert_eq!(
        h.service
            .query("t2", &QueryRequest::new(&dataset.id))
            .await
            .unwrap_err(),
        not_found
    );
    assert_eq!(
        h.service.list_fields("t2", &dataset.id).await.unwrap_err(),
        not_found
    );
    assert_eq!(h.service.delete("t2", &dataset.id).await.unwrap_err(), not_found);

    let update = UpdateRequest {
        id: dataset.id.clone(),
        name: Some("stolen".into()),
        tenant_id: "t2".into(),
        ..Default::default()
    };
    assert_eq!(h.service.update(update).await.unwrap_err(), not_found);

    let field = CreateFieldRequest {
        dataset_id: dataset.id.clone(),
        name: "double_id".into(),
        role: "measure".into(),
        expression: Some("[id] * 2".into()),
        tenant_id: "t2".into(),
        ..Default::default()
    };
    assert_eq!(
        h.service.create_computed_field(field).await.unwrap_err(),
        not_found
    );

    assert_eq!(h.service.list("t2", 1, 10).await.unwrap().total, 0);
    assert_eq!(h.service.get("t1", &dataset.id).await.unwrap().name, "orders");
}

#[tokio::test]
async fn test_update_reextracts_and_keeps_computed_fields() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    h.service
        .create_computed_field(CreateFieldRequest {
            dataset_id: dataset.id.clone(),
            name: "double_id".into(),
            role: "measure".into(),
            data_type: "number".into(),
            expression: Some("[id] * 2".into()),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    h.warehouse.set_columns(vec![
        ColumnMeta::new("id", "BIGINT UNSIGNED"),
        ColumnMeta::new("amount", "DECIMAL(10,2)"),
    ]);
    let updated = h
        .service
        .update(UpdateRequest {
            id: dataset.id.clone(),
            config: Some(json!({"query": "SELECT id, amount FROM payments"})),
            status: Some(0),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(field_names(&updated), vec!["amount", "double_id", "id"]);
    assert_eq!(updated.status, 0);
    assert_eq!(updated.base_query().unwrap(), "SELECT id, amount FROM payments");
}

#[tokio::test]
async fn test_update_rejects_column_clashing_with_computed_field() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    h.service
        .create_computed_field(CreateFieldRequest {
            dataset_id: dataset.id.clone(),
            name: "total".into(),
            role: "measure".into(),
            expression: Some("[id] + 1".into()),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    h.warehouse.set_columns(vec![
        ColumnMeta::new("id", "INT"),
        ColumnMeta::new("total", "DECIMAL(12,2)"),
    ]);
    let err = h
        .service
        .update(UpdateRequest {
            id: dataset.id.clone(),
            config: Some(json!({"query": "SELECT id, total FROM orders"})),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        DatasetError::Validation(
            "failed to re-extract fields: column 'total' conflicts with a computed field".into()
        )
    );
    let fields = h.service.list_fields("t1", &dataset.id).await.unwrap();
    assert_eq!(fields.len(), 5);
}

#[tokio::test]
async fn test_update_with_same_config_skips_probe() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    let renamed = h
        .service
        .update(UpdateRequest {
            id: dataset.id.clone(),
            name: Some("orders v2".into()),
            config: Some(json!({"query": ORDERS_SQL})),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(renamed.name, "orders v2");
    assert_eq!(h.warehouse.statements().len(), 1);
}

#[tokio::test]
async fn test_update_unsafe_config_rejected() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    let err = h
        .service
        .update(UpdateRequest {
            id: dataset.id.clone(),
            config: Some(json!({"query": "DELETE FROM orders"})),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, DatasetError::Safety(SafetyViolation::DisallowedOperation));

    let stored = h.service.get("t1", &dataset.id).await.unwrap();
    assert_eq!(stored.base_query().unwrap(), ORDERS_SQL);
}

#[tokio::test]
async fn test_query_runs_assembled_statements() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    h.warehouse
        .set_rows(vec![json!({"id": 7, "name": "widget"})], 1);

    let mut req = QueryRequest::new(&dataset.id);
    req.fields = vec!["id".into(), "name".into()];
    req.filters = vec![Filter::new("name", "eq", json!("widget"))];
    req.page_size = 5000;

    let resp = h.service.query("t1", &req).await.unwrap();
    assert_eq!(resp.total, 1);
    assert_eq!(resp.data[0]["name"], json!("widget"));
    assert_eq!((resp.page, resp.page_size), (1, 1000));
    assert!(resp.aggregations.is_none());

    let statements = h.warehouse.statements();
    assert_eq!(
        statements[1],
        format!(
            "SELECT `id`, `name` FROM ({ORDERS_SQL}) AS dataset_query WHERE `name` = ? LIMIT 1000 OFFSET 0"
        )
    );
    assert_eq!(
        statements[2],
        format!("SELECT COUNT(*) AS total FROM ({ORDERS_SQL}) AS dataset_query WHERE `name` = ?")
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_query_times_out() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    *h.warehouse.delay.lock().unwrap() = Some(Duration::from_secs(60));

    let err = h
        .service
        .query("t1", &QueryRequest::new(&dataset.id))
        .await
        .unwrap_err();
    assert_eq!(err, DatasetError::Timeout("query execution"));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_preview() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    h.warehouse.set_rows(vec![json!({"id": 1}), json!({"id": 2})], 2);

    let rows = h.service.preview("t1", &dataset.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        h.warehouse.statements().last().unwrap(),
        &format!("SELECT * FROM ({ORDERS_SQL}) AS dataset_query LIMIT 100")
    );
}

#[tokio::test]
async fn test_non_sql_dataset_has_no_preview_or_fields() {
    let h = Harness::new().await;
    let dataset = h
        .service
        .create(CreateRequest {
            name: "feed".into(),
            dataset_type: "api".into(),
            config: json!({"url": "https://example.invalid/feed"}),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(dataset.fields.is_empty());
    assert_eq!(
        h.service.preview("t1", &dataset.id).await.unwrap_err(),
        DatasetError::Validation("preview not implemented for this dataset type".into())
    );
    assert!(h.warehouse.statements().is_empty());
}

#[tokio::test]
async fn test_list_and_soft_delete() {
    let h = Harness::new().await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let ds = h
            .service
            .create(sql_request("t1", name, "ds-1", ORDERS_SQL))
            .await
            .unwrap();
        ids.push(ds.id);
    }

    let page = h.service.list("t1", 1, 2).await.unwrap();
    assert_eq!((page.items.len(), page.total, page.page_size), (2, 3, 2));

    let defaults = h.service.list("t1", 0, 0).await.unwrap();
    assert_eq!((defaults.page, defaults.page_size), (1, 10));

    h.service.delete("t1", &ids[0]).await.unwrap();
    assert_eq!(
        h.service.get("t1", &ids[0]).await.unwrap_err(),
        DatasetError::NotFound("dataset".into())
    );
    let after = h.service.list("t1", 1, 10).await.unwrap();
    assert_eq!(after.total, 2);
    assert!(after.items.iter().all(|d| d.id != ids[0]));

    assert_eq!(
        h.service.delete("t1", &ids[0]).await.unwrap_err(),
        DatasetError::NotFound("dataset".into())
    );
}
