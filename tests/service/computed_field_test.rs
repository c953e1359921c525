mod support;

use datasetq::error::DatasetError;
use datasetq::model::{Dataset, DatasetField, FieldDataType, FieldRole, QueryRequest};
use datasetq::schema::ColumnMeta;
use datasetq::service::{CreateFieldRequest, UpdateFieldRequest, UpdateRequest};
use serde_json::json;
use support::{field_names, Harness};

fn computed(dataset: &Dataset, name: &str, expression: &str) -> CreateFieldRequest {
    CreateFieldRequest {
        dataset_id: dataset.id.clone(),
        name: name.into(),
        role: "measure".into(),
        data_type: "number".into(),
        expression: Some(expression.into()),
        tenant_id: "t1".into(),
        ..Default::default()
    }
}

fn field_update(field: &DatasetField) -> UpdateFieldRequest {
    UpdateFieldRequest {
        field_id: field.id.clone(),
        tenant_id: "t1".into(),
        ..Default::default()
    }
}

fn grouping(dataset: &Dataset, name: &str) -> CreateFieldRequest {
    CreateFieldRequest {
        dataset_id: dataset.id.clone(),
        name: name.into(),
        role: "dimension".into(),
        data_type: "string".into(),
        is_grouping_field: true,
        grouping_rule: Some(r#"{"groups": [{"label": "A-M", "values": ["a"]}]}"#.into()),
        grouping_enabled: Some(true),
        tenant_id: "t1".into(),
        ..Default::default()
    }
}

fn extracted<'a>(dataset: &'a Dataset, name: &str) -> &'a DatasetField {
    dataset.fields.iter().find(|f| f.name == name).unwrap()
}

#[tokio::test]
async fn test_self_reference_rejected() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    let err = h
        .service
        .create_computed_field(computed(&dataset, "x", "[x] + 1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DatasetError::Validation("expression cannot reference itself".into())
    );
}

#[tokio::test]
async fn test_unknown_reference_rejected() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    let err = h
        .service
        .create_computed_field(computed(&dataset, "margin", "[price] - [cost]"))
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::Validation(ref m) if m.starts_with("invalid expression:")));
}

#[tokio::test]
async fn test_create_field_input_checks() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    let mut req = computed(&dataset, "double_id", "");
    req.expression = None;
    assert_eq!(
        h.service.create_computed_field(req).await.unwrap_err(),
        DatasetError::Validation("expression is required for computed fields".into())
    );

    let blank = computed(&dataset, "blank", "   ");
    assert_eq!(
        h.service.create_computed_field(blank).await.unwrap_err(),
        DatasetError::Validation("expression is required for computed fields".into())
    );

    let mut req = computed(&dataset, "bucket", "");
    req.is_grouping_field = true;
    assert_eq!(
        h.service.create_computed_field(req).await.unwrap_err(),
        DatasetError::Validation("groupingRule is required for grouping fields".into())
    );

    let err = h
        .service
        .create_computed_field(computed(&dataset, "id", "[name]"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DatasetError::Validation("field name 'id' already exists".into())
    );

    let mut req = computed(&dataset, "double_id", "[id] * 2");
    req.role = "metric".into();
    assert!(matches!(
        h.service.create_computed_field(req).await,
        Err(DatasetError::Validation(_))
    ));
}

#[tokio::test]
async fn test_grouping_field_is_not_computed() {
    let h = Harness::new().await;
    let dataset = h.orders().await;

    let mut req = grouping(&dataset, "name_group");
    req.expression = Some("[name]".into());

    let field = h.service.create_computed_field(req).await.unwrap();
    assert!(!field.is_computed);
    assert!(field.is_grouping_field);
    assert_eq!(field.expression, None);
    assert_eq!(field.grouping_enabled, Some(true));

    let schema = h.service.get_schema("t1", &dataset.id).await.unwrap();
    assert!(schema.computed.is_empty());
    assert!(schema.dimensions.iter().any(|f| f.name == "name_group"));

    h.service.delete_field("t1", &field.id).await.unwrap();
    let fields = h.service.list_fields("t1", &dataset.id).await.unwrap();
    assert!(fields.iter().all(|f| f.name != "name_group"));

    h.service
        .create_computed_field(grouping(&dataset, "name_group"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reextraction_keeps_grouping_fields() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    h.service
        .create_computed_field(grouping(&dataset, "name_group"))
        .await
        .unwrap();

    h.warehouse.set_columns(vec![
        ColumnMeta::new("id", "INT"),
        ColumnMeta::new("name", "VARCHAR(64)"),
    ]);
    let updated = h
        .service
        .update(UpdateRequest {
            id: dataset.id.clone(),
            config: Some(json!({"query": "SELECT id, name FROM orders"})),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(field_names(&updated), vec!["id", "name", "name_group"]);
    let kept = extracted(&updated, "name_group");
    assert!(kept.is_grouping_field);
    assert_eq!(kept.grouping_enabled, Some(true));
}

#[tokio::test]
async fn test_computed_field_in_query_projection() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let field = h
        .service
        .create_computed_field(computed(&dataset, "double_id", "[id] * 2"))
        .await
        .unwrap();
    assert!(field.is_computed);

    let schema = h.service.get_schema("t1", &dataset.id).await.unwrap();
    assert_eq!(schema.computed.len(), 1);
    assert_eq!(schema.computed[0].name, "double_id");

    let mut req = QueryRequest::new(&dataset.id);
    req.fields = vec!["name".into(), "double_id".into()];
    h.service.query("t1", &req).await.unwrap();

    let statements = h.warehouse.statements();
    let data_sql = &statements[1];
    assert!(
        data_sql.starts_with("SELECT `name`, (id * 2) AS `double_id` FROM ("),
        "{data_sql}"
    );
    assert_eq!(
        h.service.computed_cache().get_sql(&field.id).as_deref(),
        Some("(id * 2)")
    );
}

#[tokio::test]
async fn test_expression_update_invalidates_dependants() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let base = h
        .service
        .create_computed_field(computed(&dataset, "base", "[id] + 1"))
        .await
        .unwrap();
    let scaled = h
        .service
        .create_computed_field(computed(&dataset, "scaled", "[base] * 10"))
        .await
        .unwrap();

    let mut req = QueryRequest::new(&dataset.id);
    req.fields = vec!["scaled".into()];
    h.service.query("t1", &req).await.unwrap();
    assert_eq!(
        h.service.computed_cache().get_sql(&scaled.id).as_deref(),
        Some("((id + 1) * 10)")
    );

    let mut update = field_update(&base);
    update.expression = Some("[id] + 2".into());
    let updated = h.service.update_field(update).await.unwrap();
    assert_eq!(updated.expression.as_deref(), Some("[id] + 2"));
    assert_eq!(h.service.computed_cache().get_sql(&scaled.id), None);

    h.service.query("t1", &req).await.unwrap();
    let last_data_sql = h
        .warehouse
        .statements()
        .into_iter()
        .rev()
        .find(|s| s.starts_with("SELECT ((id"))
        .unwrap();
    assert!(last_data_sql.starts_with("SELECT ((id + 2) * 10) AS `scaled`"));
}

#[tokio::test]
async fn test_update_introducing_cycle_rejected() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let a = h
        .service
        .create_computed_field(computed(&dataset, "a", "[id] + 1"))
        .await
        .unwrap();
    h.service
        .create_computed_field(computed(&dataset, "b", "[a] * 2"))
        .await
        .unwrap();

    let mut update = field_update(&a);
    update.expression = Some("[b] - 1".into());
    let err = h.service.update_field(update).await.unwrap_err();
    assert_eq!(err, DatasetError::Cycle("a".into()));
    assert_eq!(err.to_string(), "circular dependency detected for field: a");

    let fields = h.service.list_fields("t1", &dataset.id).await.unwrap();
    let stored = fields.iter().find(|f| f.id == a.id).unwrap();
    assert_eq!(stored.expression.as_deref(), Some("[id] + 1"));
}

#[tokio::test]
async fn test_create_closing_a_cycle_rejected() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    h.service
        .create_computed_field(computed(&dataset, "label", "CONCAT([name], '!')"))
        .await
        .unwrap();

    // Re-extraction drops `name`, leaving `label` pointing at a free name.
    h.warehouse.set_columns(vec![ColumnMeta::new("id", "INT")]);
    h.service
        .update(UpdateRequest {
            id: dataset.id.clone(),
            config: Some(json!({"query": "SELECT id FROM orders"})),
            tenant_id: "t1".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = h
        .service
        .create_computed_field(computed(&dataset, "name", "[label]"))
        .await
        .unwrap_err();
    assert_eq!(err, DatasetError::Cycle("name".into()));

    let fields = h.service.list_fields("t1", &dataset.id).await.unwrap();
    assert!(fields.iter().all(|f| f.name != "name"));
}

#[tokio::test]
async fn test_referenced_field_cannot_be_deleted() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let a = h
        .service
        .create_computed_field(computed(&dataset, "a", "[id] + 1"))
        .await
        .unwrap();
    let b = h
        .service
        .create_computed_field(computed(&dataset, "b", "[a] * 2"))
        .await
        .unwrap();

    assert_eq!(
        h.service.delete_field("t1", &a.id).await.unwrap_err(),
        DatasetError::Validation("field 'a' is referenced by 'b'".into())
    );

    // With `a` still present, `[b] + 1` cannot be stored under that name.
    assert!(h
        .service
        .create_computed_field(computed(&dataset, "a", "[b] + 1"))
        .await
        .is_err());

    h.service.delete_field("t1", &b.id).await.unwrap();
    h.service.delete_field("t1", &a.id).await.unwrap();
    assert_eq!(h.service.list_fields("t1", &dataset.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_update_field_rules() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let id = extracted(&dataset, "id");

    let mut update = field_update(id);
    update.is_computed = Some(true);
    assert_eq!(
        h.service.update_field(update).await.unwrap_err(),
        DatasetError::Validation("isComputed cannot be changed".into())
    );

    let mut update = field_update(id);
    update.expression = Some("[name]".into());
    assert_eq!(
        h.service.update_field(update).await.unwrap_err(),
        DatasetError::Validation("expression can only be set on computed fields".into())
    );

    let mut update = field_update(id);
    update.display_name = Some("Order ID".into());
    update.role = Some("dimension".into());
    update.is_sortable = Some(false);
    let updated = h.service.update_field(update).await.unwrap();
    assert_eq!(updated.display_name.as_deref(), Some("Order ID"));
    assert_eq!(updated.role, FieldRole::Dimension);
    assert!(!updated.is_sortable);

    let mut update = field_update(id);
    update.tenant_id = "t2".into();
    assert_eq!(
        h.service.update_field(update).await.unwrap_err(),
        DatasetError::NotFound("field".into())
    );
}

#[tokio::test]
async fn test_delete_field_rules() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let name = extracted(&dataset, "name");

    // Ownership is checked before the field kind.
    assert_eq!(
        h.service.delete_field("t2", &name.id).await.unwrap_err(),
        DatasetError::NotFound("field".into())
    );
    assert_eq!(
        h.service.delete_field("t1", &name.id).await.unwrap_err(),
        DatasetError::Validation("cannot delete non-computed fields".into())
    );

    let field = h
        .service
        .create_computed_field(computed(&dataset, "double_id", "[id] * 2"))
        .await
        .unwrap();
    h.service.delete_field("t1", &field.id).await.unwrap();

    let fields = h.service.list_fields("t1", &dataset.id).await.unwrap();
    assert_eq!(fields.len(), 4);
    assert_eq!(
        h.service.delete_field("t1", &field.id).await.unwrap_err(),
        DatasetError::NotFound("field".into())
    );
}

#[tokio::test]
async fn test_list_dimensions_and_measures() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let mut label = computed(&dataset, "label", "CONCAT([name], '-', [id])");
    label.role = "dimension".into();
    label.data_type = "string".into();
    h.service.create_computed_field(label).await.unwrap();

    let dimensions = h.service.list_dimensions("t1", &dataset.id).await.unwrap();
    let mut names: Vec<&str> = dimensions.iter().map(|f| f.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["created", "flag", "label", "name"]);

    let measures = h.service.list_measures("t1", &dataset.id).await.unwrap();
    assert_eq!(measures.len(), 1);
    assert_eq!(measures[0].data_type, FieldDataType::Number);

    assert_eq!(
        h.service.list_measures("t2", &dataset.id).await.unwrap_err(),
        DatasetError::NotFound("dataset".into())
    );
}

#[tokio::test]
async fn test_dependencies_listed_first() {
    let h = Harness::new().await;
    let dataset = h.orders().await;
    let base = h
        .service
        .create_computed_field(computed(&dataset, "base", "[id] + 1"))
        .await
        .unwrap();
    let scaled = h
        .service
        .create_computed_field(computed(&dataset, "scaled", "[base] * [base]"))
        .await
        .unwrap();

    let ordered = h
        .service
        .resolve_computed_field_dependencies("t1", &dataset.id, &scaled.id)
        .await
        .unwrap();
    let ids: Vec<&str> = ordered.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec![base.id.as_str(), scaled.id.as_str()]);
}
