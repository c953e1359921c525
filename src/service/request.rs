//! Request and response shapes of the dataset facade.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{DatasetField, DefaultSortOrder};

/// Create a dataset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub dataset_type: String,
    #[serde(default)]
    pub datasource_id: Option<String>,
    /// Raw config object, `{"query": "..."}` for SQL datasets.
    #[serde(default)]
    pub config: Value,
    #[serde(skip)]
    pub tenant_id: String,
    #[serde(skip)]
    pub created_by: String,
}

/// Patch a dataset. Absent members are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(skip)]
    pub tenant_id: String,
}

/// Create a computed or grouping field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFieldRequest {
    pub dataset_id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// `dimension` or `measure`.
    #[serde(rename = "type")]
    pub role: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub is_grouping_field: bool,
    #[serde(default)]
    pub grouping_rule: Option<String>,
    #[serde(default)]
    pub grouping_enabled: Option<bool>,
    #[serde(skip)]
    pub tenant_id: String,
}

/// Patch a field. Absent members are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFieldRequest {
    pub field_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub role: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub is_computed: Option<bool>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub is_sortable: Option<bool>,
    #[serde(default)]
    pub is_groupable: Option<bool>,
    #[serde(default)]
    pub sort_order: Option<DefaultSortOrder>,
    #[serde(default)]
    pub is_grouping_field: Option<bool>,
    #[serde(default)]
    pub grouping_rule: Option<String>,
    #[serde(default)]
    pub grouping_enabled: Option<bool>,
    #[serde(skip)]
    pub tenant_id: String,
}

/// Fields of a dataset split by role. Computed fields go to `computed`
/// whatever their role.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaResponse {
    pub dimensions: Vec<DatasetField>,
    pub measures: Vec<DatasetField>,
    pub computed: Vec<DatasetField>,
}

impl SchemaResponse {
    pub fn from_fields(fields: Vec<DatasetField>) -> Self {
        let mut schema = Self::default();
        for field in fields {
            if field.is_computed {
                schema.computed.push(field);
            } else if field.role == crate::model::FieldRole::Dimension {
                schema.dimensions.push(field);
            } else {
                schema.measures.push(field);
            }
        }
        schema
    }
}

/// One page of a tenant's datasets.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetPage {
    pub items: Vec<crate::model::Dataset>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}
