//! Dataset field catalogue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult};

/// Analytical role of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    /// Grouping key (text, date, boolean columns).
    Dimension,
    /// Numeric aggregable.
    Measure,
}

impl FieldRole {
    pub fn parse(s: &str) -> DatasetResult<Self> {
        match s {
            "dimension" => Ok(FieldRole::Dimension),
            "measure" => Ok(FieldRole::Measure),
            _ => Err(DatasetError::validation(
                "type must be 'dimension' or 'measure'",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldRole::Dimension => "dimension",
            FieldRole::Measure => "measure",
        }
    }
}

/// Coarse data type bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldDataType {
    #[default]
    String,
    Number,
    Date,
    Boolean,
}

impl FieldDataType {
    pub fn parse(s: &str) -> DatasetResult<Self> {
        match s {
            "string" => Ok(FieldDataType::String),
            "number" => Ok(FieldDataType::Number),
            "date" => Ok(FieldDataType::Date),
            "boolean" => Ok(FieldDataType::Boolean),
            other => Err(DatasetError::validation(format!(
                "unknown field data type: {other}"
            ))),
        }
    }
}

/// Default sort direction advertised for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultSortOrder {
    Asc,
    Desc,
    #[default]
    None,
}

/// One entry of a dataset's field catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetField {
    pub id: String,
    #[serde(default)]
    pub dataset_id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub role: FieldRole,
    #[serde(default)]
    pub data_type: FieldDataType,
    #[serde(default)]
    pub is_computed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default = "default_true")]
    pub is_sortable: bool,
    #[serde(default = "default_true")]
    pub is_groupable: bool,
    #[serde(default)]
    pub default_sort_order: DefaultSortOrder,
    #[serde(default)]
    pub is_grouping_field: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_enabled: Option<bool>,
    #[serde(default)]
    pub sort_index: i32,
    #[serde(default = "default_config")]
    pub config: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_config() -> String {
    "{}".to_string()
}

impl DatasetField {
    /// A non-computed field as produced by schema extraction.
    pub fn column(
        dataset_id: impl Into<String>,
        name: impl Into<String>,
        role: FieldRole,
        data_type: FieldDataType,
        sort_index: i32,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: format!("field-{}", uuid::Uuid::new_v4()),
            dataset_id: dataset_id.into(),
            display_name: Some(name.clone()),
            name,
            role,
            data_type,
            is_computed: false,
            expression: None,
            is_sortable: true,
            is_groupable: true,
            default_sort_order: DefaultSortOrder::None,
            is_grouping_field: false,
            grouping_rule: None,
            grouping_enabled: None,
            sort_index,
            config: default_config(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A computed field defined by a bracketed-reference expression.
    pub fn computed(
        dataset_id: impl Into<String>,
        name: impl Into<String>,
        role: FieldRole,
        data_type: FieldDataType,
        expression: impl Into<String>,
    ) -> Self {
        let mut field = Self::column(dataset_id, name, role, data_type, 0);
        field.display_name = None;
        field.is_computed = true;
        field.expression = Some(expression.into());
        field.is_groupable = role == FieldRole::Dimension;
        field
    }

    /// The expression, if the field is computed and has a non-empty one.
    pub fn computed_expression(&self) -> Option<&str> {
        if !self.is_computed {
            return None;
        }
        self.expression.as_deref().filter(|e| !e.is_empty())
    }

    /// Derived from the base query's columns rather than authored by a user.
    /// Only these are replaced on re-extraction.
    pub fn is_extracted(&self) -> bool {
        !self.is_computed && !self.is_grouping_field
    }
}
