//! Dataset records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::field::DatasetField;
use crate::error::{DatasetError, DatasetResult};

/// Kind of backing store a dataset reads from.
///
/// Only [`DatasetType::Sql`] datasets can be previewed, queried or
/// schema-extracted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Sql,
    Api,
    File,
}

impl DatasetType {
    /// Parse a dataset type from its wire name.
    pub fn parse(s: &str) -> DatasetResult<Self> {
        match s {
            "sql" => Ok(DatasetType::Sql),
            "api" => Ok(DatasetType::Api),
            "file" => Ok(DatasetType::File),
            "" => Err(DatasetError::validation("type is required")),
            other => Err(DatasetError::validation(format!(
                "unsupported dataset type: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Sql => "sql",
            DatasetType::Api => "api",
            DatasetType::File => "file",
        }
    }
}

/// Canonical shape of a SQL dataset's `config` blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub query: String,
}

impl DatasetConfig {
    /// Parse a raw config blob.
    pub fn parse(raw: &str) -> DatasetResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A named, tenant-owned, saved SELECT over an upstream database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub datasource_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub dataset_type: DatasetType,
    /// Raw JSON config, `{"query": "..."}` for SQL datasets.
    pub config: String,
    #[serde(default = "default_status")]
    pub status: i32,
    #[serde(default)]
    pub created_by: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<DatasetField>,
}

fn default_status() -> i32 {
    1
}

impl Dataset {
    /// Build a fresh dataset record.
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        dataset_type: DatasetType,
        datasource_id: Option<String>,
        config: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("dataset-{}", uuid::Uuid::new_v4()),
            tenant_id: tenant_id.into(),
            datasource_id,
            name: name.into(),
            dataset_type,
            config: config.into(),
            status: default_status(),
            created_by: String::new(),
            created_at: now,
            updated_at: now,
            deleted: false,
            fields: Vec::new(),
        }
    }

    /// Whether the dataset is SQL-backed and bound to a datasource.
    pub fn is_sql_backed(&self) -> bool {
        self.dataset_type == DatasetType::Sql && self.datasource_id.is_some()
    }

    /// The base query from the config blob.
    ///
    /// Fails when the config does not parse or the query is blank.
    pub fn base_query(&self) -> DatasetResult<String> {
        let config = DatasetConfig::parse(&self.config)?;
        if config.query.trim().is_empty() {
            return Err(DatasetError::validation("query is required"));
        }
        Ok(config.query)
    }

    /// Names of every field currently attached to the dataset.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Find an attached field by name.
    pub fn field(&self, name: &str) -> Option<&DatasetField> {
        self.fields.iter().find(|f| f.name == name)
    }
}
