//! Schema extraction for SQL-backed datasets.
//!
//! The upstream is probed with a zero-row query wrapping the base query; the
//! driver's column metadata is then bucketed into a [`FieldDataType`] and a
//! [`FieldRole`]:
//!
//! | Declared type | Data type | Role |
//! |---|---|---|
//! | `INT` `TINYINT` `SMALLINT` `MEDIUMINT` `BIGINT` `FLOAT` `DOUBLE` `DECIMAL` | number | measure |
//! | `DATE` `DATETIME` `TIMESTAMP` `TIME` `YEAR` | date | dimension |
//! | `BOOLEAN` `TINYINT(1)` | boolean | dimension |
//! | anything else | string | dimension |

use serde::{Deserialize, Serialize};

use crate::model::{DatasetField, FieldDataType, FieldRole};
use crate::sql::strip_terminator;

/// Name and declared type of one upstream result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Database type name as reported by the driver, e.g. `VARCHAR(64)`.
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Zero-row probe revealing the base query's columns.
pub fn probe_query(base_query: &str) -> String {
    format!(
        "SELECT * FROM ({}) AS tmp LIMIT 0",
        strip_terminator(base_query)
    )
}

/// Canonical spelling of a declared type.
///
/// Upper-cased, `UNSIGNED`/`ZEROFILL` dropped and parameters removed, except
/// that `TINYINT(1)` keeps its width because it denotes a boolean.
fn normalize_type(type_name: &str) -> String {
    let upper = type_name.trim().to_ascii_uppercase();
    let base = upper
        .split_whitespace()
        .filter(|word| !matches!(*word, "UNSIGNED" | "SIGNED" | "ZEROFILL"))
        .collect::<Vec<_>>()
        .join(" ");

    if base.replace(' ', "") == "TINYINT(1)" {
        return "TINYINT(1)".to_string();
    }

    match base.find('(') {
        Some(idx) => base[..idx].trim_end().to_string(),
        None => base,
    }
}

fn is_numeric(normalized: &str) -> bool {
    matches!(
        normalized,
        "INT" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "BIGINT" | "FLOAT" | "DOUBLE" | "DECIMAL"
    )
}

/// Coarse data type bucket for a declared type.
pub fn classify_data_type(type_name: &str) -> FieldDataType {
    let normalized = normalize_type(type_name);
    match normalized.as_str() {
        "BOOLEAN" | "TINYINT(1)" => FieldDataType::Boolean,
        "DATE" | "DATETIME" | "TIMESTAMP" | "TIME" | "YEAR" => FieldDataType::Date,
        n if is_numeric(n) => FieldDataType::Number,
        _ => FieldDataType::String,
    }
}

/// Numeric columns are measures; everything else is a dimension.
pub fn classify_role(type_name: &str) -> FieldRole {
    if is_numeric(&normalize_type(type_name)) {
        FieldRole::Measure
    } else {
        FieldRole::Dimension
    }
}

/// Build non-computed fields from probed columns, in upstream column order.
pub fn extract_fields(dataset_id: &str, columns: &[ColumnMeta]) -> Vec<DatasetField> {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            DatasetField::column(
                dataset_id,
                col.name.clone(),
                classify_role(&col.type_name),
                classify_data_type(&col.type_name),
                i as i32,
            )
        })
        .collect()
}
