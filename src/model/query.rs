//! In-flight query request and response shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row. Column order is the order returned by the upstream.
pub type Row = serde_json::Map<String, Value>;

/// Comparison operator of a filter.
///
/// Parsing is total: unrecognised operators compare with `=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl FilterOperator {
    pub fn parse(op: &str) -> Self {
        match op {
            "eq" => FilterOperator::Eq,
            "neq" => FilterOperator::Neq,
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "like" => FilterOperator::Like,
            "in" => FilterOperator::In,
            _ => FilterOperator::Eq,
        }
    }

    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Neq => "<>",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::In => "IN",
        }
    }
}

/// Translate a request operator to SQL. Defined for every input.
pub fn translate_operator(op: &str) -> &'static str {
    FilterOperator::parse(op).as_sql()
}

/// A request-time predicate `{field, operator, value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
        }
    }
}

/// An aggregate projection `FUNCTION(field) AS alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: String,
    pub field: String,
}

/// Sort direction requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    /// Anything other than exactly `asc` / `desc` normalises to ascending.
    pub fn parse(s: &str) -> Self {
        match s {
            "desc" => SortDir::Desc,
            _ => SortDir::Asc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// A parameterised query against a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    pub dataset_id: String,
    pub fields: Vec<String>,
    pub filters: Vec<Filter>,
    pub sort_by: String,
    pub sort_order: String,
    pub group_by: Vec<String>,
    pub page: i64,
    pub page_size: i64,
    pub aggregations: BTreeMap<String, Aggregation>,
}

impl QueryRequest {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            ..Default::default()
        }
    }
}

/// Result of a dataset query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub data: Vec<Row>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Row>,
}
