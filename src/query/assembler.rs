//! SQL assembly for dataset queries.
//!
//! The base query is always embedded as a derived table:
//!
//! ```text
//! SELECT <projection> FROM (<base>) AS dataset_query [WHERE] [GROUP BY] [ORDER BY] LIMIT n OFFSET m
//! SELECT COUNT(*) AS total FROM (<base>) AS dataset_query [WHERE]
//! ```
//!
//! Every identifier goes through the dialect's quoting and every filter
//! value is bound as a parameter. Computed fields are expanded into SQL
//! fragments and memoised in the [`ComputedFieldCache`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::ComputedFieldCache;
use crate::error::{DatasetError, DatasetResult};
use crate::expr::{field_references, substitute_field_references, ExpressionBuilder, SqlExpressionBuilder};
use crate::model::{Aggregation, Dataset, DatasetField, Filter, FilterOperator, QueryRequest, SortDir};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::strip_terminator;

/// How long a translated computed-field fragment stays cached.
pub const COMPUTED_SQL_TTL: Duration = Duration::from_secs(3600);

/// Page size used when the request names none.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Hard cap on the page size.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Rows returned by a preview.
pub const PREVIEW_LIMIT: u64 = 100;

/// Alias of the derived table wrapping the base query.
const DERIVED_TABLE: &str = "dataset_query";

const AGGREGATE_FUNCTIONS: &[&str] = &["SUM", "AVG", "COUNT", "MAX", "MIN"];

/// Clamp a requested page and page size to the accepted range.
///
/// `page <= 0` becomes 1, `page_size <= 0` becomes [`DEFAULT_PAGE_SIZE`] and
/// anything above [`MAX_PAGE_SIZE`] is capped. Idempotent.
pub fn normalize_pagination(page: i64, page_size: i64) -> (i64, i64) {
    let page = if page <= 0 { 1 } else { page };
    let page_size = if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(MAX_PAGE_SIZE)
    };
    (page, page_size)
}

/// Pagination clause plus the effective page and page size.
pub fn build_limit(dialect: Dialect, page: i64, page_size: i64) -> (String, i64, i64) {
    let (page, page_size) = normalize_pagination(page, page_size);
    let offset = (page - 1).saturating_mul(page_size);
    let clause = dialect.emit_limit_offset(page_size as u64, offset as u64);
    (clause, page, page_size)
}

/// Output of [`QueryAssembler::assemble`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledQuery {
    pub data_sql: String,
    pub count_sql: String,
    /// WHERE parameters in emission order. Shared by both statements.
    pub params: Vec<Value>,
    pub page: i64,
    pub page_size: i64,
    /// Aggregate aliases in projection order.
    pub aggregation_aliases: Vec<String>,
}

/// Builds data and count statements from a dataset and a request.
pub struct QueryAssembler {
    dialect: Dialect,
    builder: Arc<dyn ExpressionBuilder>,
    cache: Arc<ComputedFieldCache>,
}

impl std::fmt::Debug for QueryAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryAssembler")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl QueryAssembler {
    /// MySQL assembler with the default expression builder.
    pub fn new(cache: Arc<ComputedFieldCache>) -> Self {
        let dialect = Dialect::MySql;
        Self::with_builder(dialect, Arc::new(SqlExpressionBuilder::new(dialect)), cache)
    }

    pub fn with_builder(
        dialect: Dialect,
        builder: Arc<dyn ExpressionBuilder>,
        cache: Arc<ComputedFieldCache>,
    ) -> Self {
        Self {
            dialect,
            builder,
            cache,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn cache(&self) -> &Arc<ComputedFieldCache> {
        &self.cache
    }

    /// Emit the data and count statements for `request` against `dataset`.
    ///
    /// `dataset.fields` must be loaded. Computed expressions are trusted to
    /// have been validated when they were written.
    pub fn assemble(&self, dataset: &Dataset, request: &QueryRequest) -> DatasetResult<AssembledQuery> {
        let base = dataset.base_query()?;
        let base = strip_terminator(&base);

        let selected = if request.fields.is_empty() && !request.group_by.is_empty() {
            &request.group_by
        } else {
            &request.fields
        };

        let mut projection = self.build_projection(dataset, selected);
        let (aggregates, aggregation_aliases) = self.build_aggregations(&request.aggregations)?;
        if !aggregates.is_empty() {
            projection = if request.group_by.is_empty() {
                aggregates
            } else {
                format!("{projection}, {aggregates}")
            };
        }

        let (where_clause, params) = self.build_where(&request.filters)?;
        let group_by = self.build_group_by(&request.group_by);
        let order_by = self.build_order_by(&request.sort_by, &request.sort_order);
        let (limit, page, page_size) = build_limit(self.dialect, request.page, request.page_size);

        let from = format!("FROM ({base}) AS {DERIVED_TABLE}");
        let data_sql = join_clauses(&[
            &format!("SELECT {projection}"),
            &from,
            &where_clause,
            &group_by,
            &order_by,
            &limit,
        ]);
        let count_sql = join_clauses(&["SELECT COUNT(*) AS total", &from, &where_clause]);

        debug!(
            dataset_id = %dataset.id,
            params = params.len(),
            page,
            page_size,
            "assembled dataset query"
        );

        Ok(AssembledQuery {
            data_sql,
            count_sql,
            params,
            page,
            page_size,
            aggregation_aliases,
        })
    }

    /// First [`PREVIEW_LIMIT`] rows of the base query.
    pub fn preview_sql(&self, dataset: &Dataset) -> DatasetResult<String> {
        let base = dataset.base_query()?;
        Ok(format!(
            "SELECT * FROM ({}) AS {DERIVED_TABLE} LIMIT {PREVIEW_LIMIT}",
            strip_terminator(&base)
        ))
    }

    /// Projection list for the requested field names; `*` when empty.
    pub fn build_projection(&self, dataset: &Dataset, names: &[String]) -> String {
        if names.is_empty() {
            return "*".to_string();
        }

        names
            .iter()
            .map(|name| {
                let quoted = self.dialect.quote_identifier(name);
                match dataset.field(name) {
                    Some(field) if field.computed_expression().is_some() => {
                        match self.computed_sql(dataset, field) {
                            Some(sql) => format!("{sql} AS {quoted}"),
                            None => format!("NULL AS {quoted}"),
                        }
                    }
                    _ => quoted,
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Fully expanded SQL fragment for a computed field.
    ///
    /// `None` when the expression does not build or the field takes part in
    /// a reference cycle.
    pub fn computed_sql(&self, dataset: &Dataset, field: &DatasetField) -> Option<String> {
        let names = dataset.field_names();
        let mut stack = Vec::new();
        self.expand(dataset, field, &names, &mut stack)
    }

    fn expand(
        &self,
        dataset: &Dataset,
        field: &DatasetField,
        names: &[String],
        stack: &mut Vec<String>,
    ) -> Option<String> {
        if let Some(sql) = self.cache.get_sql(&field.id) {
            return Some(sql);
        }
        if stack.iter().any(|n| n == &field.name) {
            debug!(field = %field.name, "computed field reference cycle");
            return None;
        }
        let expression = field.computed_expression()?;
        let built = self.builder.build(expression, names).ok()?;

        stack.push(field.name.clone());
        let mut mapping = HashMap::new();
        for reference in field_references(expression) {
            let target = dataset.field(&reference)?;
            let replacement = if target.computed_expression().is_some() {
                self.expand(dataset, target, names, stack)?
            } else {
                reference.clone()
            };
            mapping.insert(reference, replacement);
        }
        stack.pop();

        let sql = substitute_field_references(&built, &mapping);
        self.cache.set_sql(&field.id, &sql, COMPUTED_SQL_TTL);
        Some(sql)
    }

    /// `FUNC(field) AS alias` list plus the aliases, in alias order.
    pub fn build_aggregations(
        &self,
        aggregations: &BTreeMap<String, Aggregation>,
    ) -> DatasetResult<(String, Vec<String>)> {
        let mut selects = Vec::with_capacity(aggregations.len());
        let mut aliases = Vec::with_capacity(aggregations.len());

        for (alias, agg) in aggregations {
            let function = agg.function.trim().to_ascii_uppercase();
            if !AGGREGATE_FUNCTIONS.contains(&function.as_str()) {
                return Err(DatasetError::validation(format!(
                    "unsupported aggregation function: {}",
                    agg.function
                )));
            }

            let argument = match agg.field.trim() {
                "*" if function == "COUNT" => "*".to_string(),
                "*" => {
                    return Err(DatasetError::validation(format!(
                        "aggregation {function} requires a field"
                    )))
                }
                "" => return Err(DatasetError::validation("aggregation field is required")),
                field => self.dialect.quote_identifier(field),
            };

            selects.push(format!(
                "{function}({argument}) AS {}",
                self.dialect.quote_identifier(alias)
            ));
            aliases.push(alias.clone());
        }

        Ok((selects.join(", "), aliases))
    }

    /// WHERE clause and its parameters. Empty when there are no filters.
    pub fn build_where(&self, filters: &[Filter]) -> DatasetResult<(String, Vec<Value>)> {
        if filters.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let placeholder = self.dialect.placeholder();
        let mut conditions = Vec::with_capacity(filters.len());
        let mut params = Vec::new();

        for filter in filters {
            let column = self.dialect.quote_identifier(&filter.field);
            match FilterOperator::parse(&filter.operator) {
                FilterOperator::In => {
                    let values = match &filter.value {
                        Value::Array(values) if !values.is_empty() => values,
                        _ => return Err(DatasetError::FilterShape(filter.field.clone())),
                    };
                    let placeholders = vec![placeholder; values.len()].join(", ");
                    conditions.push(format!("{column} IN ({placeholders})"));
                    params.extend(values.iter().cloned());
                }
                op => {
                    conditions.push(format!("{column} {} {placeholder}", op.as_sql()));
                    params.push(filter.value.clone());
                }
            }
        }

        Ok((format!("WHERE {}", conditions.join(" AND ")), params))
    }

    pub fn build_group_by(&self, group_by: &[String]) -> String {
        if group_by.is_empty() {
            return String::new();
        }
        let columns: Vec<String> = group_by
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        format!("GROUP BY {}", columns.join(", "))
    }

    pub fn build_order_by(&self, sort_by: &str, sort_order: &str) -> String {
        if sort_by.is_empty() {
            return String::new();
        }
        format!(
            "ORDER BY {} {}",
            self.dialect.quote_identifier(sort_by),
            SortDir::parse(sort_order).as_sql()
        )
    }
}

fn join_clauses(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
