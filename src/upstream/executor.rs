//! Deadline-bounded dispatch of assembled statements.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, instrument, warn};

use super::{Upstream, UpstreamConnector, UpstreamError, UpstreamResult};
use crate::config::{ConnectionSettings, Settings};
use crate::error::{DatasetError, DatasetResult};
use crate::model::{DataSource, QueryResponse, Row};
use crate::query::AssembledQuery;
use crate::schema::ColumnMeta;

/// Deadline for a data query together with its count query.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for a dataset preview.
pub const PREVIEW_TIMEOUT: Duration = Duration::from_secs(8);

/// Runs statements against a datasource's upstream database.
pub struct QueryExecutor {
    connector: Arc<dyn UpstreamConnector>,
    localhost_alias: Option<String>,
}

impl QueryExecutor {
    pub fn new(connector: Arc<dyn UpstreamConnector>) -> Self {
        Self {
            connector,
            localhost_alias: None,
        }
    }

    /// Executor honouring the `[datasource]` settings.
    pub fn from_settings(connector: Arc<dyn UpstreamConnector>, settings: &Settings) -> Self {
        Self::new(connector).with_localhost_alias(settings.localhost_alias().map(str::to_string))
    }

    /// Rewrite loopback datasource hosts to `alias`.
    pub fn with_localhost_alias(mut self, alias: Option<String>) -> Self {
        self.localhost_alias = alias.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn connection_settings(&self, ds: &DataSource) -> ConnectionSettings {
        ConnectionSettings::for_datasource(ds, self.localhost_alias.as_deref(), None)
    }

    async fn open(&self, ds: &DataSource) -> DatasetResult<Box<dyn Upstream>> {
        let settings = self.connection_settings(ds);
        match timeout(settings.dial_timeout, self.connector.connect(&settings)).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(DatasetError::Timeout("database connection")),
        }
    }

    /// Run the data and count statements of `query` under one deadline.
    #[instrument(skip_all, fields(datasource = %ds.id), err)]
    pub async fn execute(
        &self,
        ds: &DataSource,
        query: &AssembledQuery,
    ) -> DatasetResult<QueryResponse> {
        let started = Instant::now();
        let mut conn = self.open(ds).await?;

        let outcome = timeout(QUERY_TIMEOUT, async {
            let data = conn.fetch_rows(&query.data_sql, &query.params).await?;
            let total = conn.fetch_count(&query.count_sql, &query.params).await?;
            Ok::<_, UpstreamError>((data, total))
        })
        .await;
        let (data, total) = settle(conn.as_mut(), outcome, "query execution")?;

        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(
            rows = data.len(),
            total,
            elapsed_ms = execution_time_ms,
            "query executed"
        );

        let aggregations = aggregate_values(&data, &query.aggregation_aliases);
        Ok(QueryResponse {
            data,
            total,
            page: query.page,
            page_size: query.page_size,
            execution_time_ms,
            aggregations,
        })
    }

    /// Run a preview statement under the preview deadline.
    #[instrument(skip_all, fields(datasource = %ds.id), err)]
    pub async fn preview(&self, ds: &DataSource, sql: &str) -> DatasetResult<Vec<Row>> {
        let mut conn = self.open(ds).await?;
        let outcome = timeout(PREVIEW_TIMEOUT, conn.fetch_rows(sql, &[])).await;
        settle(conn.as_mut(), outcome, "preview")
    }

    /// Report the result columns of `sql`.
    #[instrument(skip_all, fields(datasource = %ds.id), err)]
    pub async fn describe(&self, ds: &DataSource, sql: &str) -> DatasetResult<Vec<ColumnMeta>> {
        let mut conn = self.open(ds).await?;
        let outcome = timeout(QUERY_TIMEOUT, conn.describe(sql)).await;
        settle(conn.as_mut(), outcome, "schema extraction")
    }

    /// Run an arbitrary read statement, used for introspection.
    #[instrument(skip_all, fields(datasource = %ds.id), err)]
    pub async fn fetch(
        &self,
        ds: &DataSource,
        sql: &str,
        params: &[Value],
    ) -> DatasetResult<Vec<Row>> {
        let mut conn = self.open(ds).await?;
        let outcome = timeout(QUERY_TIMEOUT, conn.fetch_rows(sql, params)).await;
        settle(conn.as_mut(), outcome, "query execution")
    }
}

fn settle<T>(
    conn: &mut dyn Upstream,
    outcome: Result<UpstreamResult<T>, Elapsed>,
    operation: &'static str,
) -> DatasetResult<T> {
    match outcome {
        Ok(result) => Ok(result?),
        Err(_) => {
            conn.abandon();
            warn!(operation, "upstream deadline exceeded, closing connection");
            Err(DatasetError::Timeout(operation))
        }
    }
}

/// Aggregate columns read from the first row.
fn aggregate_values(data: &[Row], aliases: &[String]) -> Option<Row> {
    if aliases.is_empty() {
        return None;
    }
    let first = data.first();
    Some(
        aliases
            .iter()
            .map(|alias| {
                let value = first
                    .and_then(|row| row.get(alias))
                    .cloned()
                    .unwrap_or(Value::Null);
                (alias.clone(), value)
            })
            .collect(),
    )
}
