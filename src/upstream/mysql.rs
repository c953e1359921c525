//! MySQL driver glue over `sqlx`.
//!
//! One lazily created pool per upstream target. Rows are decoded into JSON
//! values by declared column type; binary and text columns become strings,
//! `DECIMAL` is kept exact as a string.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Column, Executor, Row as _, Statement, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{Upstream, UpstreamConnector, UpstreamError, UpstreamResult};
use crate::config::ConnectionSettings;
use crate::model::Row;
use crate::schema::ColumnMeta;

/// Connector that keeps one pool per `(user, host, port, database)`.
#[derive(Debug, Default)]
pub struct MySqlConnector {
    pools: Mutex<HashMap<String, MySqlPool>>,
}

impl MySqlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_key(settings: &ConnectionSettings) -> String {
        format!(
            "{}@{}:{}/{}",
            settings.username, settings.host, settings.port, settings.database
        )
    }

    /// Driver options for one target.
    pub fn connect_options(settings: &ConnectionSettings) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.username)
            .password(&settings.password)
            .charset("utf8mb4")
    }

    /// Pool bounds for one target.
    ///
    /// sqlx has no idle-count ceiling, so `max_idle` is not applied here.
    pub fn pool_options(settings: &ConnectionSettings) -> MySqlPoolOptions {
        MySqlPoolOptions::new()
            .max_connections(settings.pool.max_open)
            .min_connections(0)
            .acquire_timeout(settings.dial_timeout)
            .max_lifetime(settings.pool.max_lifetime)
    }

    async fn pool(&self, settings: &ConnectionSettings) -> MySqlPool {
        let key = Self::pool_key(settings);
        let mut pools = self.pools.lock().await;
        pools
            .entry(key)
            .or_insert_with(|| {
                debug!(host = %settings.host, database = %settings.database, "creating upstream pool");
                Self::pool_options(settings).connect_lazy_with(Self::connect_options(settings))
            })
            .clone()
    }

    /// Close every pool.
    pub async fn close(&self) {
        let pools: Vec<MySqlPool> = self.pools.lock().await.drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await;
        }
    }
}

#[async_trait]
impl UpstreamConnector for MySqlConnector {
    #[instrument(skip_all, fields(host = %settings.host, database = %settings.database), err)]
    async fn connect(&self, settings: &ConnectionSettings) -> UpstreamResult<Box<dyn Upstream>> {
        let pool = self.pool(settings).await;
        let conn = pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => UpstreamError::DialTimeout,
            other => UpstreamError::ConnectionFailed(other.to_string()),
        })?;
        Ok(Box::new(MySqlUpstream { conn }))
    }
}

/// A pooled MySQL connection.
struct MySqlUpstream {
    conn: PoolConnection<MySql>,
}

#[async_trait]
impl Upstream for MySqlUpstream {
    async fn describe(&mut self, sql: &str) -> UpstreamResult<Vec<ColumnMeta>> {
        let statement = (&mut *self.conn)
            .prepare(sql)
            .await
            .map_err(UpstreamError::query)?;

        Ok(statement
            .columns()
            .iter()
            .map(|col| ColumnMeta::new(col.name(), col.type_info().name()))
            .collect())
    }

    async fn fetch_rows(&mut self, sql: &str, params: &[Value]) -> UpstreamResult<Vec<Row>> {
        let query = params.iter().fold(sqlx::query(sql), bind_value);
        let rows = query
            .fetch_all(&mut *self.conn)
            .await
            .map_err(UpstreamError::query)?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_count(&mut self, sql: &str, params: &[Value]) -> UpstreamResult<i64> {
        let query = params.iter().fold(sqlx::query(sql), bind_value);
        let row = query
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(UpstreamError::query)?
            .ok_or(UpstreamError::EmptyCount)?;
        row.try_get::<i64, _>(0).map_err(UpstreamError::query)
    }

    fn abandon(&mut self) {
        self.conn.close_on_drop();
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                query.bind(u)
            } else {
                query.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        // Arrays only reach here outside IN; bind their JSON text.
        other => query.bind(other.to_string()),
    }
}

fn decode_row(row: &MySqlRow) -> UpstreamResult<Row> {
    let mut out = Row::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        let value =
            decode_column(row, idx, col.type_info().name()).map_err(|e| UpstreamError::Decode {
                column: col.name().to_string(),
                message: e.to_string(),
            })?;
        out.insert(col.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let ty = type_name.to_ascii_uppercase();
    let unsigned = ty.ends_with("UNSIGNED");
    let base = ty.split_whitespace().next().unwrap_or_default();

    let typed = match base {
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" if unsigned => {
            row.try_get::<u64, _>(idx).map(Value::from)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(idx).map(Value::from)
        }
        "FLOAT" => row.try_get::<f32, _>(idx).map(|f| Value::from(f as f64)),
        "DOUBLE" => row.try_get::<f64, _>(idx).map(Value::from),
        "DECIMAL" => row
            .try_get::<Decimal, _>(idx)
            .map(|d| Value::String(d.to_string())),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)
            .map(|d| Value::String(d.to_string())),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map(|d| Value::String(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(|d| Value::String(d.to_rfc3339())),
        "TIME" => row
            .try_get::<NaiveTime, _>(idx)
            .map(|t| Value::String(t.to_string())),
        "YEAR" => row.try_get_unchecked::<u16, _>(idx).map(Value::from),
        _ => decode_text(row, idx),
    };

    typed.or_else(|_| decode_text(row, idx))
}

/// Text columns, and byte columns decoded as UTF-8.
fn decode_text(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
    row.try_get::<String, _>(idx)
        .or_else(|_| {
            row.try_get::<Vec<u8>, _>(idx)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .map(Value::String)
}
