//! Upstream database access.
//!
//! ```text
//! QueryExecutor ──► UpstreamConnector ──► Upstream (one borrowed connection)
//!   deadlines         pools per target        describe / fetch_rows / fetch_count
//! ```
//!
//! The executor owns every deadline. A connection whose statement was
//! abandoned on timeout is closed rather than reused, which aborts the
//! statement on the server.

mod error;
pub mod executor;
pub mod mysql;

pub use error::{UpstreamError, UpstreamResult};
pub use executor::{QueryExecutor, PREVIEW_TIMEOUT, QUERY_TIMEOUT};
pub use mysql::MySqlConnector;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ConnectionSettings;
use crate::model::Row;
use crate::schema::ColumnMeta;

/// One live connection to an upstream database.
#[async_trait]
pub trait Upstream: Send {
    /// Prepare `sql` and report its result columns without fetching rows.
    async fn describe(&mut self, sql: &str) -> UpstreamResult<Vec<ColumnMeta>>;

    /// Run `sql` with positional `params` and materialise every row.
    async fn fetch_rows(&mut self, sql: &str, params: &[Value]) -> UpstreamResult<Vec<Row>>;

    /// Run a single-value `COUNT(*)` statement.
    async fn fetch_count(&mut self, sql: &str, params: &[Value]) -> UpstreamResult<i64>;

    /// Mark the connection unusable after an abandoned statement.
    fn abandon(&mut self);
}

/// Opens connections to upstream databases.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, settings: &ConnectionSettings) -> UpstreamResult<Box<dyn Upstream>>;
}
