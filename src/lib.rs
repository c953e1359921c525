//! # datasetq
//!
//! Query core for multi-tenant BI datasets: saved SQL queries bound to
//! upstream MySQL databases, with extracted field catalogues and computed
//! fields defined as bracketed-reference expressions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                DatasetService (service)                 │
//! │     tenant checks, create/update rollback, field CRUD   │
//! └─────────────────────────────────────────────────────────┘
//!        │                 │                    │
//!        ▼                 ▼                    ▼
//! ┌─────────────┐  ┌────────────────┐  ┌──────────────────┐
//! │ sql::safety │  │ QueryAssembler │  │ CachedMetadata-  │
//! │ schema      │  │ expr + cache:: │  │ Service + cache  │
//! │ extraction  │  │ computed       │  │ ::MetadataCache  │
//! └─────────────┘  └────────────────┘  └──────────────────┘
//!                          │                    │
//!                          ▼                    ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          QueryExecutor (upstream, deadlines)            │
//! │              MySqlConnector (sqlx pools)                │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod expr;
pub mod metadata;
pub mod model;
pub mod query;
pub mod repository;
pub mod schema;
pub mod service;
pub mod sql;
pub mod upstream;

pub use error::{DatasetError, DatasetResult, SafetyViolation};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::{ComputedFieldCache, MetadataCache};
    pub use crate::config::Settings;
    pub use crate::error::{DatasetError, DatasetResult};
    pub use crate::expr::{field_references, ExpressionBuilder, SqlExpressionBuilder};
    pub use crate::model::{
        Aggregation, DataSource, Dataset, DatasetField, DatasetType, FieldDataType, FieldRole,
        Filter, QueryRequest, QueryResponse, Row,
    };
    pub use crate::query::{AssembledQuery, QueryAssembler};
    pub use crate::service::{DatasetService, Repositories};
    pub use crate::sql::{validate_sql_safety, Dialect, SqlDialect};
    pub use crate::upstream::{MySqlConnector, QueryExecutor};
}
