//! Records the dataset query core reads and writes.
//!
//! - [`Dataset`] - a saved SELECT bound to a [`DataSource`]
//! - [`DatasetField`] - one entry of a dataset's field catalogue
//! - [`QueryRequest`] / [`QueryResponse`] - in-flight, never persisted

mod dataset;
mod datasource;
mod field;
mod query;

pub use dataset::{Dataset, DatasetConfig, DatasetType};
pub use datasource::{BastionConfig, DataSource};
pub use field::{DatasetField, DefaultSortOrder, FieldDataType, FieldRole};
pub use query::{
    translate_operator, Aggregation, Filter, FilterOperator, QueryRequest, QueryResponse, Row,
    SortDir,
};
