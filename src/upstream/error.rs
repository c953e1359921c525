//! Upstream driver error types.

use thiserror::Error;

use crate::error::DatasetError;

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors raised while talking to an upstream database.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// The connection could not be established within the dial timeout.
    #[error("database connection timeout")]
    DialTimeout,

    /// The driver refused or lost the connection.
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// The statement failed on the server.
    #[error("query execution failed: {0}")]
    QueryFailed(String),

    /// A result column could not be converted to a JSON value.
    #[error("failed to decode column {column}: {message}")]
    Decode { column: String, message: String },

    /// The count statement returned no row.
    #[error("count query returned no rows")]
    EmptyCount,
}

impl UpstreamError {
    pub fn query(err: impl ToString) -> Self {
        Self::QueryFailed(err.to_string())
    }

    /// Check if this error happened before any statement reached the server.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::DialTimeout | Self::ConnectionFailed(_))
    }

    /// Check if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        self.is_connection()
    }
}

impl From<UpstreamError> for DatasetError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::DialTimeout => DatasetError::Timeout("database connection"),
            other => DatasetError::Upstream(other.to_string()),
        }
    }
}
