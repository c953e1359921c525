//! Error taxonomy for the dataset query core.
//!
//! Every fallible operation in the crate returns [`DatasetResult`]. Narrow
//! subsystem errors ([`CacheError`](crate::cache::CacheError),
//! [`SettingsError`](crate::config::SettingsError),
//! [`UpstreamError`](crate::upstream::UpstreamError)) convert into
//! [`DatasetError`] at the boundary where they reach a caller.

use thiserror::Error;

/// Result type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Reason a base query was rejected by the safety gate.
///
/// The `Display` text is reported verbatim to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyViolation {
    #[error("query is required")]
    Empty,

    #[error("query is too long")]
    TooLong,

    #[error("multiple SQL statements are not allowed")]
    MultipleStatements,

    #[error("query contains disallowed SQL operation")]
    DisallowedOperation,

    #[error("query exceeds max join count")]
    TooManyJoins,

    #[error("query exceeds max nested subquery count")]
    TooManyNestedSelects,
}

/// Errors surfaced by the dataset query core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    /// Malformed request: missing name/type, bad expression, bad field type.
    #[error("{0}")]
    Validation(String),

    /// Ownership mismatch between the request tenant and the record tenant.
    #[error("resource belongs to another tenant")]
    Tenant,

    /// Target record absent (or hidden by a tenant mismatch).
    #[error("{0} not found")]
    NotFound(String),

    /// Base query rejected by the safety gate.
    #[error("query validation failed: {0}")]
    Safety(SafetyViolation),

    /// Computed-field dependency graph contains a cycle.
    #[error("circular dependency detected for field: {0}")]
    Cycle(String),

    /// `IN` filter value is not a non-empty sequence.
    #[error("invalid filter condition: field {0} expects non-empty array for IN")]
    FilterShape(String),

    /// Upstream driver failure not otherwise classified.
    #[error("{0}")]
    Upstream(String),

    /// The request deadline expired before the upstream responded.
    #[error("{0} timeout")]
    Timeout(&'static str),

    /// Metadata cache failure. Only surfaces when the cache is not degraded.
    #[error("cache unavailable: {0}")]
    CacheDegraded(String),
}

impl DatasetError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error for the given entity kind.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound(entity.into())
    }

    /// Create an upstream error carrying the original message.
    pub fn upstream(message: impl ToString) -> Self {
        Self::Upstream(message.to_string())
    }

    /// Map the error to what a caller outside the core may see.
    ///
    /// Tenant mismatches are indistinguishable from missing records.
    pub fn external(self) -> Self {
        match self {
            Self::Tenant => Self::NotFound("resource".to_string()),
            other => other,
        }
    }

    /// Check if this error means the target does not exist for the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Tenant)
    }

    /// Check if this error came from the upstream database.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Timeout(_))
    }

    /// Check if retrying the same request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::CacheDegraded(_))
    }

    /// Rewrite the message of an error while keeping its kind.
    ///
    /// Variants without a free-form message are returned unchanged.
    pub(crate) fn map_message(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Self::Validation(m) => Self::Validation(f(m)),
            Self::Upstream(m) => Self::Upstream(f(m)),
            Self::NotFound(m) => Self::NotFound(f(m)),
            Self::CacheDegraded(m) => Self::CacheDegraded(f(m)),
            other => other,
        }
    }

    /// Prefix the message of an error while keeping its kind.
    pub(crate) fn context(self, prefix: &str) -> Self {
        self.map_message(|m| format!("{prefix}: {m}"))
    }
}

impl From<SafetyViolation> for DatasetError {
    fn from(violation: SafetyViolation) -> Self {
        Self::Safety(violation)
    }
}

impl From<serde_json::Error> for DatasetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("invalid dataset config: {err}"))
    }
}
