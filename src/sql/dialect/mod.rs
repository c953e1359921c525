//! SQL dialect definitions and formatting rules.
//!
//! The assembler only targets one MySQL-compatible engine, but everything
//! dialect-specific goes through the [`SqlDialect`] trait so that call sites
//! never hard-code quoting, placeholders or function names:
//!
//! - Identifier quoting: `` ` `` (MySQL)
//! - Bind placeholders: `?` (MySQL)
//! - Pagination: `LIMIT n OFFSET m`
//! - Generic function names used in computed-field expressions
//!
//! # Usage
//!
//! ```ignore
//! use datasetq::sql::dialect::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::MySql;
//! let quoted = dialect.quote_identifier("order");  // `order`
//! ```

pub mod helpers;
mod mysql;

pub use mysql::MySql;

/// Generic function names accepted in computed-field expressions.
///
/// Each dialect maps these onto its own spelling via
/// [`SqlDialect::remap_function`].
pub const GENERIC_FUNCTIONS: &[&str] = &[
    "CONCAT",
    "SUBSTRING",
    "LENGTH",
    "UPPER",
    "LOWER",
    "TRIM",
    "DATE_FORMAT",
    "DATE_ADD",
    "DATE_SUB",
    "DATEDIFF",
    "NOW",
    "CURDATE",
    "CURTIME",
    "YEAR",
    "MONTH",
    "DAY",
    "HOUR",
    "MINUTE",
    "SECOND",
    "ROUND",
    "CEIL",
    "FLOOR",
    "ABS",
    "SUM",
    "AVG",
    "COUNT",
    "MAX",
    "MIN",
    "IF",
    "CASE",
];

/// Check whether `name` is one of the [`GENERIC_FUNCTIONS`].
pub fn is_generic_function(name: &str) -> bool {
    GENERIC_FUNCTIONS.contains(&name)
}

/// SQL dialect trait - defines how SQL constructs are rendered.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    /// Quote an identifier (column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Positional bind placeholder.
    fn placeholder(&self) -> &'static str {
        "?"
    }

    /// Emit the pagination clause.
    fn emit_limit_offset(&self, limit: u64, offset: u64) -> String {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    /// Dialect spelling of a generic function name.
    ///
    /// Returns `None` when `name` is not a recognised generic function.
    fn remap_function(&self, name: &str) -> Option<&'static str>;
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    MySql,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::MySql => &MySql,
        }
    }
}

impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn placeholder(&self) -> &'static str {
        self.dialect().placeholder()
    }

    fn emit_limit_offset(&self, limit: u64, offset: u64) -> String {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
