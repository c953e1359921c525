//! SQL helpers shared by the assembler and the service layer.
//!
//! - [`safety`] - coarse screening of analyst-authored base queries
//! - [`dialect`] - dialect-specific quoting, placeholders and function names

pub mod dialect;
pub mod safety;


pub use dialect::{Dialect, SqlDialect};
pub use safety::{strip_terminator, validate_sql_safety};
