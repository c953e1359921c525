//! Computed-field expression language.
//!
//! Expressions are SQL-like text with bracketed field references:
//!
//! ```text
//! ROUND([price] * [qty], 2)
//! ```
//!
//! Three independent pieces operate on them:
//!
//! - [`lexer`] finds the `[name]` references
//! - [`builder::validate_expression`] checks references against a field set
//! - [`builder::translate_functions`] rewrites generic function names for a dialect
//!
//! [`ExpressionBuilder::build`] combines validation and translation.

pub mod builder;
pub mod lexer;

pub use builder::{
    substitute_field_references, translate_functions, validate_expression, ExpressionBuilder,
    ExpressionError, SqlExpressionBuilder,
};
pub use lexer::{field_references, references_field};
