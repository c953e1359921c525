//! Computed-field expression validation and translation.
//!
//! Validation only checks that the expression is non-empty and that every
//! `[ref]` names a known field. Arithmetic, arity and type correctness are
//! left to the upstream database, which evaluates the translated fragment.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

use super::lexer::FIELD_REFERENCE;
use crate::error::DatasetError;
use crate::sql::dialect::{is_generic_function, Dialect, SqlDialect};

/// Bracketed references are skipped so a field named like a function is
/// never rewritten.
static FUNCTION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\w+\]|\b([A-Za-z_][A-Za-z0-9_]*)\b").expect("function token pattern is valid")
});

/// Errors raised while validating an expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("expression cannot be empty")]
    Empty,

    #[error("field reference '[{0}]' not found in dataset fields")]
    UnknownReference(String),
}

impl From<ExpressionError> for DatasetError {
    fn from(err: ExpressionError) -> Self {
        DatasetError::Validation(format!("invalid expression: {err}"))
    }
}

/// Builds SQL fragments from computed-field expressions.
pub trait ExpressionBuilder: Send + Sync {
    /// Validate, translate and wrap in one pair of parentheses.
    fn build(&self, expression: &str, fields: &[String]) -> Result<String, ExpressionError> {
        self.validate(expression, fields)?;
        Ok(format!("({})", self.translate(expression)))
    }

    /// Check the expression is non-empty and only references `fields`.
    fn validate(&self, expression: &str, fields: &[String]) -> Result<(), ExpressionError>;

    /// Rewrite generic function names into the target dialect.
    fn translate(&self, expression: &str) -> String;

    /// Replace `[name]` with `mapping[name]` in a single pass.
    ///
    /// References missing from `mapping` are left untouched.
    fn substitute_field_references(
        &self,
        expression: &str,
        mapping: &HashMap<String, String>,
    ) -> String {
        substitute_field_references(expression, mapping)
    }
}

/// Expression builder targeting a SQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlExpressionBuilder {
    dialect: Dialect,
}

impl SqlExpressionBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl ExpressionBuilder for SqlExpressionBuilder {
    fn validate(&self, expression: &str, fields: &[String]) -> Result<(), ExpressionError> {
        validate_expression(expression, fields)
    }

    fn translate(&self, expression: &str) -> String {
        translate_functions(expression, self.dialect)
    }
}

/// Check an expression against the dataset's field universe.
pub fn validate_expression(expression: &str, fields: &[String]) -> Result<(), ExpressionError> {
    if expression.trim().is_empty() {
        return Err(ExpressionError::Empty);
    }

    for caps in FIELD_REFERENCE.captures_iter(expression) {
        let name = &caps[1];
        if !fields.iter().any(|f| f == name) {
            return Err(ExpressionError::UnknownReference(name.to_string()));
        }
    }

    Ok(())
}

/// Substitute recognised generic function names with the dialect spelling.
pub fn translate_functions(expression: &str, dialect: Dialect) -> String {
    FUNCTION_TOKEN
        .replace_all(expression, |caps: &Captures<'_>| {
            let token = &caps[0];
            match caps.get(1) {
                Some(word) if is_generic_function(word.as_str()) => dialect
                    .remap_function(word.as_str())
                    .unwrap_or(word.as_str())
                    .to_string(),
                _ => token.to_string(),
            }
        })
        .into_owned()
}

/// Replace `[name]` with `mapping[name]` in a single pass.
pub fn substitute_field_references(expression: &str, mapping: &HashMap<String, String>) -> String {
    FIELD_REFERENCE
        .replace_all(expression, |caps: &Captures<'_>| match mapping.get(&caps[1]) {
            Some(column) => column.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
