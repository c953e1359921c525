//! Coarse static screening of analyst-authored base queries.
//!
//! This is a first-line filter, not a parser. It over-rejects: a banned verb
//! inside a string literal or identifier still fails the check. Anything that
//! passes is additionally wrapped as a subquery and executed under a deadline.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SafetyViolation;

/// Maximum accepted query length in bytes (after trimming).
pub const MAX_QUERY_LENGTH: usize = 20_000;

/// Maximum number of `JOIN` keywords.
pub const MAX_JOIN_COUNT: usize = 5;

/// Maximum number of `( SELECT` nested subqueries.
pub const MAX_NESTED_SELECTS: usize = 3;

static DISALLOWED_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|TRUNCATE|ALTER|CREATE|GRANT|REVOKE|EXEC|CALL|MERGE|REPLACE)\b",
    )
    .expect("disallowed verb pattern is valid")
});

static JOIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bJOIN\b").expect("join pattern is valid"));

static NESTED_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(\s*SELECT\b").expect("nested select pattern is valid"));

/// Screen a candidate SELECT.
///
/// Rules apply in order and stop at the first failure:
/// 1. non-empty after trimming
/// 2. at most [`MAX_QUERY_LENGTH`] bytes
/// 3. a single statement (one trailing `;` is tolerated)
/// 4. no data- or schema-mutating verb anywhere
/// 5. at most [`MAX_JOIN_COUNT`] joins
/// 6. at most [`MAX_NESTED_SELECTS`] nested selects
pub fn validate_sql_safety(query: &str) -> Result<(), SafetyViolation> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(SafetyViolation::Empty);
    }

    if trimmed.len() > MAX_QUERY_LENGTH {
        return Err(SafetyViolation::TooLong);
    }

    if contains_multiple_statements(trimmed) {
        return Err(SafetyViolation::MultipleStatements);
    }

    if DISALLOWED_VERB.is_match(trimmed) {
        return Err(SafetyViolation::DisallowedOperation);
    }

    if JOIN.find_iter(trimmed).count() > MAX_JOIN_COUNT {
        return Err(SafetyViolation::TooManyJoins);
    }

    if NESTED_SELECT.find_iter(trimmed).count() > MAX_NESTED_SELECTS {
        return Err(SafetyViolation::TooManyNestedSelects);
    }

    Ok(())
}

fn contains_multiple_statements(query: &str) -> bool {
    strip_terminator(query).contains(';')
}

/// Trim whitespace and at most one trailing `;`.
///
/// Used wherever a base query is embedded as a subquery.
pub fn strip_terminator(query: &str) -> &str {
    let body = query.trim();
    body.strip_suffix(';').unwrap_or(body).trim_end()
}
