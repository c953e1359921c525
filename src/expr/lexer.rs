//! Field-reference lexer.
//!
//! References are written `[identifier]` with `identifier` matching `\w+`.
//! There is no escape syntax: a literal `[word]` inside a string literal of an
//! expression is still read as a reference.

use once_cell::sync::Lazy;
use regex::Regex;

pub(crate) static FIELD_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\w+)\]").expect("field reference pattern is valid"));

/// Distinct field references in order of first appearance.
///
/// ```
/// use datasetq::expr::field_references;
///
/// let refs = field_references("[price] * [qty] + [price]");
/// assert_eq!(refs, vec!["price", "qty"]);
/// ```
pub fn field_references(expression: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for caps in FIELD_REFERENCE.captures_iter(expression) {
        let name = &caps[1];
        if !refs.iter().any(|r| r == name) {
            refs.push(name.to_string());
        }
    }
    refs
}

/// Whether `expression` references `name`.
pub fn references_field(expression: &str, name: &str) -> bool {
    FIELD_REFERENCE
        .captures_iter(expression)
        .any(|caps| &caps[1] == name)
}
