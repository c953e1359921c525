//! Shared helper functions for SQL dialect implementations.

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with backticks, doubling embedded backticks.
/// Used by: MySQL, MariaDB
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

// =============================================================================
// Pagination
// =============================================================================

/// Emit `LIMIT n OFFSET m`.
pub fn emit_limit_offset_standard(limit: u64, offset: u64) -> String {
    format!("LIMIT {limit} OFFSET {offset}")
}

// =============================================================================
// Function Remapping
// =============================================================================

/// Remap generic expression functions for MySQL.
///
/// MySQL spells every generic function the same way, so this is the identity
/// over the recognised set.
pub fn remap_function_mysql(name: &str) -> Option<&'static str> {
    super::GENERIC_FUNCTIONS
        .iter()
        .find(|generic| **generic == name)
        .copied()
}
