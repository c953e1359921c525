//! In-process computed-field cache.
//!
//! Memoises per-field values keyed by field id. Expiry is lazy: an entry past
//! its deadline reads as a miss and is overwritten on the next `set`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    deadline: Instant,
}

/// A string map with per-entry TTL guarded by a reader/writer lock.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    items: RwLock<HashMap<String, Entry>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value if present and not past its deadline.
    pub fn get(&self, key: &str) -> Option<String> {
        let items = self.read();
        let entry = items.get(key)?;
        if Instant::now() > entry.deadline {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        let entry = Entry {
            value: value.into(),
            deadline: Instant::now() + ttl,
        };
        self.write().insert(key.to_string(), entry);
    }

    pub fn invalidate(&self, key: &str) {
        self.write().remove(key);
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Critical sections never panic, so a poisoned lock still holds a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-field memo of raw expressions and their translations.
///
/// Three independent namespaces share the field id as key:
///
/// - `expressions` - the raw expression text
/// - `sql` - the translated SQL fragment used by the query assembler
/// - `js` - a client-side rendering, for datasets evaluated outside SQL
#[derive(Debug, Default)]
pub struct ComputedFieldCache {
    expressions: ExpressionCache,
    sql: ExpressionCache,
    js: ExpressionCache,
}

impl ComputedFieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_expression(&self, field_id: &str) -> Option<String> {
        self.expressions.get(field_id)
    }

    pub fn set_expression(&self, field_id: &str, expression: &str, ttl: Duration) {
        self.expressions.set(field_id, expression, ttl);
    }

    pub fn get_sql(&self, field_id: &str) -> Option<String> {
        self.sql.get(field_id)
    }

    pub fn set_sql(&self, field_id: &str, sql: &str, ttl: Duration) {
        self.sql.set(field_id, sql, ttl);
    }

    pub fn get_js(&self, field_id: &str) -> Option<String> {
        self.js.get(field_id)
    }

    pub fn set_js(&self, field_id: &str, js: &str, ttl: Duration) {
        self.js.set(field_id, js, ttl);
    }

    /// Drop the field from every namespace.
    pub fn invalidate_field(&self, field_id: &str) {
        self.expressions.invalidate(field_id);
        self.sql.invalidate(field_id);
        self.js.invalidate(field_id);
    }

    pub fn clear(&self) {
        self.expressions.clear();
        self.sql.clear();
        self.js.clear();
    }
}
