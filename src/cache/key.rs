//! Tenant-scoped cache key construction.
//!
//! ```text
//! jr:{tenant}:{domain}:{identity}:{fingerprint}
//! ```
//!
//! `fingerprint` is `none` for an empty parameter map, otherwise the first
//! 8 hex characters of SHA-256 over `k1=v1&k2=v2&...` with keys in sorted
//! order.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "jr";
const SEPARATOR: &str = ":";

/// Domain for a datasource's table list.
pub const DOMAIN_DATASOURCE_TABLES: &str = "datasource:tables";
/// Domain for a table's column descriptors.
pub const DOMAIN_DATASOURCE_FIELDS: &str = "datasource:fields";

/// Parameters distinguishing entries of the same identity.
pub type CacheParams = BTreeMap<String, String>;

/// Build a full cache key.
pub fn build_key(tenant_id: &str, domain: &str, identity: &str, params_hash: &str) -> String {
    [KEY_PREFIX, tenant_id, domain, identity, params_hash].join(SEPARATOR)
}

/// Prefix shared by every key of a tenant's domain, trailing separator included.
pub fn build_prefix(tenant_id: &str, domain: &str) -> String {
    let mut prefix = [KEY_PREFIX, tenant_id, domain].join(SEPARATOR);
    prefix.push_str(SEPARATOR);
    prefix
}

/// Fingerprint a parameter map.
pub fn hash_params(params: &CacheParams) -> String {
    if params.is_empty() {
        return "none".to_string();
    }

    let mut hasher = Sha256::new();
    for (k, v) in params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..8].to_string()
}
