//! Key normalization and fingerprinting

use sha2::{Digest, Sha256};

/// Normalizes a natural-language query before embedding or fingerprinting:
/// trimmed, lowercased, with runs of whitespace collapsed to single spaces.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derives a stable fingerprint from a tenant id and a normalized query.
///
/// Used to key locks and deduplicate concurrent computations for
/// near-identical queries. The tenant id is part of the digest so two
/// organizations asking the same question never share a lock.
pub fn fingerprint(organization_id: &str, normalized_query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(organization_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(normalized_query.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extracts the logical namespace from a cache key.
///
/// Keys follow the `namespace:rest` convention (e.g. `db:emissions:org123`
/// has namespace `db`); a key without a separator is its own namespace.
pub fn namespace_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(
            normalize_query("  What are   my Scope 2\temissions?  "),
            "what are my scope 2 emissions?"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_query("Show ME  the data");
        assert_eq!(normalize_query(&once), once);
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint("org-1", "what are my emissions?");
        let b = fingerprint("org-1", "what are my emissions?");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_across_tenants() {
        let a = fingerprint("org-1", "what are my emissions?");
        let b = fingerprint("org-2", "what are my emissions?");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_across_queries() {
        let a = fingerprint("org-1", "query one");
        let b = fingerprint("org-1", "query two");
        assert_ne!(a, b);
    }

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("db:emissions:org123:2025"), "db");
        assert_eq!(namespace_of("standalone"), "standalone");
    }
}
