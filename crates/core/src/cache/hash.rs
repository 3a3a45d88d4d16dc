//! Content-addressed keys for the answer cache.

use sha2::{Digest, Sha256};

/// Normalize a free-text query: trim, lowercase, collapse whitespace runs.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Compute the answer-cache key for a tenant and an already-normalized query.
pub fn compute_query_hash(tenant_id: &str, normalized_query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(normalized_query.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Qual o   Horário? \n"), "qual o horário?");
    }

    #[test]
    fn test_hash_stability() {
        let hash1 = compute_query_hash("tenantA", "qual o horário?");
        let hash2 = compute_query_hash("tenantA", "qual o horário?");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_is_tenant_scoped() {
        let a = compute_query_hash("tenantA", "pricing");
        let b = compute_query_hash("tenantB", "pricing");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_format() {
        let hash = compute_query_hash("tenantA", "pricing");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
