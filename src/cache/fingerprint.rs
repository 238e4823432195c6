//! Query Fingerprinting
//!
//! Derives a stable cache key component from arbitrary filter criteria.
//! Maps are canonicalised (object keys sorted at every depth) before
//! hashing, so `{a:1,b:2}` and `{b:2,a:1}` produce the same digest.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the abbreviated fingerprint used in human-facing keys
pub const SHORT_LEN: usize = 16;

/// Compute the SHA-256 fingerprint of a filter set as lowercase hex
pub fn fingerprint<T: Serialize + ?Sized>(filters: &T) -> Result<String> {
    let value = serde_json::to_value(filters)
        .map_err(|e| Error::Serialization(format!("unsupported filter value: {e}")))?;
    let canonical = canonicalize(value);
    let encoded = serde_json::to_vec(&canonical)
        .map_err(|e| Error::Serialization(format!("canonical encoding failed: {e}")))?;

    Ok(hex::encode(Sha256::digest(&encoded)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

// =============================================================================
// Query Fingerprint
// =============================================================================

/// Fingerprint of a query's filter criteria
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Fingerprint a filter set
    pub fn of<T: Serialize + ?Sized>(filters: &T) -> Result<Self> {
        fingerprint(filters).map(Self)
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated digest
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN.min(self.0.len())]
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_permutation_invariance() {
        let a = json!({"platform": "stubhub", "min_price": 50, "sport": "football"});
        let b = json!({"sport": "football", "platform": "stubhub", "min_price": 50});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());

        let mut m1 = HashMap::new();
        let mut m2 = HashMap::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            m1.insert(k, v);
        }
        for (k, v) in [("d", 4), ("c", 3), ("b", 2), ("a", 1)] {
            m2.insert(k, v);
        }
        assert_eq!(fingerprint(&m1).unwrap(), fingerprint(&m2).unwrap());
    }

    #[test]
    fn test_nested_maps_are_canonical() {
        let a = json!({"filters": {"x": 1, "y": [ {"b": 2, "a": 1} ]}});
        let b = json!({"filters": {"y": [ {"a": 1, "b": 2} ], "x": 1}});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_discrimination() {
        let base = json!({"platform": "stubhub", "min_price": 50});
        let other_value = json!({"platform": "stubhub", "min_price": 51});
        let other_key = json!({"platform": "stubhub", "max_price": 50});
        let fp = fingerprint(&base).unwrap();
        assert_ne!(fp, fingerprint(&other_value).unwrap());
        assert_ne!(fp, fingerprint(&other_key).unwrap());
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!({"ids": [1, 2]});
        let b = json!({"ids": [2, 1]});
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_digest_shape() {
        let fp = QueryFingerprint::of(&json!({})).unwrap();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp.short().len(), SHORT_LEN);
        assert!(fp.as_str().starts_with(fp.short()));
    }

    #[test]
    fn test_unsupported_value_fails_fast() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys have no JSON form");
        assert_matches!(fingerprint(&bad), Err(Error::Serialization(_)));
    }
}
