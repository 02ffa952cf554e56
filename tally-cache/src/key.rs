//! Semantic cache keys.
//!
//! A key is an entity collection name plus the canonical JSON encoding of
//! the query parameters. `serde_json` maps keep their keys sorted, so two
//! parameter values that serialize to equal JSON always produce equal keys.

use serde::Serialize;
use std::fmt;
use tally_core::{CacheError, RecordId};

/// Identifies one materialized query result in the cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    collection: String,
    params: String,
}

impl CacheKey {
    /// Build a key from a collection and any serializable parameters.
    pub fn new<P: Serialize + ?Sized>(
        collection: impl Into<String>,
        params: &P,
    ) -> Result<Self, CacheError> {
        let collection = collection.into();
        let params = serde_json::to_value(params)
            .map(|v| v.to_string())
            .map_err(|e| CacheError::Encode {
                key: collection.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { collection, params })
    }

    /// A parameterless key for a whole collection, e.g. `people`.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            params: "null".to_string(),
        }
    }

    /// A key for one record's detail, e.g. `person-detail {"id":"p1"}`.
    pub fn detail(collection: impl Into<String>, id: &RecordId) -> Self {
        Self {
            collection: collection.into(),
            params: serde_json::json!({ "id": id.as_str() }).to_string(),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Canonical JSON of the parameters.
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn matches_collection(&self, collection: &str) -> bool {
        self.collection == collection
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_equal_params_give_equal_keys_regardless_of_field_order() {
        let mut a = HashMap::new();
        a.insert("person", "p1");
        a.insert("day", "2026-03-10");
        let b = json!({ "day": "2026-03-10", "person": "p1" });

        let ka = CacheKey::new("completions", &a).unwrap();
        let kb = CacheKey::new("completions", &b).unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn test_different_params_or_collection_differ() {
        let a = CacheKey::new("routines", &json!({ "owner": "p1" })).unwrap();
        let b = CacheKey::new("routines", &json!({ "owner": "p2" })).unwrap();
        let c = CacheKey::new("goals", &json!({ "owner": "p1" })).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_detail_matches_explicit_params() {
        let id = RecordId::from("p1");
        assert_eq!(
            CacheKey::detail("person-detail", &id),
            CacheKey::new("person-detail", &json!({ "id": "p1" })).unwrap()
        );
    }

    #[test]
    fn test_collection_key() {
        let key = CacheKey::collection("people");
        assert!(key.matches_collection("people"));
        assert!(!key.matches_collection("person"));
        assert_eq!(key, CacheKey::new("people", &()).unwrap());
        assert_eq!(key.to_string(), "people:null");
    }
}
