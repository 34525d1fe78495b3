//! Serializable view of cache entries, used to hand a server-rendered cache
//! over to a freshly constructed one

use crate::cache::types::CacheKey;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The committed entries of a cache at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheSnapshot<V> {
    pub entries: BTreeMap<CacheKey, V>,
}

impl<V> CacheSnapshot<V> {
    pub fn new(entries: BTreeMap<CacheKey, V>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for CacheSnapshot<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Serialize> CacheSnapshot<V> {
    /// Serialize to a JSON object of key to value
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<V: DeserializeOwned> CacheSnapshot<V> {
    /// Parse a JSON object of key to value
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<V> FromIterator<(CacheKey, V)> for CacheSnapshot<V> {
    fn from_iter<I: IntoIterator<Item = (CacheKey, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    #[test]
    fn test_snapshot_is_a_plain_json_object() {
        let snapshot: CacheSnapshot<u32> =
            vec![("b".to_string(), 2), ("a".to_string(), 1)].into_iter().collect();

        assert_eq!(snapshot.to_json().unwrap(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_snapshot_from_json() {
        let snapshot = CacheSnapshot::<String>::from_json(r#"{"user:1":"Alice"}"#).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.entries.get("user:1").map(String::as_str), Some("Alice"));

        let broken = CacheSnapshot::<String>::from_json("[1, 2]");
        assert!(matches!(broken, Err(CacheError::Serialization(_))));
    }
}
