//! Time-bounded cache of database metadata.
//!
//! The schema (labels, relationship types, property keys) is refreshed from a
//! dedicated metadata call on the driver, never from user queries. It is
//! consulted by the validator for defense-in-depth label checks and by
//! template parameter inference.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Snapshot of graph metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub property_keys: Vec<String>,
}

impl GraphSchema {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn has_relationship_type(&self, rel_type: &str) -> bool {
        self.relationship_types.iter().any(|r| r == rel_type)
    }

    pub fn has_property_key(&self, key: &str) -> bool {
        self.property_keys.iter().any(|k| k == key)
    }

    /// One-line summary suitable for prompt construction by the caller.
    pub fn summary(&self) -> String {
        format!(
            "labels: [{}], relationships: [{}], properties: [{}]",
            self.labels.join(", "),
            self.relationship_types.join(", "),
            self.property_keys.join(", ")
        )
    }
}

/// TTL-expiring holder for the latest schema snapshot.
///
/// Expiry is checked on every read; there is no background sweep.
pub struct SchemaCache {
    ttl: Duration,
    inner: RwLock<Option<(GraphSchema, Instant)>>,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// Return the cached schema if it is still within its TTL.
    pub async fn fresh(&self) -> Option<GraphSchema> {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some((schema, stored_at)) if stored_at.elapsed() < self.ttl => {
                Some(schema.clone())
            }
            _ => None,
        }
    }

    /// Store a freshly fetched snapshot.
    pub async fn put(&self, schema: GraphSchema) {
        let mut guard = self.inner.write().await;
        *guard = Some((schema, Instant::now()));
    }

    /// Drop the cached snapshot, forcing the next read to refresh.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> GraphSchema {
        GraphSchema {
            labels: vec!["Learner".into(), "Course".into(), "Country".into()],
            relationship_types: vec!["ENROLLED_IN".into(), "LOCATED_IN".into()],
            property_keys: vec!["name".into(), "code".into()],
        }
    }

    #[test]
    fn test_schema_lookups() {
        let schema = sample_schema();
        assert!(schema.has_label("Learner"));
        assert!(!schema.has_label("Invoice"));
        assert!(schema.has_relationship_type("ENROLLED_IN"));
        assert!(schema.has_property_key("code"));
    }

    #[tokio::test]
    async fn test_fresh_within_ttl() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        assert!(cache.fresh().await.is_none());

        cache.put(sample_schema()).await;
        assert_eq!(cache.fresh().await, Some(sample_schema()));
    }

    #[tokio::test]
    async fn test_expired_entry_not_served() {
        let cache = SchemaCache::new(Duration::from_millis(10));
        cache.put(sample_schema()).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.fresh().await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        cache.put(sample_schema()).await;
        cache.invalidate().await;
        assert!(cache.fresh().await.is_none());
    }
}
