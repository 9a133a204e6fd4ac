//! In-process fixture backend.
//!
//! Serves canned result sets keyed by a substring of the incoming query, with
//! optional injected latency and failures. Used by the integration tests and
//! the demo binary; production deployments plug a real driver into the
//! [`GraphDriver`] seam instead.

use super::{DriverError, GraphConnection, GraphDriver, ParamMap, QueryRows, Row};
use crate::schema::GraphSchema;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Outcome {
    Rows(Vec<Row>),
    Reject(String),
}

struct Fixture {
    needle: String,
    outcome: Outcome,
}

struct Inner {
    schema: GraphSchema,
    fixtures: Vec<Fixture>,
    latency: Option<Duration>,
    executions: AtomicUsize,
    schema_fetches: AtomicUsize,
    transient_failures: AtomicUsize,
    connect_failures: AtomicUsize,
}

/// Programmable in-memory backend.
#[derive(Clone)]
pub struct MemoryGraph {
    inner: Arc<Inner>,
}

impl MemoryGraph {
    pub fn builder() -> MemoryGraphBuilder {
        MemoryGraphBuilder {
            schema: GraphSchema::default(),
            fixtures: Vec::new(),
            latency: None,
        }
    }

    /// Total queries actually executed against this backend (cache hits and
    /// deduplicated waiters do not count).
    pub fn execution_count(&self) -> usize {
        self.inner.executions.load(Ordering::SeqCst)
    }

    pub fn schema_fetch_count(&self) -> usize {
        self.inner.schema_fetches.load(Ordering::SeqCst)
    }

    /// Make the next `n` query executions fail with a transient connection
    /// error.
    pub fn inject_transient_failures(&self, n: usize) {
        self.inner.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` connection attempts fail.
    pub fn inject_connect_failures(&self, n: usize) {
        self.inner.connect_failures.store(n, Ordering::SeqCst);
    }
}

pub struct MemoryGraphBuilder {
    schema: GraphSchema,
    fixtures: Vec<Fixture>,
    latency: Option<Duration>,
}

impl MemoryGraphBuilder {
    pub fn schema(mut self, schema: GraphSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Register rows returned for any query containing `needle`
    /// (case-insensitive). Fixtures are matched in registration order.
    pub fn fixture(mut self, needle: &str, rows: Vec<Row>) -> Self {
        self.fixtures.push(Fixture {
            needle: needle.to_uppercase(),
            outcome: Outcome::Rows(rows),
        });
        self
    }

    /// Register a semantic rejection (e.g. unknown property) for any query
    /// containing `needle`.
    pub fn rejection(mut self, needle: &str, message: &str) -> Self {
        self.fixtures.push(Fixture {
            needle: needle.to_uppercase(),
            outcome: Outcome::Reject(message.to_string()),
        });
        self
    }

    /// Add a fixed delay to every execution.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn build(self) -> MemoryGraph {
        MemoryGraph {
            inner: Arc::new(Inner {
                schema: self.schema,
                fixtures: self.fixtures,
                latency: self.latency,
                executions: AtomicUsize::new(0),
                schema_fetches: AtomicUsize::new(0),
                transient_failures: AtomicUsize::new(0),
                connect_failures: AtomicUsize::new(0),
            }),
        }
    }
}

/// Convenience constructor for fixture rows.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

struct MemoryConnection {
    inner: Arc<Inner>,
}

#[async_trait]
impl GraphConnection for MemoryConnection {
    async fn run(
        &mut self,
        query: &str,
        _params: &ParamMap,
        max_rows: usize,
    ) -> Result<QueryRows, DriverError> {
        if consume(&self.inner.transient_failures) {
            return Err(DriverError::Connection("session reset by peer".into()));
        }
        if let Some(latency) = self.inner.latency {
            tokio::time::sleep(latency).await;
        }

        let upper = query.to_uppercase();
        let matched = self
            .inner
            .fixtures
            .iter()
            .find(|f| upper.contains(&f.needle));

        self.inner.executions.fetch_add(1, Ordering::SeqCst);

        match matched {
            Some(Fixture {
                outcome: Outcome::Rows(rows),
                ..
            }) => {
                let more = rows.len() > max_rows;
                Ok(QueryRows {
                    rows: rows.iter().take(max_rows).cloned().collect(),
                    more,
                })
            }
            Some(Fixture {
                outcome: Outcome::Reject(message),
                ..
            }) => Err(DriverError::Query(message.clone())),
            None => Ok(QueryRows::default()),
        }
    }

    async fn fetch_schema(&mut self) -> Result<GraphSchema, DriverError> {
        self.inner.schema_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.schema.clone())
    }
}

#[async_trait]
impl GraphDriver for MemoryGraph {
    async fn connect(&self) -> Result<Box<dyn GraphConnection>, DriverError> {
        if consume(&self.inner.connect_failures) {
            return Err(DriverError::Connection("connection refused".into()));
        }
        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Decrement a failure budget, returning true while it is nonzero.
fn consume(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fixture_match_and_cap() {
        let graph = MemoryGraph::builder()
            .fixture(
                "RETURN C.NAME",
                vec![
                    row(&[("country", json!("India"))]),
                    row(&[("country", json!("Brazil"))]),
                    row(&[("country", json!("Kenya"))]),
                ],
            )
            .build();

        let mut conn = graph.connect().await.unwrap();
        let out = conn
            .run("MATCH (c:Country) RETURN c.name", &ParamMap::new(), 2)
            .await
            .unwrap();
        assert_eq!(out.rows.len(), 2);
        assert!(out.more);
        assert_eq!(graph.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_query_returns_empty() {
        let graph = MemoryGraph::builder().build();
        let mut conn = graph.connect().await.unwrap();
        let out = conn
            .run("MATCH (n) RETURN n LIMIT 10", &ParamMap::new(), 10)
            .await
            .unwrap();
        assert!(out.rows.is_empty());
        assert!(!out.more);
    }

    #[tokio::test]
    async fn test_injected_transient_failure_is_consumed() {
        let graph = MemoryGraph::builder()
            .fixture("RETURN N", vec![row(&[("n", json!(1))])])
            .build();
        graph.inject_transient_failures(1);

        let mut conn = graph.connect().await.unwrap();
        let err = conn
            .run("MATCH (n) RETURN n", &ParamMap::new(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));

        // budget consumed, next run succeeds
        let out = conn
            .run("MATCH (n) RETURN n", &ParamMap::new(), 10)
            .await
            .unwrap();
        assert_eq!(out.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_fixture() {
        let graph = MemoryGraph::builder()
            .rejection("N.BOGUS", "unknown property 'bogus'")
            .build();
        let mut conn = graph.connect().await.unwrap();
        let err = conn
            .run("MATCH (n) RETURN n.bogus", &ParamMap::new(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Query(_)));
    }
}
