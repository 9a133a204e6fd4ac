//! Database driver seam.
//!
//! The gateway never talks to a concrete database client directly: it goes
//! through [`GraphDriver`] / [`GraphConnection`], with the endpoint supplied
//! via [`crate::config::ConnectionConfig`] by the embedding application.
//! Driver implementations must keep credentials out of error messages.

pub mod memory;

use crate::schema::GraphSchema;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

/// Bound query parameters. Values are restricted to scalars (and flat arrays
/// of scalars) by the validator before they reach a driver.
pub type ParamMap = serde_json::Map<String, Value>;

/// A single result record with ordered columns.
pub type Row = IndexMap<String, Value>;

/// Rows consumed from a query, capped at the requested limit.
#[derive(Debug, Clone, Default)]
pub struct QueryRows {
    pub rows: Vec<Row>,
    /// True when the backend had more rows beyond the cap.
    pub more: bool,
}

/// Failures at the driver boundary.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Broken session, network reset, handshake failure. Eligible for retry.
    #[error("connection failure: {0}")]
    Connection(String),

    /// The store rejected the query itself (e.g. unknown property). Never
    /// retried.
    #[error("query rejected: {0}")]
    Query(String),
}

/// A live database session, owned exclusively by one execution at a time.
#[async_trait]
pub trait GraphConnection: Send {
    /// Run a read query with bound parameters, consuming at most `max_rows`
    /// rows. Implementations should stop fetching once the cap is reached and
    /// report via [`QueryRows::more`] whether the result set was larger.
    async fn run(
        &mut self,
        query: &str,
        params: &ParamMap,
        max_rows: usize,
    ) -> Result<QueryRows, DriverError>;

    /// Fetch graph metadata through the driver's dedicated schema call.
    async fn fetch_schema(&mut self) -> Result<GraphSchema, DriverError>;
}

/// Factory for pooled connections.
#[async_trait]
pub trait GraphDriver: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn GraphConnection>, DriverError>;
}
