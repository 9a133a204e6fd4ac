//! Kavach — query safety and execution gateway for graph analytics.
//!
//! Kavach sits between an untrusted, model-generated Cypher query (or a
//! pre-built analytic template) and a live graph database, and guarantees
//! every executed operation is read-only, bounded, and auditable.
//!
//! # Architecture
//!
//! - [`validator`] — pure Allow/Deny classification of candidate queries:
//!   read-only policy, token-aware write-keyword denial, injection-pattern
//!   rejection, and bound injection.
//! - [`template`] — fixed registry of parameterized, safe-by-construction
//!   analytics queries with declared parameter schemas.
//! - [`gateway`] — pooled execution with admission and wall-clock timeouts,
//!   bounded retry of transient failures, and row caps.
//! - [`cache`] — short-TTL result cache with at-most-one concurrent
//!   execution per query fingerprint.
//! - [`schema`] — TTL-bounded cache of graph metadata.
//! - [`tool`] — the invocation contract consumed by an external agent loop.
//! - [`driver`] — the seam a concrete database client plugs into.
//!
//! # Example
//!
//! ```rust
//! use kavach::config::GatewayConfig;
//! use kavach::driver::memory::{row, MemoryGraph};
//! use kavach::driver::ParamMap;
//! use kavach::gateway::ExecutionGateway;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let backend = MemoryGraph::builder()
//!     .fixture("COUNT(L) AS LEARNERS", vec![
//!         row(&[("country", json!("India")), ("learners", json!(125_000))]),
//!     ])
//!     .build();
//!
//! let gateway = ExecutionGateway::new(Arc::new(backend), GatewayConfig::default());
//! let result = gateway
//!     .run_template("get_top_countries_by_learners", &ParamMap::new())
//!     .await
//!     .unwrap();
//! assert_eq!(result.row_count, 1);
//! # }
//! ```

#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod schema;
pub mod template;
pub mod tool;
pub mod validator;

// Re-export main types for convenience
pub use config::{ConnectionConfig, GatewayConfig, RetryPolicy};
pub use driver::{DriverError, GraphConnection, GraphDriver, ParamMap, QueryRows, Row};
pub use error::{GatewayError, GatewayResult, ValidationError};
pub use gateway::{CacheClass, ExecutionGateway, ExecutionRequest, ExecutionResult};
pub use schema::{GraphSchema, SchemaCache};
pub use template::{AnalyticTemplate, ParamSpec, ParamType, TemplateCatalog};
pub use tool::{Tool, ToolRegistry};
pub use validator::{QueryValidator, Verdict};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert_eq!(ver, "0.1.0");
    }
}
