//! Execution gateway.
//!
//! The only path from a candidate query to the database. Owns the connection
//! pool, the result cache, and the schema cache; applies timeouts and row
//! caps; retries transient connection failures with bounded backoff; records
//! execution metadata (latency, truncation, cache hit) on every result.

pub mod pool;

use crate::cache::ResultCache;
use crate::config::GatewayConfig;
use crate::driver::{DriverError, GraphDriver, ParamMap, Row};
use crate::error::{GatewayError, GatewayResult};
use crate::schema::{GraphSchema, SchemaCache};
use crate::template::TemplateCatalog;
use crate::validator::QueryValidator;
use pool::ConnectionPool;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cache class of a request; each class carries its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClass {
    AdHoc,
    Template,
}

/// A fully bounded, ready-to-execute query. Produced only by the validator
/// (ad-hoc path) or the template catalog — never constructed from raw caller
/// input.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub query_text: String,
    pub params: ParamMap,
    pub row_limit: usize,
    /// Per-request override; `None` uses the configured default.
    pub timeout: Option<Duration>,
    pub class: CacheClass,
}

/// Rows plus execution metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub row_count: usize,
    /// True when the backend had more rows than `row_limit`.
    pub truncated: bool,
    pub elapsed_ms: u64,
    /// True when served from the result cache or a deduplicated execution.
    pub cache_hit: bool,
}

/// Gateway instance, constructed once and shared by reference. No ambient
/// global state.
pub struct ExecutionGateway {
    config: GatewayConfig,
    pool: ConnectionPool,
    validator: QueryValidator,
    catalog: TemplateCatalog,
    results: ResultCache,
    schema: SchemaCache,
}

impl ExecutionGateway {
    pub fn new(driver: Arc<dyn GraphDriver>, config: GatewayConfig) -> Self {
        Self::with_catalog(driver, config, TemplateCatalog::builtin())
    }

    pub fn with_catalog(
        driver: Arc<dyn GraphDriver>,
        config: GatewayConfig,
        catalog: TemplateCatalog,
    ) -> Self {
        info!(
            pool_size = config.pool_size,
            max_rows = config.max_rows,
            allow_adhoc = config.allow_adhoc,
            "gateway initialized"
        );
        Self {
            pool: ConnectionPool::new(driver, config.pool_size),
            validator: QueryValidator::new(config.max_rows),
            catalog,
            results: ResultCache::new(config.result_cache_capacity),
            schema: SchemaCache::new(config.schema_ttl()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Render a registered template and execute it.
    pub async fn run_template(
        &self,
        template_id: &str,
        params: &ParamMap,
    ) -> GatewayResult<ExecutionResult> {
        self.validator.validate_params(params)?;
        let request = self.catalog.render(template_id, params)?;
        debug!(template_id, "template rendered");
        self.execute(request).await
    }

    /// Validate a free-text query and execute its normalized form. The
    /// caller's original text never reaches the database.
    pub async fn run_adhoc(
        &self,
        query_text: &str,
        params: &ParamMap,
    ) -> GatewayResult<ExecutionResult> {
        self.validator.validate_params(params)?;
        let verdict = self.validator.validate(query_text);
        let normalized = verdict.into_result().inspect_err(|reason| {
            warn!(%reason, "ad-hoc query denied");
        })?;

        // Labels absent from the cached schema log a warning only; a stale
        // schema must not break a valid query.
        if let Some(schema) = self.schema.fresh().await {
            for label in self.validator.referenced_labels(&normalized) {
                if !schema.has_label(&label) {
                    warn!(label, "query references label unknown to cached schema");
                }
            }
        }

        self.execute(ExecutionRequest {
            query_text: normalized,
            params: params.clone(),
            row_limit: self.config.max_rows,
            timeout: None,
            class: CacheClass::AdHoc,
        })
        .await
    }

    /// Execute a prepared request through the cache, the deduplicator, and
    /// the pool.
    pub async fn execute(&self, request: ExecutionRequest) -> GatewayResult<ExecutionResult> {
        let fp = fingerprint(&request.query_text, &request.params);
        let ttl = match request.class {
            CacheClass::AdHoc => self.config.adhoc_cache_ttl(),
            CacheClass::Template => self.config.template_cache_ttl(),
        };

        self.results
            .get_or_compute(&fp, ttl, self.config.waiter_timeout(), || {
                self.execute_uncached(&request)
            })
            .await
    }

    /// Pooled execution with wall-clock timeout and bounded retry of
    /// transient failures. Validation and semantic failures are never
    /// retried.
    async fn execute_uncached(
        &self,
        request: &ExecutionRequest,
    ) -> GatewayResult<ExecutionResult> {
        let query_timeout = request.timeout.unwrap_or(self.config.query_timeout());
        let attempts = self.config.retry.max_attempts.max(1);
        let started = Instant::now();

        for attempt in 1..=attempts {
            // Admission timeouts are surfaced as-is; failed connection
            // attempts count against the same retry budget as broken
            // sessions.
            let mut lease = match self.pool.acquire(self.config.admission_timeout()).await {
                Ok(lease) => lease,
                Err(err @ GatewayError::ConnectionFailure(_)) if attempt < attempts => {
                    let delay = self.config.retry.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "connection acquisition failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let run = tokio::time::timeout(
                query_timeout,
                lease
                    .conn()
                    .run(&request.query_text, &request.params, request.row_limit),
            )
            .await;

            match run {
                Err(_) => {
                    // The session may still be mid-query; never reuse it.
                    lease.discard();
                    return Err(GatewayError::QueryTimeout {
                        timeout_ms: query_timeout.as_millis() as u64,
                    });
                }
                Ok(Err(DriverError::Query(message))) => {
                    return Err(GatewayError::DatabaseError(message));
                }
                Ok(Err(DriverError::Connection(message))) => {
                    lease.discard();
                    if attempt < attempts {
                        let delay = self.config.retry.backoff(attempt);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            %message,
                            "transient connection failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(GatewayError::ConnectionFailure(message));
                }
                Ok(Ok(out)) => {
                    let result = ExecutionResult {
                        row_count: out.rows.len(),
                        truncated: out.more,
                        rows: out.rows,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        cache_hit: false,
                    };
                    debug!(
                        rows = result.row_count,
                        truncated = result.truncated,
                        elapsed_ms = result.elapsed_ms,
                        "query executed"
                    );
                    return Ok(result);
                }
            }
        }

        Err(GatewayError::ConnectionFailure(
            "retry budget exhausted".into(),
        ))
    }

    /// Current schema metadata, served from cache within its TTL and
    /// refreshed through the driver's dedicated metadata call otherwise.
    pub async fn schema(&self) -> GatewayResult<GraphSchema> {
        if let Some(schema) = self.schema.fresh().await {
            return Ok(schema);
        }

        let mut lease = self.pool.acquire(self.config.admission_timeout()).await?;
        let fetched = tokio::time::timeout(
            self.config.query_timeout(),
            lease.conn().fetch_schema(),
        )
        .await;

        let schema = match fetched {
            Err(_) => {
                lease.discard();
                return Err(GatewayError::QueryTimeout {
                    timeout_ms: self.config.query_timeout_ms,
                });
            }
            Ok(Err(DriverError::Connection(message))) => {
                lease.discard();
                return Err(GatewayError::ConnectionFailure(message));
            }
            Ok(Err(DriverError::Query(message))) => {
                return Err(GatewayError::DatabaseError(message));
            }
            Ok(Ok(schema)) => schema,
        };

        self.schema.put(schema.clone()).await;
        Ok(schema)
    }
}

/// Canonical hash of a request: normalized text plus parameters in sorted key
/// order, so identical requests collide regardless of map ordering.
pub fn fingerprint(query_text: &str, params: &ParamMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query_text.as_bytes());
    hasher.update([0u8]);

    let sorted: BTreeMap<&String, &serde_json::Value> = params.iter().collect();
    for (key, value) in sorted {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.to_string().as_bytes());
        hasher.update([0u8]);
    }

    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
