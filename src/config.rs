//! Gateway configuration.
//!
//! All limits are external inputs the gateway honors, not decides: maximum
//! result rows, timeouts, cache TTLs, pool size, and the retry budget.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry policy for transient connection failures.
///
/// Backoff is exponential with jitter; the schedule is explicit so behavior
/// stays deterministic and testable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 50,
            max_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), with up to 25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..=exp / 4 + 1);
        Duration::from_millis(exp + jitter)
    }
}

/// Gateway limits and cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Hard cap on returned rows; also the bound injected into queries that
    /// lack a LIMIT clause.
    pub max_rows: usize,
    /// Wall-clock limit for a single query execution.
    pub query_timeout_ms: u64,
    /// Maximum wait for a pooled connection before failing fast.
    pub admission_timeout_ms: u64,
    /// Maximum simultaneously leased database sessions.
    pub pool_size: usize,
    /// TTL for cached ad-hoc query results.
    pub adhoc_cache_ttl_secs: u64,
    /// TTL for cached template results.
    pub template_cache_ttl_secs: u64,
    /// Bounded capacity of the result cache.
    pub result_cache_capacity: usize,
    /// TTL for cached schema metadata.
    pub schema_ttl_secs: u64,
    /// Whether free-text queries may be submitted through the tool contract.
    /// Templates are always available.
    pub allow_adhoc: bool,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_rows: 1_000,
            query_timeout_ms: 30_000,
            admission_timeout_ms: 5_000,
            pool_size: 8,
            adhoc_cache_ttl_secs: 900,
            template_cache_ttl_secs: 900,
            result_cache_capacity: 256,
            schema_ttl_secs: 900,
            allow_adhoc: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn adhoc_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.adhoc_cache_ttl_secs)
    }

    pub fn template_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.template_cache_ttl_secs)
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }

    /// Worst-case wait for a deduplicated caller: admission plus every retry
    /// attempt at full timeout, plus slack for backoff sleeps.
    pub fn waiter_timeout(&self) -> Duration {
        let budget = self.admission_timeout_ms
            + u64::from(self.retry.max_attempts) * self.query_timeout_ms
            + self.retry.max_backoff_ms * u64::from(self.retry.max_attempts)
            + 1_000;
        Duration::from_millis(budget)
    }
}

/// Database endpoint configuration, supplied by the embedding application.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub uri: String,
    pub username: String,
    pub password: String,
    /// Optional database name for multi-database servers.
    pub database: Option<String>,
}

// Credentials must never leak into logs or error messages.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}
