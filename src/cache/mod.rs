//! Result cache and in-flight deduplicator.
//!
//! Short-TTL cache keyed by query fingerprint, with at-most-one concurrent
//! execution per fingerprint: callers arriving while an identical request is
//! executing attach as waiters and receive the primary's outcome, success or
//! failure. Failures are never cached, so a later call performs a real
//! execution. TTL expiry is checked on every read; there is no background
//! sweep.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::ExecutionResult;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

struct CacheEntry {
    value: ExecutionResult,
    created_at: Instant,
    ttl: Duration,
}

type Outcome = GatewayResult<ExecutionResult>;

enum Role<'a> {
    Primary(FlightToken<'a>, broadcast::Sender<Outcome>),
    Waiter(broadcast::Receiver<Outcome>),
}

/// Deregisters the primary's in-flight claim when dropped, including when the
/// primary's future is cancelled mid-compute. Removal drops the registered
/// sender, so waiters observe a closed channel instead of sitting out their
/// wait timeout, and the next caller for the fingerprint executes for real.
struct FlightToken<'a> {
    cache: &'a ResultCache,
    fingerprint: String,
}

impl Drop for FlightToken<'_> {
    fn drop(&mut self) {
        self.cache
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.fingerprint);
    }
}

/// Bounded TTL cache with single-flight execution per fingerprint.
pub struct ResultCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    // sync mutex: held only for map lookups, and FlightToken::drop needs it
    // outside async context
    in_flight: StdMutex<HashMap<String, broadcast::Sender<Outcome>>>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: StdMutex::new(HashMap::new()),
        }
    }

    /// Serve a fresh cached value, join an in-flight execution as a waiter,
    /// or run `compute` as the primary and publish its outcome.
    ///
    /// `wait_timeout` bounds how long a waiter blocks on the primary; no
    /// caller blocks indefinitely.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &str,
        ttl: Duration,
        wait_timeout: Duration,
        compute: F,
    ) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        if let Some(hit) = self.lookup(fingerprint).await {
            debug!(fingerprint, "result cache hit");
            return Ok(hit);
        }

        let role = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(fingerprint) {
                Some(tx) => Role::Waiter(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    in_flight.insert(fingerprint.to_string(), tx.clone());
                    Role::Primary(
                        FlightToken {
                            cache: self,
                            fingerprint: fingerprint.to_string(),
                        },
                        tx,
                    )
                }
            }
        };

        match role {
            Role::Primary(token, tx) => {
                let outcome = compute().await;

                if let Ok(result) = &outcome {
                    let mut entries = self.entries.lock().await;
                    entries.put(
                        fingerprint.to_string(),
                        CacheEntry {
                            value: result.clone(),
                            created_at: Instant::now(),
                            ttl,
                        },
                    );
                }

                // Deregister before publishing so a caller arriving now takes
                // the cached value instead of subscribing to a channel that
                // has already fired.
                drop(token);

                // No waiters is the common case; send failure is fine then.
                let _ = tx.send(outcome.clone());
                outcome
            }
            Role::Waiter(mut rx) => {
                debug!(fingerprint, "joining in-flight execution");
                match tokio::time::timeout(wait_timeout, rx.recv()).await {
                    Ok(Ok(outcome)) => outcome.map(|mut result| {
                        // the waiter shared the primary's execution
                        result.cache_hit = true;
                        result
                    }),
                    Ok(Err(_)) => Err(GatewayError::ConnectionFailure(
                        "in-flight execution was dropped before publishing".into(),
                    )),
                    Err(_) => Err(GatewayError::QueryTimeout {
                        timeout_ms: wait_timeout.as_millis() as u64,
                    }),
                }
            }
        }
    }

    /// Fresh cached value for a fingerprint, if any. Expired entries are
    /// evicted on the spot.
    pub async fn lookup(&self, fingerprint: &str) -> Option<ExecutionResult> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(fingerprint) {
            Some(entry) => {
                if entry.created_at.elapsed() < entry.ttl {
                    let mut value = entry.value.clone();
                    value.cache_hit = true;
                    return Some(value);
                }
                true
            }
            None => false,
        };
        if expired {
            entries.pop(fingerprint);
        }
        None
    }

    /// Drop all cached results.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}
