//! Connection pool.
//!
//! A fixed maximum of simultaneously leased sessions, enforced by a
//! semaphore. Acquisition carries the admission timeout; a lease returns its
//! connection on every exit path via `Drop`, unless the holder discards it as
//! poisoned, in which case a replacement is created lazily on a later
//! acquire.

use crate::driver::{GraphConnection, GraphDriver};
use crate::error::{GatewayError, GatewayResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

struct PoolInner {
    driver: Arc<dyn GraphDriver>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn GraphConnection>>>,
    size: usize,
}

pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(driver: Arc<dyn GraphDriver>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                driver,
                permits: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(Vec::with_capacity(size)),
                size,
            }),
        }
    }

    /// Lease a connection, waiting at most `admission_timeout` for a slot.
    pub async fn acquire(&self, admission_timeout: Duration) -> GatewayResult<Lease> {
        let permit = match tokio::time::timeout(
            admission_timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(GatewayError::ConnectionFailure("pool closed".into()));
            }
            Err(_) => {
                warn!(
                    waited_ms = admission_timeout.as_millis() as u64,
                    "admission timeout elapsed with all sessions leased"
                );
                return Err(GatewayError::PoolExhausted {
                    waited_ms: admission_timeout.as_millis() as u64,
                });
            }
        };

        let reused = self
            .inner
            .idle
            .lock()
            .map_or(None, |mut idle| idle.pop());

        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!("opening new pooled connection");
                self.inner
                    .driver
                    .connect()
                    .await
                    .map_err(|e| GatewayError::ConnectionFailure(e.to_string()))?
            }
        };

        Ok(Lease {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Configured maximum of simultaneously leased sessions.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Slots currently free; equals `size()` when nothing is leased.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

/// Exclusive ownership of one pooled session for the duration of an
/// execution.
pub struct Lease {
    conn: Option<Box<dyn GraphConnection>>,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("has_conn", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl Lease {
    pub fn conn(&mut self) -> &mut dyn GraphConnection {
        // present from construction until discard(), which consumes the lease
        self.conn
            .as_deref_mut()
            .expect("lease holds a connection until discarded")
    }

    /// Drop the session instead of returning it to the pool. Used after a
    /// timeout, when the session state is unknown.
    pub fn discard(mut self) {
        warn!("discarding potentially poisoned connection");
        self.conn = None;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Ok(mut idle) = self.inner.idle.lock() {
                idle.push(conn);
            }
        }
    }
}
