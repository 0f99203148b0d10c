//! Admission control for container slots.
//!
//! A counting semaphore bounds how many containers exist at once. Permits
//! are RAII guards: dropping an [`AdmissionPermit`] is the only way to free
//! a slot, so each admitted request releases exactly once regardless of
//! which path it exits through.

use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

struct GateState {
    capacity: usize,
    in_use: AtomicUsize,
    metrics: Arc<dyn MetricsSink>,
}

impl GateState {
    fn publish(&self, in_use: usize) {
        self.metrics
            .set_occupancy(in_use, self.capacity.saturating_sub(in_use));
    }
}

/// Bounded pool of container slots.
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    state: Arc<GateState>,
}

impl AdmissionGate {
    /// Creates a gate with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; configuration validation rejects that
    /// before a gate is built.
    pub fn new(capacity: usize, metrics: Arc<dyn MetricsSink>) -> Self {
        assert!(capacity > 0, "admission gate needs at least one slot");
        let state = Arc::new(GateState {
            capacity,
            in_use: AtomicUsize::new(0),
            metrics,
        });
        state.publish(0);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            state,
        }
    }

    /// Waits up to `timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// [`Error::ConcurrencyExhausted`] if no slot frees up in time.
    pub async fn acquire(&self, timeout: Duration) -> Result<AdmissionPermit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(Error::Internal("admission gate closed".to_string()));
            }
            Err(_elapsed) => {
                warn!(
                    waited = ?timeout,
                    capacity = self.state.capacity,
                    "no compilation slot became available"
                );
                return Err(Error::ConcurrencyExhausted { waited: timeout });
            }
        };

        let in_use = self.state.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(in_use, capacity = self.state.capacity, "slot acquired");
        self.state.publish(in_use);

        Ok(AdmissionPermit {
            _permit: permit,
            state: Arc::clone(&self.state),
        })
    }

    /// Configured maximum.
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.state.in_use.load(Ordering::Acquire)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held container slot. Released on drop.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    state: Arc<GateState>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let in_use = self.state.in_use.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(in_use, capacity = self.state.capacity, "slot released");
        self.state.publish(in_use);
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish_non_exhaustive()
    }
}
