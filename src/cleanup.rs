//! # Container Cleanup
//!
//! Best-effort teardown of a request's container. Stop and remove are
//! attempted independently: a failed stop still leads to a forced remove.
//! Nothing here returns an error; failures are logged as
//! [`Error::CleanupFailure`] and left to operators.
//!
//! Every runtime call is bounded so a wedged daemon cannot hold a slot
//! forever: stop gets its grace period plus [`CLEANUP_CALL_SLACK`], remove
//! gets the slack alone.

use crate::classify::{FailureContext, RuntimeOperation, classify};
use crate::error::{Error, RuntimeError};
use crate::metrics::{LifecycleEvent, MetricsSink};
use crate::orchestrator::ContainerHandle;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Extra time allowed for a cleanup call beyond its own grace period.
pub const CLEANUP_CALL_SLACK: Duration = Duration::from_secs(10);

/// What teardown achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Container is no longer running.
    pub stopped: bool,
    /// Container no longer exists.
    pub removed: bool,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.stopped && self.removed
    }
}

/// Stops and removes containers.
#[derive(Clone)]
pub struct CleanupManager {
    runtime: Arc<dyn ContainerRuntime>,
    metrics: Arc<dyn MetricsSink>,
}

impl CleanupManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { runtime, metrics }
    }

    /// Stops the container with `grace`, then force-removes it.
    pub async fn cleanup(&self, handle: &ContainerHandle, grace: Duration) -> CleanupReport {
        let stopped = self.stop(&handle.id, grace).await;
        let removed = self.remove(&handle.id).await;
        let report = CleanupReport { stopped, removed };
        debug!(container = %handle.id, ?report, "cleanup finished");
        report
    }

    /// Force-removes a container by name or ID without stopping first.
    ///
    /// Used when creation failed and no handle exists; a missing container
    /// counts as removed.
    pub async fn discard(&self, name: &str) -> bool {
        self.remove(name).await
    }

    async fn stop(&self, id: &str, grace: Duration) -> bool {
        let call = self.runtime.stop(id, grace);
        match tokio::time::timeout(grace + CLEANUP_CALL_SLACK, call).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) if e.is_not_found() => true,
            Ok(Err(e)) => {
                self.report(RuntimeOperation::Stop, id, &e);
                false
            }
            Err(_elapsed) => {
                self.report(
                    RuntimeOperation::Stop,
                    id,
                    &RuntimeError::Timeout(format!("stop did not return within {grace:?} + slack")),
                );
                false
            }
        }
    }

    async fn remove(&self, id: &str) -> bool {
        match tokio::time::timeout(CLEANUP_CALL_SLACK, self.runtime.remove(id, true)).await {
            Ok(Ok(())) => {
                self.metrics.record_event(LifecycleEvent::CleanedUp);
                true
            }
            Ok(Err(e)) if e.is_not_found() => {
                debug!(container = id, "container already gone");
                true
            }
            Ok(Err(e)) => {
                self.report(RuntimeOperation::Remove, id, &e);
                false
            }
            Err(_elapsed) => {
                self.report(
                    RuntimeOperation::Remove,
                    id,
                    &RuntimeError::Timeout("remove did not return in time".to_string()),
                );
                false
            }
        }
    }

    fn report(&self, op: RuntimeOperation, id: &str, error: &RuntimeError) {
        let failure: Error = classify(
            op,
            error,
            &FailureContext {
                target: id,
                ..Default::default()
            },
        );
        warn!(container = id, error = %failure, "container cleanup step failed");
    }
}
