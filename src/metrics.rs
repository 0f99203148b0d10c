//! Container lifecycle metrics.
//!
//! The engine reports through the narrow [`MetricsSink`] capability passed
//! at construction. [`InMemoryMetrics`] keeps atomic counters, a duration
//! histogram and the two occupancy gauges; [`NoopMetrics`] discards all.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Container lifecycle events counted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Created,
    Started,
    Completed,
    Failed,
    TimedOut,
    CleanedUp,
}

impl LifecycleEvent {
    /// All events, in lifecycle order.
    pub const ALL: [LifecycleEvent; 6] = [
        Self::Created,
        Self::Started,
        Self::Completed,
        Self::Failed,
        Self::TimedOut,
        Self::CleanedUp,
    ];

    /// Stable metric name.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Self::Created => "texrun.containers.created",
            Self::Started => "texrun.containers.started",
            Self::Completed => "texrun.containers.completed",
            Self::Failed => "texrun.containers.failed",
            Self::TimedOut => "texrun.containers.timeout",
            Self::CleanedUp => "texrun.containers.cleaned_up",
        }
    }
}

/// Metric name of the successful execution duration histogram.
pub const EXECUTION_DURATION_METRIC: &str = "texrun.containers.execution.duration";
/// Metric name of the in-use slots gauge.
pub const SLOTS_IN_USE_METRIC: &str = "texrun.containers.active";
/// Metric name of the free slots gauge.
pub const SLOTS_AVAILABLE_METRIC: &str = "texrun.containers.available";

/// Sink for engine metrics.
pub trait MetricsSink: Send + Sync {
    /// Counts one lifecycle event.
    fn record_event(&self, event: LifecycleEvent);

    /// Records the duration of a successful execution.
    fn record_execution(&self, duration: Duration);

    /// Mirrors admission gate occupancy.
    fn set_occupancy(&self, in_use: usize, available: usize);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_event(&self, _event: LifecycleEvent) {}
    fn record_execution(&self, _duration: Duration) {}
    fn set_occupancy(&self, _in_use: usize, _available: usize) {}
}

// =============================================================================
// In-Memory Metrics
// =============================================================================

/// Upper bounds (seconds) of the execution duration buckets.
pub const DURATION_BUCKETS: [f64; 10] = [0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0];

#[derive(Debug)]
struct Histogram {
    buckets: [AtomicU64; DURATION_BUCKETS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (bound, bucket) in DURATION_BUCKETS.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Atomic in-process metrics registry.
#[derive(Debug)]
pub struct InMemoryMetrics {
    events: [AtomicU64; LifecycleEvent::ALL.len()],
    executions: Histogram,
    in_use: AtomicU64,
    available: AtomicU64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self {
            events: std::array::from_fn(|_| AtomicU64::new(0)),
            executions: Histogram::new(),
            in_use: AtomicU64::new(0),
            available: AtomicU64::new(0),
        }
    }

    /// Current count for one event.
    pub fn count(&self, event: LifecycleEvent) -> u64 {
        self.events[event as usize].load(Ordering::Relaxed)
    }

    /// Current `(in_use, available)` gauges.
    pub fn occupancy(&self) -> (u64, u64) {
        (
            self.in_use.load(Ordering::Relaxed),
            self.available.load(Ordering::Relaxed),
        )
    }

    /// Point-in-time copy of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (in_use, available) = self.occupancy();
        MetricsSnapshot {
            created: self.count(LifecycleEvent::Created),
            started: self.count(LifecycleEvent::Started),
            completed: self.count(LifecycleEvent::Completed),
            failed: self.count(LifecycleEvent::Failed),
            timed_out: self.count(LifecycleEvent::TimedOut),
            cleaned_up: self.count(LifecycleEvent::CleanedUp),
            execution_count: self.executions.count.load(Ordering::Relaxed),
            execution_sum_micros: self.executions.sum_micros.load(Ordering::Relaxed),
            execution_buckets: DURATION_BUCKETS
                .iter()
                .zip(&self.executions.buckets)
                .map(|(le, count)| (*le, count.load(Ordering::Relaxed)))
                .collect(),
            in_use,
            available,
        }
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_event(&self, event: LifecycleEvent) {
        self.events[event as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn record_execution(&self, duration: Duration) {
        self.executions.observe(duration);
    }

    fn set_occupancy(&self, in_use: usize, available: usize) {
        self.in_use.store(in_use as u64, Ordering::Relaxed);
        self.available.store(available as u64, Ordering::Relaxed);
    }
}

/// Serializable copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cleaned_up: u64,
    pub execution_count: u64,
    pub execution_sum_micros: u64,
    /// `(upper bound in seconds, cumulative count)` pairs.
    pub execution_buckets: Vec<(f64, u64)>,
    pub in_use: u64,
    pub available: u64,
}

impl MetricsSnapshot {
    /// Count for one lifecycle event.
    pub fn event_count(&self, event: LifecycleEvent) -> u64 {
        match event {
            LifecycleEvent::Created => self.created,
            LifecycleEvent::Started => self.started,
            LifecycleEvent::Completed => self.completed,
            LifecycleEvent::Failed => self.failed,
            LifecycleEvent::TimedOut => self.timed_out,
            LifecycleEvent::CleanedUp => self.cleaned_up,
        }
    }

    /// Flat view keyed by stable metric name, for export.
    pub fn by_metric_name(&self) -> BTreeMap<String, u64> {
        let mut named: BTreeMap<String, u64> = LifecycleEvent::ALL
            .iter()
            .map(|event| (event.metric_name().to_string(), self.event_count(*event)))
            .collect();
        named.insert(format!("{EXECUTION_DURATION_METRIC}.count"), self.execution_count);
        named.insert(
            format!("{EXECUTION_DURATION_METRIC}.sum_micros"),
            self.execution_sum_micros,
        );
        for (le, count) in &self.execution_buckets {
            named.insert(format!("{EXECUTION_DURATION_METRIC}.le_{le}"), *count);
        }
        named.insert(SLOTS_IN_USE_METRIC.to_string(), self.in_use);
        named.insert(SLOTS_AVAILABLE_METRIC.to_string(), self.available);
        named
    }
}
