//! Prometheus metrics for monitoring
//!
//! Counters, gauges, and histograms rendered in Prometheus text format,
//! exposed by the binary's /metrics endpoint.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    /// Create with default latency buckets
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(
            name,
            help,
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
        )
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &'static str, help: &'static str, bounds: &[f64]) -> Self {
        let buckets = bounds.iter().map(|&b| (b, AtomicU64::new(0))).collect();
        Self {
            buckets,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Observe a value in seconds
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);
        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );
        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }
        let sum_secs = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!(
            "{}_count {}\n",
            self.name,
            self.count.load(Ordering::Relaxed)
        ));
        output
    }
}

/// Standard distributor metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static HEARTBEATS_RECEIVED: Counter = Counter::new(
        "keel_heartbeats_received_total",
        "Total heartbeat requests processed",
    );

    pub static HEARTBEATS_THROTTLED: Counter = Counter::new(
        "keel_heartbeats_throttled_total",
        "Heartbeats answered from the rate-gated fast path without a write",
    );

    pub static METRIC_CONFLICTS_SWALLOWED: Counter = Counter::new(
        "keel_metric_conflicts_swallowed_total",
        "Version conflicts on shard metric writes, deferred to the next heartbeat",
    );

    pub static REBALANCE_TICKS: Counter = Counter::new(
        "keel_rebalance_ticks_total",
        "Completed reconciliation ticks",
    );

    pub static REBALANCE_CONFLICTS: Counter = Counter::new(
        "keel_rebalance_conflicts_total",
        "Reconciliation ticks aborted by a version conflict",
    );

    pub static SHARDS_ASSIGNED: Counter = Counter::new(
        "keel_shards_assigned_total",
        "Unassigned shards placed onto executors",
    );

    pub static SHARDS_STOLEN: Counter = Counter::new(
        "keel_shards_stolen_total",
        "Shards moved to idle executors",
    );

    pub static ACTIVE_EXECUTORS: Gauge = Gauge::new(
        "keel_active_executors",
        "Executors with a fresh ACTIVE heartbeat at the last tick",
    );

    pub static UNASSIGNED_SHARDS: Gauge = Gauge::new(
        "keel_unassigned_shards",
        "Catalog shards without an owner at the last tick",
    );

    pub static REBALANCE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new(
            "keel_rebalance_duration_seconds",
            "Wall-clock time spent per reconciliation tick",
        )
    });
}

/// Render all standard metrics in Prometheus text format
pub fn gather_system_metrics() -> String {
    let mut output = String::new();
    output.push_str(&standard::HEARTBEATS_RECEIVED.to_prometheus());
    output.push_str(&standard::HEARTBEATS_THROTTLED.to_prometheus());
    output.push_str(&standard::METRIC_CONFLICTS_SWALLOWED.to_prometheus());
    output.push_str(&standard::REBALANCE_TICKS.to_prometheus());
    output.push_str(&standard::REBALANCE_CONFLICTS.to_prometheus());
    output.push_str(&standard::SHARDS_ASSIGNED.to_prometheus());
    output.push_str(&standard::SHARDS_STOLEN.to_prometheus());
    output.push_str(&standard::ACTIVE_EXECUTORS.to_prometheus());
    output.push_str(&standard::UNASSIGNED_SHARDS.to_prometheus());
    output.push_str(&standard::REBALANCE_DURATION.to_prometheus());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(10);
        assert_eq!(gauge.get(), 10);
        gauge.set(-3);
        assert_eq!(gauge.get(), -3);
    }

    #[test]
    fn test_histogram_renders_count() {
        let histogram = Histogram::new("test_histogram", "Test histogram");
        histogram.observe(0.002);
        histogram.observe(0.2);
        let rendered = histogram.to_prometheus();
        assert!(rendered.contains("test_histogram_count 2"));
    }
}
