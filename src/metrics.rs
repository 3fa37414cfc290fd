// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded metrics primitives.
//!
//! Counters and histograms are plain values owned by the client, server,
//! and pool. All of them are safe to update concurrently; snapshots are
//! not guaranteed to be point-in-time consistent across fields.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use crate::frame::FunctionCode;

/// A monotonically increasing atomic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Adds `delta` to the counter.
    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Resets the counter to zero.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// An atomic gauge accepting negative deltas.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    /// Adds `delta` to the gauge.
    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Resets the gauge to zero.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Upper bucket bounds of the latency histogram in milliseconds.
pub const LATENCY_BUCKET_BOUNDS_MS: [f64; 10] =
    [1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0];

/// Human readable labels matching [`LATENCY_BUCKET_BOUNDS_MS`].
pub const LATENCY_BUCKET_LABELS: [&str; 10] = [
    "1ms", "5ms", "10ms", "25ms", "50ms", "100ms", "250ms", "500ms", "1s", "5s+",
];

#[derive(Debug, Default)]
struct HistogramInner {
    buckets: [u64; 10],
    sum: f64,
    count: u64,
    min: Option<f64>,
    max: f64,
}

/// Tracks the latency distribution over fixed buckets.
///
/// Observations above the last bound are counted in the last bucket.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    inner: Mutex<HistogramInner>,
}

impl LatencyHistogram {
    /// Creates an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a latency observation.
    pub fn observe(&self, duration: Duration) {
        // Microsecond resolution, expressed as fractional milliseconds.
        let ms = duration.as_micros() as f64 / 1000.0;

        let mut inner = self.inner.lock().expect("histogram lock");
        inner.sum += ms;
        inner.count += 1;
        inner.min = Some(inner.min.map_or(ms, |min| min.min(ms)));
        if ms > inner.max {
            inner.max = ms;
        }

        let idx = LATENCY_BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKET_BOUNDS_MS.len() - 1);
        inner.buckets[idx] += 1;
    }

    /// Returns a snapshot of the histogram statistics.
    #[must_use]
    pub fn stats(&self) -> LatencyStats {
        let inner = self.inner.lock().expect("histogram lock");
        let avg = if inner.count > 0 {
            inner.sum / inner.count as f64
        } else {
            0.0
        };
        LatencyStats {
            count: inner.count,
            sum: inner.sum,
            avg,
            min: inner.min.unwrap_or(0.0),
            max: inner.max,
            buckets: inner.buckets,
        }
    }

    /// Resets the histogram.
    pub fn reset(&self) {
        *self.inner.lock().expect("histogram lock") = HistogramInner::default();
    }
}

/// A snapshot of histogram statistics, all latencies in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub buckets: [u64; 10],
}

/// Metrics of a single function code.
#[derive(Debug, Default)]
pub struct FunctionMetrics {
    pub requests: Counter,
    pub errors: Counter,
    pub latency: LatencyHistogram,
}

/// Client session metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: Counter,
    pub requests_success: Counter,
    pub requests_errors: Counter,
    pub reconnections: Counter,
    pub active_conns: Gauge,
    pub latency: LatencyHistogram,
    functions: RwLock<HashMap<FunctionCode, Arc<FunctionMetrics>>>,
}

impl Metrics {
    /// Creates an empty metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the metrics of a specific function code, creating them
    /// lazily on first access.
    #[must_use]
    pub fn for_function(&self, function: FunctionCode) -> Arc<FunctionMetrics> {
        if let Some(fm) = self
            .functions
            .read()
            .expect("function metrics lock")
            .get(&function)
        {
            return Arc::clone(fm);
        }
        let mut functions = self.functions.write().expect("function metrics lock");
        Arc::clone(
            functions
                .entry(function)
                .or_insert_with(|| Arc::new(FunctionMetrics::default())),
        )
    }

    /// Produces an unordered snapshot of all values.
    #[must_use]
    pub fn collect(&self) -> MetricsSnapshot {
        let functions = self
            .functions
            .read()
            .expect("function metrics lock")
            .iter()
            .map(|(function, fm)| {
                (
                    *function,
                    FunctionStats {
                        requests: fm.requests.value(),
                        errors: fm.errors.value(),
                        latency: fm.latency.stats(),
                    },
                )
            })
            .collect();
        MetricsSnapshot {
            requests_total: self.requests_total.value(),
            requests_success: self.requests_success.value(),
            requests_errors: self.requests_errors.value(),
            reconnections: self.reconnections.value(),
            active_conns: self.active_conns.value(),
            latency: self.latency.stats(),
            functions,
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        self.requests_total.reset();
        self.requests_success.reset();
        self.requests_errors.reset();
        self.reconnections.reset();
        self.active_conns.reset();
        self.latency.reset();
        for fm in self
            .functions
            .read()
            .expect("function metrics lock")
            .values()
        {
            fm.requests.reset();
            fm.errors.reset();
            fm.latency.reset();
        }
    }
}

/// Snapshot of per-function values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionStats {
    pub requests: u64,
    pub errors: u64,
    pub latency: LatencyStats,
}

/// Snapshot of all client metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_errors: u64,
    pub reconnections: u64,
    pub active_conns: i64,
    pub latency: LatencyStats,
    pub functions: HashMap<FunctionCode, FunctionStats>,
}

/// Server dispatch metrics.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub requests_total: Counter,
    pub requests_success: Counter,
    pub requests_errors: Counter,
    pub active_conns: Gauge,
    pub total_conns: Counter,
}

/// Connection pool metrics.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub gets: Counter,
    pub puts: Counter,
    pub hits: Counter,
    pub misses: Counter,
    pub timeouts: Counter,
    pub created: Counter,
    pub closed: Counter,
    pub available: Gauge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_and_gauge() {
        let counter = Counter::default();
        counter.inc();
        counter.add(2);
        assert_eq!(counter.value(), 3);
        counter.reset();
        assert_eq!(counter.value(), 0);

        let gauge = Gauge::default();
        gauge.add(2);
        gauge.add(-3);
        assert_eq!(gauge.value(), -1);
    }

    #[test]
    fn histogram_bucket_placement() {
        let histogram = LatencyHistogram::new();
        histogram.observe(Duration::from_micros(500)); // 0.5 ms -> first bucket
        histogram.observe(Duration::from_millis(3)); // second bucket
        histogram.observe(Duration::from_millis(800)); // 1 s bucket
        histogram.observe(Duration::from_secs(10)); // above all bounds

        let stats = histogram.stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.buckets[0], 1);
        assert_eq!(stats.buckets[1], 1);
        assert_eq!(stats.buckets[8], 1);
        assert_eq!(stats.buckets[9], 1);
    }

    #[test]
    fn histogram_min_max_avg() {
        let histogram = LatencyHistogram::new();
        assert_eq!(histogram.stats().min, 0.0);

        histogram.observe(Duration::from_millis(10));
        histogram.observe(Duration::from_millis(30));
        let stats = histogram.stats();
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.avg, 20.0);
        assert_eq!(stats.sum, 40.0);
    }

    #[test]
    fn histogram_microsecond_resolution() {
        let histogram = LatencyHistogram::new();
        histogram.observe(Duration::from_micros(1500));
        let stats = histogram.stats();
        assert_eq!(stats.sum, 1.5);
    }

    #[test]
    fn per_function_metrics_are_lazy() {
        let metrics = Metrics::new();
        assert!(metrics.collect().functions.is_empty());

        let fm = metrics.for_function(FunctionCode::ReadCoils);
        fm.requests.inc();
        let again = metrics.for_function(FunctionCode::ReadCoils);
        assert_eq!(again.requests.value(), 1);

        let snapshot = metrics.collect();
        assert_eq!(snapshot.functions.len(), 1);
        assert_eq!(
            snapshot.functions[&FunctionCode::ReadCoils].requests,
            1
        );
    }

    #[test]
    fn collect_snapshot() {
        let metrics = Metrics::new();
        metrics.requests_total.add(5);
        metrics.requests_success.add(4);
        metrics.requests_errors.inc();
        metrics.active_conns.add(1);
        let snapshot = metrics.collect();
        assert_eq!(snapshot.requests_total, 5);
        assert_eq!(snapshot.requests_success, 4);
        assert_eq!(snapshot.requests_errors, 1);
        assert_eq!(snapshot.active_conns, 1);

        metrics.reset();
        assert_eq!(metrics.collect().requests_total, 0);
    }
}
