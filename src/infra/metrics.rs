//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::route::RouteStatus;
use crate::domain::types::GeofenceEventType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Samples accepted by ingest (monotonic)
    samples_total: AtomicU64,
    /// Samples accepted since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Samples rejected as invalid or out of order (monotonic)
    samples_rejected: AtomicU64,
    /// Sum of ingest latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max ingest latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Ingest latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Geofence events emitted by type (monotonic)
    enter_events: AtomicU64,
    exit_events: AtomicU64,
    dwell_events: AtomicU64,
    /// Route requests by outcome (monotonic)
    routes_complete: AtomicU64,
    routes_partial: AtomicU64,
    routes_infeasible: AtomicU64,
    routes_empty: AtomicU64,
    /// Routes cut short by the wall-clock compute budget (monotonic)
    routes_budget_exceeded: AtomicU64,
    /// Session lifecycle (monotonic)
    sessions_created: AtomicU64,
    sessions_evicted: AtomicU64,
    /// Second writer observed on a session mid-ingest (monotonic)
    writer_contention: AtomicU64,
    /// Catalog refresh outcomes (monotonic)
    catalog_refresh_ok: AtomicU64,
    catalog_refresh_failed: AtomicU64,
    /// Events dropped because the egress channel was full (monotonic)
    egress_dropped: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            enter_events: AtomicU64::new(0),
            exit_events: AtomicU64::new(0),
            dwell_events: AtomicU64::new(0),
            routes_complete: AtomicU64::new(0),
            routes_partial: AtomicU64::new(0),
            routes_infeasible: AtomicU64::new(0),
            routes_empty: AtomicU64::new(0),
            routes_budget_exceeded: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            writer_contention: AtomicU64::new(0),
            catalog_refresh_ok: AtomicU64::new(0),
            catalog_refresh_failed: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an accepted sample with its ingest latency (lock-free)
    #[inline]
    pub fn record_sample_ingested(&self, latency_us: u64) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_sample_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_geofence_event(&self, event_type: GeofenceEventType) {
        let counter = match event_type {
            GeofenceEventType::Enter => &self.enter_events,
            GeofenceEventType::Exit => &self.exit_events,
            GeofenceEventType::Dwell => &self.dwell_events,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_route(&self, status: RouteStatus, budget_exceeded: bool) {
        let counter = match status {
            RouteStatus::Complete => &self.routes_complete,
            RouteStatus::Partial => &self.routes_partial,
            RouteStatus::Infeasible => &self.routes_infeasible,
            RouteStatus::Empty => &self.routes_empty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if budget_exceeded {
            self.routes_budget_exceeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sessions_evicted(&self, count: u64) {
        self.sessions_evicted.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_writer_contention(&self) {
        self.writer_contention.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_catalog_refresh(&self, ok: bool) {
        if ok {
            self.catalog_refresh_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.catalog_refresh_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn samples_rejected(&self) -> u64 {
        self.samples_rejected.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_total(&self, event_type: GeofenceEventType) -> u64 {
        match event_type {
            GeofenceEventType::Enter => self.enter_events.load(Ordering::Relaxed),
            GeofenceEventType::Exit => self.exit_events.load(Ordering::Relaxed),
            GeofenceEventType::Dwell => self.dwell_events.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn sessions_evicted(&self) -> u64 {
        self.sessions_evicted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn egress_dropped(&self) -> u64 {
        self.egress_dropped.load(Ordering::Relaxed)
    }

    /// Generate a metrics report and reset the windowed counters
    ///
    /// Only the periodic reporter should call this; scrapes use `snapshot`.
    pub fn report(&self, active_sessions: usize, catalog_size: usize) -> MetricsSummary {
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let window = Window {
            samples: self.samples_since_report.swap(0, Ordering::Relaxed),
            latency_sum_us: self.latency_sum_us.swap(0, Ordering::Relaxed),
            latency_max_us: self.latency_max_us.swap(0, Ordering::Relaxed),
            buckets: swap_buckets(&self.latency_buckets),
            elapsed_secs: elapsed.as_secs_f64(),
        };
        self.summarize(window, active_sessions, catalog_size)
    }

    /// Same summary as `report` over the current window, without resetting it
    pub fn snapshot(&self, active_sessions: usize, catalog_size: usize) -> MetricsSummary {
        let window = Window {
            samples: self.samples_since_report.load(Ordering::Relaxed),
            latency_sum_us: self.latency_sum_us.load(Ordering::Relaxed),
            latency_max_us: self.latency_max_us.load(Ordering::Relaxed),
            buckets: load_buckets(&self.latency_buckets),
            elapsed_secs: self.last_report_time.lock().elapsed().as_secs_f64(),
        };
        self.summarize(window, active_sessions, catalog_size)
    }

    fn summarize(&self, window: Window, active_sessions: usize, catalog_size: usize) -> MetricsSummary {
        let samples_per_sec =
            if window.elapsed_secs > 0.0 { window.samples as f64 / window.elapsed_secs } else { 0.0 };
        let avg_latency = if window.samples > 0 { window.latency_sum_us / window.samples } else { 0 };
        let lat_buckets = window.buckets;

        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            samples_per_sec,
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            avg_ingest_latency_us: avg_latency,
            max_ingest_latency_us: window.latency_max_us,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            enter_events: self.enter_events.load(Ordering::Relaxed),
            exit_events: self.exit_events.load(Ordering::Relaxed),
            dwell_events: self.dwell_events.load(Ordering::Relaxed),
            routes_complete: self.routes_complete.load(Ordering::Relaxed),
            routes_partial: self.routes_partial.load(Ordering::Relaxed),
            routes_infeasible: self.routes_infeasible.load(Ordering::Relaxed),
            routes_empty: self.routes_empty.load(Ordering::Relaxed),
            routes_budget_exceeded: self.routes_budget_exceeded.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            writer_contention: self.writer_contention.load(Ordering::Relaxed),
            catalog_refresh_ok: self.catalog_refresh_ok.load(Ordering::Relaxed),
            catalog_refresh_failed: self.catalog_refresh_failed.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped.load(Ordering::Relaxed),
            active_sessions,
            catalog_size,
        }
    }
}

/// Windowed values taken by `report` or `snapshot`
struct Window {
    samples: u64,
    latency_sum_us: u64,
    latency_max_us: u64,
    buckets: [u64; NUM_BUCKETS],
    elapsed_secs: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub samples_rejected: u64,
    pub avg_ingest_latency_us: u64,
    pub max_ingest_latency_us: u64,
    /// Ingest latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub enter_events: u64,
    pub exit_events: u64,
    pub dwell_events: u64,
    pub routes_complete: u64,
    pub routes_partial: u64,
    pub routes_infeasible: u64,
    pub routes_empty: u64,
    pub routes_budget_exceeded: u64,
    pub sessions_created: u64,
    pub sessions_evicted: u64,
    pub writer_contention: u64,
    pub catalog_refresh_ok: u64,
    pub catalog_refresh_failed: u64,
    pub egress_dropped: u64,
    pub active_sessions: usize,
    pub catalog_size: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            rejected = %self.samples_rejected,
            avg_latency_us = %self.avg_ingest_latency_us,
            p99_us = %self.lat_p99_us,
            enter = %self.enter_events,
            exit = %self.exit_events,
            dwell = %self.dwell_events,
            active_sessions = %self.active_sessions,
            catalog_size = %self.catalog_size,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.samples_total(), 0);
        assert_eq!(metrics.samples_rejected(), 0);
    }

    #[test]
    fn test_record_sample() {
        let metrics = Metrics::new();

        metrics.record_sample_ingested(100);
        metrics.record_sample_ingested(300);
        metrics.record_sample_rejected();

        let summary = metrics.report(3, 10);
        assert_eq!(summary.samples_total, 2);
        assert_eq!(summary.samples_rejected, 1);
        assert_eq!(summary.avg_ingest_latency_us, 200);
        assert_eq!(summary.max_ingest_latency_us, 300);
        assert_eq!(summary.active_sessions, 3);
        assert_eq!(summary.catalog_size, 10);
    }

    #[test]
    fn test_report_resets_window() {
        let metrics = Metrics::new();
        metrics.record_sample_ingested(500);
        let first = metrics.report(0, 0);
        assert_eq!(first.lat_buckets.iter().sum::<u64>(), 1);

        let second = metrics.report(0, 0);
        assert_eq!(second.samples_total, 1);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 0);
        assert_eq!(second.max_ingest_latency_us, 0);
    }

    #[test]
    fn test_snapshot_leaves_window_for_reporter() {
        let metrics = Metrics::new();
        metrics.record_sample_ingested(150);
        metrics.record_sample_ingested(700);

        let scrape = metrics.snapshot(0, 0);
        let again = metrics.snapshot(0, 0);
        assert_eq!(scrape.lat_buckets.iter().sum::<u64>(), 2);
        assert_eq!(again.lat_buckets, scrape.lat_buckets);
        assert_eq!(again.max_ingest_latency_us, 700);

        let report = metrics.report(0, 0);
        assert_eq!(report.lat_buckets.iter().sum::<u64>(), 2);
        assert_eq!(report.avg_ingest_latency_us, 425);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(60_000), 10);
    }

    #[test]
    fn test_percentiles() {
        let mut buckets = [0u64; NUM_BUCKETS];
        buckets[0] = 90;
        buckets[5] = 10;
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 100);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 3200);
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.5), 0);
    }

    #[test]
    fn test_event_and_route_counters() {
        let metrics = Metrics::new();
        metrics.record_geofence_event(GeofenceEventType::Enter);
        metrics.record_geofence_event(GeofenceEventType::Enter);
        metrics.record_geofence_event(GeofenceEventType::Exit);
        metrics.record_route(RouteStatus::Partial, true);
        metrics.record_route(RouteStatus::Infeasible, false);

        assert_eq!(metrics.events_total(GeofenceEventType::Enter), 2);
        assert_eq!(metrics.events_total(GeofenceEventType::Exit), 1);
        assert_eq!(metrics.events_total(GeofenceEventType::Dwell), 0);

        let summary = metrics.report(0, 0);
        assert_eq!(summary.routes_partial, 1);
        assert_eq!(summary.routes_infeasible, 1);
        assert_eq!(summary.routes_budget_exceeded, 1);
    }
}
