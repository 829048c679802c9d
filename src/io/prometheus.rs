//! Prometheus text exposition for tracker metrics
//!
//! Rendered on demand by `GET /metrics` on the HTTP facade.

use crate::infra::metrics::{MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write one counter family with a single label dimension
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    label: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format a metrics summary in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, site_id: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_ingest_metrics(&mut output, site_id, summary);
    write_latency_metrics(&mut output, site_id, summary);
    write_event_metrics(&mut output, site_id, summary);
    write_route_metrics(&mut output, site_id, summary);
    write_session_metrics(&mut output, site_id, summary);
    write_catalog_metrics(&mut output, site_id, summary);

    output
}

fn write_ingest_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "guide_samples_total",
        "Location samples accepted",
        MetricType::Counter,
        site,
        summary.samples_total,
    );
    write_metric(
        output,
        "guide_samples_rejected_total",
        "Location samples rejected at ingest",
        MetricType::Counter,
        site,
        summary.samples_rejected,
    );
    let _ = writeln!(output, "# HELP guide_samples_per_sec Samples accepted per second");
    let _ = writeln!(output, "# TYPE guide_samples_per_sec gauge");
    let _ = writeln!(output, "guide_samples_per_sec{{site=\"{site}\"}} {:.2}", summary.samples_per_sec);
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "guide_ingest_latency_us",
        "Ingest latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_ingest_latency_us,
    );
    write_metric(
        output,
        "guide_ingest_latency_p99_us",
        "99th percentile ingest latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
    write_metric(
        output,
        "guide_ingest_latency_max_us",
        "Maximum ingest latency since last report",
        MetricType::Gauge,
        site,
        summary.max_ingest_latency_us,
    );
}

fn write_event_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "guide_geofence_events_total",
        "Geofence events emitted",
        site,
        "type",
        &[
            ("enter", summary.enter_events),
            ("exit", summary.exit_events),
            ("dwell", summary.dwell_events),
        ],
    );
    write_metric(
        output,
        "guide_egress_dropped_total",
        "Events dropped because the egress channel was full",
        MetricType::Counter,
        site,
        summary.egress_dropped,
    );
}

fn write_route_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "guide_routes_total",
        "Route requests by outcome",
        site,
        "status",
        &[
            ("complete", summary.routes_complete),
            ("partial", summary.routes_partial),
            ("infeasible", summary.routes_infeasible),
            ("empty", summary.routes_empty),
        ],
    );
    write_metric(
        output,
        "guide_routes_budget_exceeded_total",
        "Routes cut short by the compute budget",
        MetricType::Counter,
        site,
        summary.routes_budget_exceeded,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "guide_active_sessions",
        "Sessions currently tracked",
        MetricType::Gauge,
        site,
        summary.active_sessions as u64,
    );
    write_metric(
        output,
        "guide_sessions_created_total",
        "Sessions created",
        MetricType::Counter,
        site,
        summary.sessions_created,
    );
    write_metric(
        output,
        "guide_sessions_evicted_total",
        "Sessions evicted",
        MetricType::Counter,
        site,
        summary.sessions_evicted,
    );
    write_metric(
        output,
        "guide_session_writer_contention_total",
        "Concurrent writers observed on one session",
        MetricType::Counter,
        site,
        summary.writer_contention,
    );
}

fn write_catalog_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "guide_catalog_size",
        "POIs in the current catalog snapshot",
        MetricType::Gauge,
        site,
        summary.catalog_size as u64,
    );
    write_labeled_counter(
        output,
        "guide_catalog_refresh_total",
        "Catalog refresh attempts by outcome",
        site,
        "result",
        &[("ok", summary.catalog_refresh_ok), ("failed", summary.catalog_refresh_failed)],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::GeofenceEventType;
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_sample_ingested(150);
        metrics.record_sample_ingested(250);
        metrics.record_geofence_event(GeofenceEventType::Enter);
        metrics.record_catalog_refresh(true);

        let output = format_prometheus_metrics(&metrics.report(5, 42), "abidjan");

        assert!(output.contains("guide_samples_total{site=\"abidjan\"} 2"));
        assert!(output.contains("guide_ingest_latency_us_bucket{site=\"abidjan\""));
        assert!(output.contains("guide_ingest_latency_us_count{site=\"abidjan\"} 2"));
        assert!(output.contains("guide_geofence_events_total{site=\"abidjan\",type=\"enter\"} 1"));
        assert!(output.contains("guide_active_sessions{site=\"abidjan\"} 5"));
        assert!(output.contains("guide_catalog_size{site=\"abidjan\"} 42"));
        assert!(output.contains("guide_catalog_refresh_total{site=\"abidjan\",result=\"ok\"} 1"));
    }
}
