//! Track Replay - offline replay of a recorded sample stream
//!
//! Feeds a JSONL file of location samples (one `LocationSample` per line)
//! through a SessionCoordinator driven by a manual clock, then prints a JSON
//! report with emitted events, movement pattern changes, hotspots and a path
//! prediction from the final position.
//!
//! Usage:
//!   track-replay --samples walk.jsonl --catalog data/catalog.json
//!   track-replay --samples walk.jsonl --catalog data/catalog.json --config config/dev.toml

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use guide_tracker::domain::{GeofenceEvent, LocationSample, MovementPattern, SessionId};
use guide_tracker::infra::{Config, ManualClock, Metrics};
use guide_tracker::io::parse_catalog;
use guide_tracker::services::{Hotspot, PathPrediction, PointIndex, SessionCoordinator};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Track Replay - run recorded samples through the tracking core
#[derive(Parser, Debug)]
#[command(name = "track-replay", version, about, long_about = None)]
struct Args {
    /// JSONL file with one location sample per line
    #[arg(short, long)]
    samples: String,

    /// POI catalog JSON file
    #[arg(short = 'k', long, default_value = "data/catalog.json")]
    catalog: String,

    /// Optional TOML configuration (retention, hysteresis, movement window)
    #[arg(short, long)]
    config: Option<String>,

    /// Session id to replay under; a fresh id when omitted
    #[arg(long)]
    session: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PatternChange {
    sequence: u64,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    at: Option<String>,
    pattern: MovementPattern,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayReport {
    session_id: SessionId,
    samples_read: usize,
    samples_accepted: usize,
    samples_rejected: usize,
    events: Vec<GeofenceEvent>,
    patterns: Vec<PatternChange>,
    hotspots: Vec<Hotspot>,
    prediction: PathPrediction,
}

fn rfc3339(timestamp_ms: u64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64).map(|dt| dt.to_rfc3339())
}

fn read_samples(path: &str) -> anyhow::Result<Vec<LocationSample>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read samples {path}"))?;

    let mut samples = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<LocationSample>(line) {
            Ok(sample) => samples.push(sample),
            Err(e) => warn!(line = %(line_no + 1), error = %e, "sample_line_skipped"),
        }
    }
    Ok(samples)
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays a clean JSON report
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::default(),
    };

    let catalog_json = std::fs::read_to_string(&args.catalog)
        .with_context(|| format!("failed to read catalog {}", args.catalog))?;
    let pois = parse_catalog(&catalog_json)?;
    let samples = read_samples(&args.samples)?;

    let start_ms = samples.first().map(|s| s.timestamp).unwrap_or_default();
    let clock = Arc::new(ManualClock::new(start_ms));
    let index = Arc::new(
        PointIndex::with_pois(pois, start_ms).with_walking_pace(config.walking_meters_per_minute()),
    );
    let coordinator =
        SessionCoordinator::new(&config, index.clone(), clock.clone(), Arc::new(Metrics::new()));

    let session_id = SessionId(args.session.unwrap_or_else(|| Uuid::now_v7().to_string()));
    info!(
        session_id = %session_id,
        samples = %samples.len(),
        pois = %index.len(),
        "replay_started"
    );

    let samples_read = samples.len();
    let mut accepted = 0usize;
    let mut events = Vec::new();
    let mut patterns: Vec<PatternChange> = Vec::new();

    for sample in samples {
        let timestamp = sample.timestamp;
        clock.set(timestamp);
        match coordinator.ingest(&session_id, sample) {
            Ok(outcome) => {
                accepted += 1;
                events.extend(outcome.events);
                if patterns.last().map(|p| p.pattern) != Some(outcome.movement_pattern) {
                    patterns.push(PatternChange {
                        sequence: outcome.sequence,
                        timestamp,
                        at: rfc3339(timestamp),
                        pattern: outcome.movement_pattern,
                    });
                }
            }
            Err(e) => warn!(timestamp = %timestamp, error = %e, "replay_sample_rejected"),
        }
    }

    // Unknown session only when nothing was accepted
    let hotspots = coordinator.hotspots(&session_id).unwrap_or_default();
    let prediction = coordinator.predict_path(&session_id, None).unwrap_or_default();

    let report = ReplayReport {
        session_id,
        samples_read,
        samples_accepted: accepted,
        samples_rejected: samples_read - accepted,
        events,
        patterns,
        hotspots,
        prediction,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
