//! Guide tracker - GPS session tracking for a location-triggered audio guide
//!
//! Ingests per-session location samples, emits geofence events, answers
//! nearby/route queries and summarizes movement.
//!
//! Module structure:
//! - `domain/` - Value types, geometry, route objects, errors
//! - `services/` - PointIndex, GeofenceEngine, TrackRecorder, MovementAnalyzer,
//!   RouteOptimizer, SessionCoordinator
//! - `io/` - HTTP facade, catalog loading, event egress
//! - `infra/` - Config, Metrics, Clock

use anyhow::Context;
use clap::Parser;
use guide_tracker::infra::{Clock, Config, Metrics, SystemClock};
use guide_tracker::io::{create_egress_channel, start_http_server, AppState, CatalogLoader, Egress};
use guide_tracker::services::{PointIndex, SessionCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Guide tracker - location-triggered audio guide backend
#[derive(Parser, Debug)]
#[command(name = "guide-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-sample visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let version = format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    info!(version = %version, "guide_tracker_starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        catalog_source = %config.catalog_source(),
        catalog_refresh_secs = %config.catalog_refresh_secs(),
        max_samples = %config.max_samples(),
        retention_minutes = %config.retention_minutes(),
        idle_timeout_minutes = %config.idle_timeout_minutes(),
        hysteresis_factor = %config.hysteresis_factor(),
        server_port = %config.server_port(),
        egress_enabled = %config.egress_enabled(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());
    let index =
        Arc::new(PointIndex::new().with_walking_pace(config.walking_meters_per_minute()));

    // Initial catalog load; the service still starts if it fails
    let loader = CatalogLoader::new(config.catalog_source(), config.catalog_timeout_ms())
        .context("failed to build catalog loader")?;
    if let Err(e) = loader.refresh(&index, &metrics, clock.now_ms()).await {
        warn!(error = %e, "catalog_initial_load_failed");
    }

    let mut coordinator =
        SessionCoordinator::new(&config, index.clone(), clock.clone(), metrics.clone());

    if config.egress_enabled() {
        let (sender, rx) =
            create_egress_channel(config.egress_channel_capacity(), metrics.clone());
        let egress = Egress::new(config.egress_file());
        info!(file = %egress.file_path(), "egress_writer_started");
        tokio::spawn(egress.run(rx));
        coordinator = coordinator.with_egress(sender);
    }
    let coordinator = Arc::new(coordinator);

    // Periodic catalog refresh
    tokio::spawn(loader.run(
        index.clone(),
        metrics.clone(),
        clock.clone(),
        Duration::from_secs(config.catalog_refresh_secs().max(1)),
        shutdown_rx.clone(),
    ));

    // Idle session eviction
    tokio::spawn(coordinator.clone().run_idle_eviction(
        Duration::from_secs(config.eviction_interval_secs().max(1)),
        shutdown_rx.clone(),
    ));

    // Metrics reporter (lock-free reads with full summary)
    let reporter = coordinator.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary =
                reporter.metrics().report(reporter.session_count(), reporter.index().len());
            summary.log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let port = config.server_port();
    if port > 0 {
        let addr: SocketAddr = format!("{}:{}", config.bind_address(), port)
            .parse()
            .with_context(|| format!("invalid bind address {}", config.bind_address()))?;
        let state = Arc::new(AppState {
            coordinator: coordinator.clone(),
            site_id: config.site_id().to_string(),
            version,
        });
        start_http_server(addr, state, shutdown_rx).await?;
    } else {
        info!("http_server_disabled");
        let mut shutdown = shutdown_rx;
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    }

    info!(sessions = %coordinator.session_count(), "guide_tracker_shutdown_complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so the CONFIG_FILE mutations never race
    #[test]
    fn test_config_path_resolution() {
        std::env::set_var("CONFIG_FILE", "config/prod.toml");
        let args = Args::try_parse_from(["guide-tracker", "--config", "config/staging.toml"]).unwrap();
        assert_eq!(args.config, "config/staging.toml");

        let args = Args::try_parse_from(["guide-tracker"]).unwrap();
        assert_eq!(args.config, "config/prod.toml");

        std::env::remove_var("CONFIG_FILE");
        let args = Args::try_parse_from(["guide-tracker"]).unwrap();
        assert_eq!(args.config, "config/dev.toml");
    }
}
