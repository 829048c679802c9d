//! Configuration loading from TOML files
//!
//! The binaries pick the file (`--config`, then `CONFIG_FILE`, then
//! `config/dev.toml`) and hand the path to `Config::load_from_path`.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Label attached to exported metrics
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "guide".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// HTTP facade port (0 to disable)
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// File path or http(s) URL of the POI catalog JSON
    #[serde(default = "default_catalog_source")]
    pub source: String,
    #[serde(default = "default_catalog_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_catalog_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: default_catalog_source(),
            refresh_secs: default_catalog_refresh_secs(),
            timeout_ms: default_catalog_timeout_ms(),
        }
    }
}

fn default_catalog_source() -> String {
    "data/catalog.json".to_string()
}

fn default_catalog_refresh_secs() -> u64 {
    300
}

fn default_catalog_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            retention_minutes: default_retention_minutes(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

fn default_max_samples() -> usize {
    200
}

fn default_retention_minutes() -> u64 {
    30
}

fn default_idle_timeout_minutes() -> u64 {
    15
}

fn default_eviction_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceSection {
    /// Exit radius = fence radius * factor
    #[serde(default = "default_hysteresis_factor")]
    pub hysteresis_factor: f64,
}

impl Default for GeofenceSection {
    fn default() -> Self {
        Self { hysteresis_factor: default_hysteresis_factor() }
    }
}

fn default_hysteresis_factor() -> f64 {
    1.1
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovementSection {
    /// Samples used for pattern classification (3..=5)
    #[serde(default = "default_movement_window")]
    pub window: usize,
}

impl Default for MovementSection {
    fn default() -> Self {
        Self { window: default_movement_window() }
    }
}

fn default_movement_window() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteSection {
    #[serde(default = "default_walking_meters_per_minute")]
    pub walking_meters_per_minute: f64,
    #[serde(default = "default_compute_budget_base_ms")]
    pub compute_budget_base_ms: u64,
    #[serde(default = "default_compute_budget_per_candidate_ms")]
    pub compute_budget_per_candidate_ms: u64,
    #[serde(default = "default_compute_budget_max_ms")]
    pub compute_budget_max_ms: u64,
    #[serde(default = "default_two_opt")]
    pub two_opt: bool,
}

impl Default for RouteSection {
    fn default() -> Self {
        Self {
            walking_meters_per_minute: default_walking_meters_per_minute(),
            compute_budget_base_ms: default_compute_budget_base_ms(),
            compute_budget_per_candidate_ms: default_compute_budget_per_candidate_ms(),
            compute_budget_max_ms: default_compute_budget_max_ms(),
            two_opt: default_two_opt(),
        }
    }
}

fn default_walking_meters_per_minute() -> f64 {
    83.0
}

fn default_compute_budget_base_ms() -> u64 {
    50
}

fn default_compute_budget_per_candidate_ms() -> u64 {
    2
}

fn default_compute_budget_max_ms() -> u64 {
    500
}

fn default_two_opt() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
    /// File path for geofence event egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
    #[serde(default = "default_egress_capacity")]
    pub channel_capacity: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_egress_enabled(),
            file: default_egress_file(),
            channel_capacity: default_egress_capacity(),
        }
    }
}

fn default_egress_enabled() -> bool {
    true
}

fn default_egress_file() -> String {
    "geofence_events.jsonl".to_string()
}

fn default_egress_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub geofence: GeofenceSection,
    #[serde(default)]
    pub movement: MovementSection,
    #[serde(default)]
    pub route: RouteSection,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    server_port: u16,
    catalog_source: String,
    catalog_refresh_secs: u64,
    catalog_timeout_ms: u64,
    max_samples: usize,
    retention_minutes: u64,
    idle_timeout_minutes: u64,
    eviction_interval_secs: u64,
    hysteresis_factor: f64,
    movement_window: usize,
    walking_meters_per_minute: f64,
    compute_budget_base_ms: u64,
    compute_budget_per_candidate_ms: u64,
    compute_budget_max_ms: u64,
    two_opt: bool,
    metrics_interval_secs: u64,
    egress_enabled: bool,
    egress_file: String,
    egress_channel_capacity: usize,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        let mut hysteresis_factor = toml_config.geofence.hysteresis_factor;
        if !hysteresis_factor.is_finite() || hysteresis_factor < 1.0 {
            warn!(hysteresis_factor = %hysteresis_factor, "hysteresis_factor_clamped");
            hysteresis_factor = 1.0;
        }

        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            server_port: toml_config.server.port,
            catalog_source: toml_config.catalog.source,
            catalog_refresh_secs: toml_config.catalog.refresh_secs.max(1),
            catalog_timeout_ms: toml_config.catalog.timeout_ms,
            max_samples: toml_config.session.max_samples.max(1),
            retention_minutes: toml_config.session.retention_minutes.max(1),
            idle_timeout_minutes: toml_config.session.idle_timeout_minutes,
            eviction_interval_secs: toml_config.session.eviction_interval_secs.max(1),
            hysteresis_factor,
            movement_window: toml_config.movement.window.clamp(3, 5),
            walking_meters_per_minute: toml_config.route.walking_meters_per_minute,
            compute_budget_base_ms: toml_config.route.compute_budget_base_ms,
            compute_budget_per_candidate_ms: toml_config.route.compute_budget_per_candidate_ms,
            compute_budget_max_ms: toml_config.route.compute_budget_max_ms,
            two_opt: toml_config.route.two_opt,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            egress_enabled: toml_config.egress.enabled,
            egress_file: toml_config.egress.file,
            egress_channel_capacity: toml_config.egress.channel_capacity.max(1),
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn catalog_source(&self) -> &str {
        &self.catalog_source
    }

    pub fn catalog_refresh_secs(&self) -> u64 {
        self.catalog_refresh_secs
    }

    pub fn catalog_timeout_ms(&self) -> u64 {
        self.catalog_timeout_ms
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn retention_minutes(&self) -> u64 {
        self.retention_minutes
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_minutes * 60_000
    }

    pub fn idle_timeout_minutes(&self) -> u64 {
        self.idle_timeout_minutes
    }

    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_minutes * 60_000
    }

    pub fn eviction_interval_secs(&self) -> u64 {
        self.eviction_interval_secs
    }

    pub fn hysteresis_factor(&self) -> f64 {
        self.hysteresis_factor
    }

    pub fn movement_window(&self) -> usize {
        self.movement_window
    }

    pub fn walking_meters_per_minute(&self) -> f64 {
        self.walking_meters_per_minute
    }

    pub fn compute_budget_base_ms(&self) -> u64 {
        self.compute_budget_base_ms
    }

    pub fn compute_budget_per_candidate_ms(&self) -> u64 {
        self.compute_budget_per_candidate_ms
    }

    pub fn compute_budget_max_ms(&self) -> u64 {
        self.compute_budget_max_ms
    }

    pub fn two_opt(&self) -> bool {
        self.two_opt
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn egress_channel_capacity(&self) -> usize {
        self.egress_channel_capacity
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to set the ring-buffer bounds
    pub fn with_retention(mut self, max_samples: usize, retention_minutes: u64) -> Self {
        self.max_samples = max_samples.max(1);
        self.retention_minutes = retention_minutes.max(1);
        self
    }

    /// Builder method to set the idle timeout
    pub fn with_idle_timeout_minutes(mut self, minutes: u64) -> Self {
        self.idle_timeout_minutes = minutes;
        self
    }

    /// Builder method to set the geofence hysteresis factor (clamped to >= 1.0)
    pub fn with_hysteresis_factor(mut self, factor: f64) -> Self {
        self.hysteresis_factor = factor.max(1.0);
        self
    }

    /// Builder method to toggle the 2-opt improvement pass
    pub fn with_two_opt(mut self, enabled: bool) -> Self {
        self.two_opt = enabled;
        self
    }

    /// Builder method to set the route compute budget
    pub fn with_compute_budget(mut self, base_ms: u64, per_candidate_ms: u64, max_ms: u64) -> Self {
        self.compute_budget_base_ms = base_ms;
        self.compute_budget_per_candidate_ms = per_candidate_ms;
        self.compute_budget_max_ms = max_ms;
        self
    }

    /// Builder method to set the catalog source
    pub fn with_catalog_source(mut self, source: &str) -> Self {
        self.catalog_source = source.to_string();
        self
    }
}
