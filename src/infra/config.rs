//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::{NewSector, PlacementStrategy};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Deployment identifier used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "parking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    /// Sector selections attempted before giving up with "no available place"
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Retries of a version-checked write (place release, reservation update)
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_max_commit_retries() -> u32 {
    16
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), max_commit_retries: default_max_commit_retries() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reservations older than this are force-ended
    #[serde(default = "default_max_reservation_hours")]
    pub max_reservation_hours: u64,
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_sweep_initial_delay")]
    pub initial_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_reservation_hours() -> u64 {
    24
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_sweep_initial_delay() -> u64 {
    60
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_reservation_hours: default_max_reservation_hours(),
            interval_secs: default_sweep_interval(),
            initial_delay_secs: default_sweep_initial_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// File path for lifecycle notices (JSONL format)
    #[serde(default = "default_audit_file")]
    pub file: String,
    /// Notice channel capacity; notices beyond it are dropped and counted
    #[serde(default = "default_audit_buffer")]
    pub buffer: usize,
}

fn default_audit_file() -> String {
    "parking-events.jsonl".to_string()
}

fn default_audit_buffer() -> usize {
    1024
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true, file: default_audit_file(), buffer: default_audit_buffer() }
    }
}

/// A facility to create at startup
#[derive(Debug, Clone, Deserialize)]
pub struct FacilityConfig {
    pub city: String,
    pub zip_code: String,
    pub street: String,
    #[serde(default)]
    pub strategy: PlacementStrategy,
    #[serde(default)]
    pub sectors: Vec<NewSector>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub facilities: Vec<FacilityConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    max_allocation_attempts: u32,
    max_commit_retries: u32,
    sweeper_enabled: bool,
    max_reservation_hours: u64,
    sweep_interval_secs: u64,
    sweep_initial_delay_secs: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    audit_enabled: bool,
    audit_file: String,
    audit_buffer: usize,
    facilities: Vec<FacilityConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            max_allocation_attempts: default_max_attempts(),
            max_commit_retries: default_max_commit_retries(),
            sweeper_enabled: true,
            max_reservation_hours: default_max_reservation_hours(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_initial_delay_secs: default_sweep_initial_delay(),
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
            audit_enabled: true,
            audit_file: default_audit_file(),
            audit_buffer: default_audit_buffer(),
            facilities: Vec::new(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            max_allocation_attempts: toml_config.allocation.max_attempts.max(1),
            max_commit_retries: toml_config.allocation.max_commit_retries.max(1),
            sweeper_enabled: toml_config.sweeper.enabled,
            max_reservation_hours: toml_config.sweeper.max_reservation_hours,
            sweep_interval_secs: toml_config.sweeper.interval_secs.max(1),
            sweep_initial_delay_secs: toml_config.sweeper.initial_delay_secs,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            prometheus_port: toml_config.metrics.prometheus_port,
            audit_enabled: toml_config.audit.enabled,
            audit_file: toml_config.audit.file,
            audit_buffer: toml_config.audit.buffer.max(1),
            facilities: toml_config.facilities,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from the path resolved out of `args`
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn max_allocation_attempts(&self) -> u32 {
        self.max_allocation_attempts
    }

    pub fn max_commit_retries(&self) -> u32 {
        self.max_commit_retries
    }

    pub fn sweeper_enabled(&self) -> bool {
        self.sweeper_enabled
    }

    pub fn max_reservation_hours(&self) -> u64 {
        self.max_reservation_hours
    }

    /// Maximum reservation lifetime before the sweep force-ends it
    pub fn max_reservation_duration(&self) -> chrono::Duration {
        let hours = i64::try_from(self.max_reservation_hours).unwrap_or(i64::MAX / 3600);
        chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs
    }

    pub fn sweep_initial_delay_secs(&self) -> u64 {
        self.sweep_initial_delay_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn audit_enabled(&self) -> bool {
        self.audit_enabled
    }

    pub fn audit_file(&self) -> &str {
        &self.audit_file
    }

    pub fn audit_buffer(&self) -> usize {
        self.audit_buffer
    }

    pub fn facilities(&self) -> &[FacilityConfig] {
        &self.facilities
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the allocation retry bound
    pub fn with_max_allocation_attempts(mut self, attempts: u32) -> Self {
        self.max_allocation_attempts = attempts.max(1);
        self
    }

    /// Builder method for tests to set the commit retry bound
    pub fn with_max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries.max(1);
        self
    }

    /// Builder method for tests to set the maximum reservation lifetime
    pub fn with_max_reservation_hours(mut self, hours: u64) -> Self {
        self.max_reservation_hours = hours;
        self
    }
}
