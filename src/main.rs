//! Parking sector allocator daemon
//!
//! Seeds facilities from configuration, then runs the background side of
//! the allocator: the periodic expiry sweep, the audit log writer, the
//! metrics reporter and the Prometheus endpoint.
//!
//! Module structure:
//! - `domain/` - Facilities, sectors, reservations, tiers
//! - `store/` - Versioned repositories (compare-and-swap contract)
//! - `services/` - Allocation, lifecycle, sweep, administration
//! - `io/` - Audit log, Prometheus endpoint
//! - `infra/` - Configuration, metrics

use clap::Parser;
use sector_allocator::domain::Address;
use sector_allocator::infra::{Config, Metrics};
use sector_allocator::io::prometheus::start_metrics_server;
use sector_allocator::io::AuditLog;
use sector_allocator::services::{
    create_audit_worker, ExpirySweeper, Notifier, OccupancyQuery, ReservationLifecycle,
    SectorAdmin, SweepScheduler,
};
use sector_allocator::store::{MemoryStore, ParkingStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking sector allocator - capacity allocation and reservation expiry
#[derive(Parser, Debug)]
#[command(name = "sector-allocator", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

/// Create the facilities and sectors listed in the config
fn seed_facilities(admin: &SectorAdmin, config: &Config) {
    let now = chrono::Utc::now();
    for fc in config.facilities() {
        let facility = match admin
            .create_facility(Address::new(&fc.city, &fc.zip_code, &fc.street), fc.strategy)
        {
            Ok(facility) => facility,
            Err(e) => {
                error!(city = %fc.city, street = %fc.street, error = %e, "facility_seed_failed");
                continue;
            }
        };
        for sector in &fc.sectors {
            if let Err(e) = admin.add_sector(facility.id(), sector.clone(), now) {
                warn!(
                    facility_id = %facility.id(),
                    sector = %sector.name,
                    error = %e,
                    "sector_seed_failed"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-attempt allocation detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "sector-allocator starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        max_attempts = %config.max_allocation_attempts(),
        max_commit_retries = %config.max_commit_retries(),
        sweeper_enabled = %config.sweeper_enabled(),
        max_reservation_hours = %config.max_reservation_hours(),
        sweep_interval_secs = %config.sweep_interval_secs(),
        facilities = %config.facilities().len(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store: Arc<dyn ParkingStore> = Arc::new(MemoryStore::new());
    let metrics = Arc::new(Metrics::new());
    let admin = SectorAdmin::new(store.clone());
    let occupancy = Arc::new(OccupancyQuery::new(store.clone()));

    seed_facilities(&admin, &config);

    // Audit log writer (notices leave the lifecycle through a bounded channel)
    let mut lifecycle = ReservationLifecycle::new(store.clone(), &config).with_metrics(metrics.clone());
    let audit_handle = if config.audit_enabled() {
        let (notifier, worker) = create_audit_worker(
            AuditLog::new(config.audit_file()),
            metrics.clone(),
            config.audit_buffer(),
        );
        let notifier: Arc<dyn Notifier> = Arc::new(notifier);
        lifecycle = lifecycle.with_notifier(notifier);
        Some(tokio::spawn(worker.run()))
    } else {
        None
    };
    let lifecycle = Arc::new(lifecycle);

    // Expiry sweep
    let sweeper = Arc::new(
        ExpirySweeper::new(store.clone(), lifecycle.clone()).with_metrics(metrics.clone()),
    );
    let sweep_handle = if config.sweeper_enabled() {
        let scheduler = SweepScheduler::from_config(sweeper, &config);
        Some(tokio::spawn(scheduler.run(shutdown_rx.clone())))
    } else {
        info!("sweeper_disabled");
        drop(sweeper);
        None
    };

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_occupancy = occupancy.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_occupancy,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let report_metrics = metrics.clone();
    let report_occupancy = occupancy.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut report_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let occupied: u64 = report_occupancy
                        .all_occupancy(false)
                        .iter()
                        .map(|f| f.occupied_places())
                        .sum();
                    report_metrics.report(report_occupancy.active_reservations(), occupied).log();
                }
                _ = report_shutdown.changed() => break,
            }
        }
    });

    info!(facilities = %occupancy.all_occupancy(false).len(), "allocator_ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    if let Some(handle) = sweep_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "sweep_scheduler_join_failed");
        }
    }

    // Dropping the last lifecycle handle closes the notice channel
    drop(lifecycle);
    if let Some(handle) = audit_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "audit_worker_join_failed");
        }
    }

    info!("sector-allocator shutdown complete");
    Ok(())
}
