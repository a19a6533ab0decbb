//! Sweep scheduler - runs the expiry sweep on a fixed interval
//!
//! Waits `initial_delay` after startup, then sweeps every `interval`. The
//! sweep itself is synchronous and runs on the blocking pool. A run that
//! overshoots the interval delays the next tick rather than overlapping it.

use crate::infra::config::Config;
use crate::services::sweeper::ExpirySweeper;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub struct SweepScheduler {
    sweeper: Arc<ExpirySweeper>,
    max_duration: chrono::Duration,
    initial_delay: Duration,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(
        sweeper: Arc<ExpirySweeper>,
        max_duration: chrono::Duration,
        initial_delay: Duration,
        interval: Duration,
    ) -> Self {
        Self { sweeper, max_duration, initial_delay, interval }
    }

    pub fn from_config(sweeper: Arc<ExpirySweeper>, config: &Config) -> Self {
        Self::new(
            sweeper,
            config.max_reservation_duration(),
            Duration::from_secs(config.sweep_initial_delay_secs()),
            Duration::from_secs(config.sweep_interval_secs()),
        )
    }

    /// Sweep until shutdown is signalled. Returns the number of runs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            initial_delay_secs = %self.initial_delay.as_secs(),
            interval_secs = %self.interval.as_secs(),
            max_duration_hours = %self.max_duration.num_hours(),
            "sweep_scheduler_started"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.initial_delay) => {}
            _ = shutdown.changed() => {
                info!(runs = 0, "sweep_scheduler_stopped");
                return 0;
            }
        }

        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sweeper = self.sweeper.clone();
                    let max_duration = self.max_duration;
                    match tokio::task::spawn_blocking(move || sweeper.sweep(Utc::now(), max_duration)).await {
                        Ok(_) => runs += 1,
                        Err(e) => error!(error = %e, "sweep_task_failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(runs = %runs, "sweep_scheduler_stopped");
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, ClientId, ClientTier, NewSector, PlacementStrategy, SectorType};
    use crate::services::admin::SectorAdmin;
    use crate::services::lifecycle::ReservationLifecycle;
    use crate::store::{MemoryStore, SectorRepository};

    #[tokio::test]
    async fn test_scheduler_sweeps_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let admin = SectorAdmin::new(store.clone());
        let facility = admin
            .create_facility(Address::new("Lodz", "90-003", "Wolczanska"), PlacementStrategy::LeastOccupied)
            .unwrap();
        let sector = admin
            .add_sector(facility.id(), NewSector::new("UC1", SectorType::Uncovered, 2, 1), Utc::now())
            .unwrap();
        let lifecycle = Arc::new(ReservationLifecycle::new(store.clone(), &Config::default()));
        lifecycle
            .create_reservation(
                facility.id(),
                ClientTier::Basic,
                &ClientId::new("c"),
                Utc::now() - chrono::Duration::hours(48),
            )
            .unwrap();

        let sweeper = Arc::new(ExpirySweeper::new(store.clone(), lifecycle));
        let scheduler = SweepScheduler::new(
            sweeper,
            chrono::Duration::hours(24),
            Duration::ZERO,
            Duration::from_millis(10),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(true).unwrap();

        let runs = handle.await.unwrap();
        assert!(runs >= 1);
        assert_eq!(store.load_sector(sector.id()).unwrap().occupied_places(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_during_initial_delay() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = Arc::new(ReservationLifecycle::new(store.clone(), &Config::default()));
        let sweeper = Arc::new(ExpirySweeper::new(store, lifecycle));
        let scheduler = SweepScheduler::from_config(sweeper, &Config::default());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
