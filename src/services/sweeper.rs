//! Expiry sweeper - force-ends reservations older than the allowed maximum
//!
//! Each overdue reservation is ended independently. A failure on one of
//! them is logged and reported, never propagated, so the rest of the batch
//! still gets processed. Running a sweep twice, or two sweeps at once, is
//! safe: a reservation already ended by the other run fails with
//! `ReservationNotActive` and leaves capacity alone.

use crate::domain::{Reservation, ReservationId};
use crate::error::ParkingError;
use crate::infra::metrics::Metrics;
use crate::services::lifecycle::ReservationLifecycle;
use crate::store::{ParkingStore, ReservationFilter};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SweepFailure {
    pub reservation_id: ReservationId,
    pub error: ParkingError,
}

/// Outcome of one sweep run
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    /// Reservations that began before this instant were candidates
    pub cutoff: DateTime<Utc>,
    pub ended: Vec<ReservationId>,
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn scanned(&self) -> usize {
        self.ended.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ExpirySweeper {
    store: Arc<dyn ParkingStore>,
    lifecycle: Arc<ReservationLifecycle>,
    metrics: Option<Arc<Metrics>>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn ParkingStore>, lifecycle: Arc<ReservationLifecycle>) -> Self {
        Self { store, lifecycle, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// End every active reservation with `begin_time + max_duration < now`
    pub fn sweep(&self, now: DateTime<Utc>, max_duration: Duration) -> SweepReport {
        let started = Instant::now();
        // Nothing begins before MIN_UTC, so an out-of-range cutoff sweeps nothing
        let cutoff = now.checked_sub_signed(max_duration).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self.store.find_reservations(&ReservationFilter::active().begun_before(cutoff));

        let report = self.end_batch(candidates, now, max_duration, cutoff);

        let duration_us = started.elapsed().as_micros() as u64;
        if let Some(ref m) = self.metrics {
            m.record_sweep(report.failed.len(), duration_us);
        }
        info!(
            cutoff = %cutoff,
            ended = %report.ended.len(),
            failed = %report.failed.len(),
            duration_us = %duration_us,
            "sweep_completed"
        );
        report
    }

    pub(crate) fn end_batch(
        &self,
        candidates: Vec<Reservation>,
        now: DateTime<Utc>,
        max_duration: Duration,
        cutoff: DateTime<Utc>,
    ) -> SweepReport {
        let mut report = SweepReport { cutoff, ended: Vec::new(), failed: Vec::new() };

        for reservation in candidates {
            let id = reservation.id();
            if !reservation.is_overdue(now, max_duration) {
                debug!(reservation_id = %id, begin_time = %reservation.begin_time(), "sweep_item_not_overdue");
                continue;
            }
            match self.lifecycle.expire_reservation(id, now) {
                Ok(_) => report.ended.push(id),
                Err(error) => {
                    warn!(
                        reservation_id = %id,
                        sector_id = %reservation.sector_id(),
                        begin_time = %reservation.begin_time(),
                        code = %error.code(),
                        error = %error,
                        "sweep_item_failed"
                    );
                    report.failed.push(SweepFailure { reservation_id: id, error });
                }
            }
        }

        report
    }
}
