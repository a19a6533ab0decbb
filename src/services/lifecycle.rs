//! Reservation lifecycle - creation, entry, exit, cancellation and expiry
//!
//! State machine:
//! ```text
//! (none) --create--> ACTIVE --end/expire--> ENDED
//!                      |
//!                      +------cancel------> CANCELLED
//! ```
//!
//! Capacity moves only through the [`CapacityTracker`]. Creation takes the
//! place first and then inserts the reservation; ending flips the
//! reservation to its terminal status first and only the writer that won
//! that flip releases the place. A concurrent second end therefore sees a
//! terminal reservation and touches no capacity.

use crate::domain::{
    ClientId, ClientTier, EndReason, FacilityId, ParkingEvent, ParkingEventType, Reservation,
    ReservationId, Sector, SectorId,
};
use crate::error::{reservation_err, sector_err, ParkingError, StoreError};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::allocator::SectorAllocator;
use crate::services::capacity::CapacityTracker;
use crate::services::notifier::{NoopNotifier, NoticeKind, Notifier, ReservationNotice};
use crate::store::{ParkingStore, ReservationFilter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Errors after which allocation selects a sector again
#[inline]
fn lost_allocation_race(e: &ParkingError) -> bool {
    matches!(
        e,
        ParkingError::Conflict(_) | ParkingError::CapacityExhausted(_) | ParkingError::UnknownSector(_)
    )
}

pub struct ReservationLifecycle {
    store: Arc<dyn ParkingStore>,
    allocator: SectorAllocator,
    tracker: CapacityTracker,
    notifier: Arc<dyn Notifier>,
    metrics: Option<Arc<Metrics>>,
    max_attempts: u32,
    max_commit_retries: u32,
}

impl ReservationLifecycle {
    pub fn new(store: Arc<dyn ParkingStore>, config: &Config) -> Self {
        Self {
            allocator: SectorAllocator::new(store.clone()),
            tracker: CapacityTracker::new(store.clone()),
            store,
            notifier: Arc::new(NoopNotifier),
            metrics: None,
            max_attempts: config.max_allocation_attempts().max(1),
            max_commit_retries: config.max_commit_retries().max(1),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn allocator(&self) -> &SectorAllocator {
        &self.allocator
    }

    /// Place a new reservation for `client_id` in `facility`.
    ///
    /// Selection and the capacity commit are retried together when another
    /// writer wins the race for the chosen sector. A lost race only counts
    /// against `max_attempts` when the sector's occupancy did not rise, so a
    /// caller outpaced by competing bookings keeps going while places remain.
    /// Once the budget is spent the request fails with `NoAvailablePlace`.
    pub fn create_reservation(
        &self,
        facility: FacilityId,
        tier: ClientTier,
        client_id: &ClientId,
        at: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut charged = 0u32;

        loop {
            attempt += 1;

            let sector = match self.allocator.select_sector(facility, tier, at) {
                Ok(sector) => sector,
                Err(e @ ParkingError::NoAvailablePlace { .. }) => {
                    if let Some(ref m) = self.metrics {
                        m.record_no_place();
                    }
                    info!(
                        facility_id = %facility,
                        tier = %tier,
                        client_id = %client_id,
                        attempt = %attempt,
                        "reservation_rejected_no_place"
                    );
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            match self.tracker.try_increment(sector.id(), sector.version()) {
                Ok(taken) => {
                    return self.insert_reservation(&taken, tier, client_id, at, started);
                }
                Err(e) if lost_allocation_race(&e) => {
                    if let Some(ref m) = self.metrics {
                        m.record_allocation_conflict();
                    }
                    let outpaced = self.place_taken_since(&sector);
                    if !outpaced {
                        charged += 1;
                    }
                    if charged >= self.max_attempts {
                        if let Some(ref m) = self.metrics {
                            m.record_no_place();
                        }
                        warn!(
                            facility_id = %facility,
                            tier = %tier,
                            client_id = %client_id,
                            attempts = %attempt,
                            "allocation_retries_exhausted"
                        );
                        return Err(ParkingError::NoAvailablePlace { facility, tier });
                    }
                    debug!(
                        facility_id = %facility,
                        sector = %sector.name(),
                        attempt = %attempt,
                        charged = %charged,
                        outpaced = %outpaced,
                        reason = %e.code(),
                        "allocation_conflict_retry"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether another booking took a place in `seen`'s sector after it was read
    fn place_taken_since(&self, seen: &Sector) -> bool {
        self.store
            .load_sector(seen.id())
            .map(|current| current.occupied_places() > seen.occupied_places())
            .unwrap_or(false)
    }

    fn insert_reservation(
        &self,
        sector: &Sector,
        tier: ClientTier,
        client_id: &ClientId,
        at: DateTime<Utc>,
        started: Instant,
    ) -> Result<Reservation, ParkingError> {
        let reservation =
            Reservation::new(sector.facility_id(), sector.id(), client_id.clone(), tier, at);
        let reservation_id = reservation.id();

        let stored = match self.store.insert_reservation(reservation) {
            Ok(stored) => stored,
            Err(e) => {
                // Give the place back so occupancy keeps matching active reservations
                if let Some(ref m) = self.metrics {
                    m.record_compensation();
                }
                if let Err(release) = self.release_place(sector.id()) {
                    error!(
                        sector_id = %sector.id(),
                        reservation_id = %reservation_id,
                        error = %release,
                        "compensation_failed"
                    );
                }
                return Err(reservation_err(reservation_id)(e));
            }
        };

        let latency_us = started.elapsed().as_micros() as u64;
        if let Some(ref m) = self.metrics {
            m.record_reservation_created(latency_us);
        }
        info!(
            reservation_id = %stored.id(),
            facility_id = %stored.facility_id(),
            sector = %sector.name(),
            client_id = %client_id,
            tier = %tier,
            occupied = %sector.occupied_places(),
            max = %sector.max_places(),
            latency_us = %latency_us,
            "reservation_created"
        );
        self.notifier.notify(ReservationNotice::new(NoticeKind::Created, &stored, at));
        Ok(stored)
    }

    /// Record the client's entry. Fails if the reservation is not active or
    /// has already entered.
    pub fn enter_parking(
        &self,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        let mut attempt = 0u32;
        let entered = loop {
            attempt += 1;
            let current = self.load_active(id)?;
            if current.entered_at().is_some() {
                return Err(ParkingError::AlreadyEntered(id));
            }

            let expected = current.version();
            let mut next = current;
            next.mark_entered(at);
            match self.store.save_reservation(next, expected) {
                Ok(stored) => break stored,
                Err(e @ StoreError::Conflict { .. }) if attempt < self.max_commit_retries => {
                    self.note_commit_retry(&e);
                }
                Err(e) => return Err(reservation_err(id)(e)),
            }
        };

        self.store.append_event(ParkingEvent::new(&entered, ParkingEventType::Entry, at));
        if let Some(ref m) = self.metrics {
            m.record_entry();
        }
        info!(reservation_id = %id, sector_id = %entered.sector_id(), "parking_entered");
        self.notifier.notify(ReservationNotice::new(NoticeKind::Entered, &entered, at));
        Ok(entered)
    }

    /// End a reservation on client exit
    pub fn end_reservation(
        &self,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        self.finish(id, EndReason::Exit, at)
    }

    /// Cancel a reservation. Releases capacity exactly like an end.
    pub fn cancel_reservation(
        &self,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        self.finish(id, EndReason::Cancelled, at)
    }

    /// Force-end an overdue reservation
    pub fn expire_reservation(
        &self,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        self.finish(id, EndReason::Expired, at)
    }

    fn finish(
        &self,
        id: ReservationId,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        let mut attempt = 0u32;
        let finished = loop {
            attempt += 1;
            let current = self.load_active(id)?;
            let expected = current.version();
            let mut next = current;
            next.finish(reason, at);
            match self.store.save_reservation(next, expected) {
                Ok(stored) => break stored,
                Err(e @ StoreError::Conflict { .. }) if attempt < self.max_commit_retries => {
                    // Re-read: a concurrent end shows up as a terminal status
                    self.note_commit_retry(&e);
                }
                Err(e) => return Err(reservation_err(id)(e)),
            }
        };

        let sector = match self.release_place(finished.sector_id()) {
            Ok(sector) => sector,
            Err(e) => {
                self.reopen(&finished);
                warn!(
                    reservation_id = %id,
                    sector_id = %finished.sector_id(),
                    reason = %reason.as_str(),
                    error = %e,
                    "reservation_release_failed"
                );
                return Err(e);
            }
        };

        if reason == EndReason::Exit {
            self.store.append_event(ParkingEvent::new(&finished, ParkingEventType::Exit, at));
        }
        if let Some(ref m) = self.metrics {
            m.record_reservation_finished(reason);
        }
        info!(
            reservation_id = %id,
            sector = %sector.name(),
            reason = %reason.as_str(),
            status = %finished.status(),
            occupied = %sector.occupied_places(),
            "reservation_finished"
        );
        self.notifier.notify(ReservationNotice::new(NoticeKind::from(reason), &finished, at));
        Ok(finished)
    }

    /// Load a reservation and require it to be active
    fn load_active(&self, id: ReservationId) -> Result<Reservation, ParkingError> {
        let reservation = self.store.load_reservation(id).map_err(reservation_err(id))?;
        if !reservation.is_active() {
            return Err(ParkingError::ReservationNotActive { id, status: reservation.status() });
        }
        Ok(reservation)
    }

    /// Decrement `sector_id`, re-reading on version conflicts
    fn release_place(&self, sector_id: SectorId) -> Result<Sector, ParkingError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let sector = self.store.load_sector(sector_id).map_err(sector_err(sector_id))?;
            match self.tracker.try_decrement(sector_id, sector.version()) {
                Ok(released) => return Ok(released),
                Err(ParkingError::Conflict(e)) if attempt < self.max_commit_retries => {
                    self.note_commit_retry(&e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Put a finished reservation back to active after its place could not
    /// be released
    fn reopen(&self, finished: &Reservation) {
        let mut reopened = finished.clone();
        reopened.reopen();
        if let Err(e) = self.store.save_reservation(reopened, finished.version()) {
            error!(reservation_id = %finished.id(), error = %e, "reservation_reopen_failed");
        }
    }

    fn note_commit_retry(&self, e: &StoreError) {
        if let Some(ref m) = self.metrics {
            m.record_commit_retry();
        }
        debug!(error = %e, "commit_conflict_retry");
    }

    pub fn reservation(&self, id: ReservationId) -> Result<Reservation, ParkingError> {
        self.store.load_reservation(id).map_err(reservation_err(id))
    }

    /// Reservations of a client, newest first
    pub fn client_reservations(&self, client_id: &ClientId, active_only: bool) -> Vec<Reservation> {
        let filter = if active_only {
            ReservationFilter::active().for_client(client_id)
        } else {
            ReservationFilter::default().for_client(client_id)
        };
        let mut found = self.store.find_reservations(&filter);
        found.reverse();
        found
    }

    /// Entry/exit events of a reservation in the order they happened
    pub fn parking_events(&self, id: ReservationId) -> Result<Vec<ParkingEvent>, ParkingError> {
        self.store.load_reservation(id).map_err(reservation_err(id))?;
        Ok(self.store.events_for(id))
    }
}
