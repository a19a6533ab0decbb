//! Capacity store - versioned persistence contract
//!
//! Every entity is loaded together with its version and written back with
//! `save(entity, expected_version)`. A save whose expected version does not
//! match the stored one fails with [`StoreError::Conflict`] and leaves the
//! stored entity untouched. A successful save bumps the version and returns
//! the entity as stored.
//!
//! - `memory` - thread-safe in-memory implementation

pub mod memory;

use crate::domain::{
    ClientId, Facility, FacilityId, ParkingEvent, Reservation, ReservationId, ReservationStatus,
    Sector, SectorId, Version,
};
use crate::error::StoreError;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

pub trait FacilityRepository: Send + Sync {
    fn insert_facility(&self, facility: Facility) -> Result<Facility, StoreError>;

    fn load_facility(&self, id: FacilityId) -> Result<Facility, StoreError>;

    fn all_facilities(&self) -> Vec<Facility>;
}

pub trait SectorRepository: Send + Sync {
    /// Insert a new sector. Fails with `AlreadyExists` if the facility
    /// already has a sector with the same name.
    fn insert_sector(&self, sector: Sector) -> Result<Sector, StoreError>;

    fn load_sector(&self, id: SectorId) -> Result<Sector, StoreError>;

    /// All sectors of a facility, ordered by name
    fn sectors_in(&self, facility: FacilityId) -> Vec<Sector>;

    /// Compare-and-swap write of a sector
    fn save_sector(&self, sector: Sector, expected: Version) -> Result<Sector, StoreError>;

    /// Compare-and-swap delete of a sector
    fn delete_sector(&self, id: SectorId, expected: Version) -> Result<Sector, StoreError>;
}

pub trait ReservationRepository: Send + Sync {
    fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    fn load_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError>;

    /// Compare-and-swap write of a reservation
    fn save_reservation(
        &self,
        reservation: Reservation,
        expected: Version,
    ) -> Result<Reservation, StoreError>;

    fn find_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation>;
}

pub trait ParkingEventRepository: Send + Sync {
    fn append_event(&self, event: ParkingEvent);

    /// Events of one reservation in the order they were appended
    fn events_for(&self, reservation: ReservationId) -> Vec<ParkingEvent>;
}

/// Everything the allocator needs from persistence
pub trait ParkingStore:
    FacilityRepository + SectorRepository + ReservationRepository + ParkingEventRepository
{
}

impl<T> ParkingStore for T where
    T: FacilityRepository + SectorRepository + ReservationRepository + ParkingEventRepository
{
}

/// Predicate for reservation queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub sector: Option<SectorId>,
    pub client: Option<ClientId>,
    /// Only reservations whose `begin_time` is strictly before this instant
    pub begun_before: Option<DateTime<Utc>>,
}

impl ReservationFilter {
    pub fn active() -> Self {
        Self { status: Some(ReservationStatus::Active), ..Self::default() }
    }

    pub fn in_sector(mut self, sector: SectorId) -> Self {
        self.sector = Some(sector);
        self
    }

    pub fn for_client(mut self, client: &ClientId) -> Self {
        self.client = Some(client.clone());
        self
    }

    pub fn begun_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.begun_before = Some(cutoff);
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.status.map_or(true, |s| r.status() == s)
            && self.sector.map_or(true, |s| r.sector_id() == s)
            && self.client.as_ref().map_or(true, |c| r.client_id() == c)
            && self.begun_before.map_or(true, |t| r.begin_time() < t)
    }
}
