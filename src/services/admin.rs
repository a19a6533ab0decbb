//! Facility and sector administration
//!
//! Every sector write is checked against the version the caller last saw.
//! A stale caller gets `Conflict` and has to re-read; nothing is merged.

use crate::domain::{Address, Facility, FacilityId, NewSector, PlacementStrategy, Sector, SectorId, Version};
use crate::error::{facility_err, sector_err, EntityKind, ParkingError, StoreError};
use crate::store::{ParkingStore, ReservationFilter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

pub struct SectorAdmin {
    store: Arc<dyn ParkingStore>,
}

impl SectorAdmin {
    pub fn new(store: Arc<dyn ParkingStore>) -> Self {
        Self { store }
    }

    pub fn create_facility(
        &self,
        address: Address,
        strategy: PlacementStrategy,
    ) -> Result<Facility, ParkingError> {
        let facility = Facility::new(address, strategy);
        let id = facility.id();
        let stored = self.store.insert_facility(facility).map_err(facility_err(id))?;
        info!(
            facility_id = %stored.id(),
            city = %stored.address().city,
            street = %stored.address().street,
            strategy = %stored.strategy().as_str(),
            "facility_created"
        );
        Ok(stored)
    }

    pub fn facility(&self, id: FacilityId) -> Result<Facility, ParkingError> {
        self.store.load_facility(id).map_err(facility_err(id))
    }

    pub fn sector(&self, id: SectorId) -> Result<Sector, ParkingError> {
        self.store.load_sector(id).map_err(sector_err(id))
    }

    /// Add an empty sector to `facility`. Names are unique per facility.
    pub fn add_sector(
        &self,
        facility: FacilityId,
        spec: NewSector,
        at: DateTime<Utc>,
    ) -> Result<Sector, ParkingError> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(ParkingError::EmptySectorName);
        }
        if spec.max_places == 0 {
            return Err(ParkingError::InvalidCapacity(spec.max_places));
        }
        self.store.load_facility(facility).map_err(facility_err(facility))?;

        let sector = Sector::new(facility, NewSector { name: name.clone(), ..spec }, at);
        let stored = self.store.insert_sector(sector).map_err(|e| match e {
            StoreError::AlreadyExists { .. } => ParkingError::DuplicateSectorName { facility, name },
            other => facility_err(facility)(other),
        })?;

        info!(
            facility_id = %facility,
            sector_id = %stored.id(),
            sector = %stored.name(),
            sector_type = %stored.sector_type(),
            max_places = %stored.max_places(),
            weight = %stored.weight(),
            "sector_added"
        );
        Ok(stored)
    }

    /// Remove a sector. Fails while any reservation still holds a place in it.
    pub fn remove_sector(&self, id: SectorId, expected: Version) -> Result<Sector, ParkingError> {
        let sector = self.load_expected(id, expected)?;

        let active = self.store.find_reservations(&ReservationFilter::active().in_sector(id)).len();
        if active > 0 || sector.occupied_places() > 0 {
            let active = u32::try_from(active).unwrap_or(u32::MAX).max(sector.occupied_places());
            return Err(ParkingError::SectorHasActiveReservations { sector: id, active });
        }

        // A reservation committed since the check bumped the version and fails this delete
        let removed = self.store.delete_sector(id, expected).map_err(sector_err(id))?;
        info!(
            facility_id = %removed.facility_id(),
            sector_id = %id,
            sector = %removed.name(),
            "sector_removed"
        );
        Ok(removed)
    }

    /// Change a sector's weight. Weight 0 takes the sector out of allocation.
    pub fn set_weight(
        &self,
        id: SectorId,
        weight: u32,
        expected: Version,
        at: DateTime<Utc>,
    ) -> Result<Sector, ParkingError> {
        let mut sector = self.load_expected(id, expected)?;
        let previous = sector.weight();
        sector.apply_weight(weight, at);
        let stored = self.store.save_sector(sector, expected).map_err(sector_err(id))?;

        info!(
            sector_id = %id,
            sector = %stored.name(),
            previous = %previous,
            weight = %weight,
            active = %stored.is_active(),
            "sector_weight_changed"
        );
        Ok(stored)
    }

    /// Change a sector's capacity. Cannot go below the places in use.
    pub fn resize_capacity(
        &self,
        id: SectorId,
        max_places: u32,
        expected: Version,
    ) -> Result<Sector, ParkingError> {
        if max_places == 0 {
            return Err(ParkingError::InvalidCapacity(max_places));
        }
        let mut sector = self.load_expected(id, expected)?;
        if max_places < sector.occupied_places() {
            return Err(ParkingError::CapacityBelowOccupancy {
                sector: id,
                requested: max_places,
                occupied: sector.occupied_places(),
            });
        }

        let previous = sector.max_places();
        sector.apply_max_places(max_places);
        let stored = self.store.save_sector(sector, expected).map_err(sector_err(id))?;

        info!(
            sector_id = %id,
            sector = %stored.name(),
            previous = %previous,
            max_places = %max_places,
            occupied = %stored.occupied_places(),
            "sector_resized"
        );
        Ok(stored)
    }

    fn load_expected(&self, id: SectorId, expected: Version) -> Result<Sector, ParkingError> {
        let sector = self.store.load_sector(id).map_err(sector_err(id))?;
        if sector.version() != expected {
            return Err(ParkingError::Conflict(StoreError::conflict(
                EntityKind::Sector,
                id,
                expected,
                sector.version(),
            )));
        }
        Ok(sector)
    }
}
