//! In-memory capacity store
//!
//! Each entity table sits behind its own `parking_lot::RwLock`. A
//! compare-and-swap save holds the table's write lock for the duration of
//! the version check and the write, so no reader ever observes a
//! half-applied mutation. Locks are never held across calls.

use super::{
    FacilityRepository, ParkingEventRepository, ReservationFilter, ReservationRepository,
    SectorRepository,
};
use crate::domain::{
    Facility, FacilityId, ParkingEvent, Reservation, ReservationId, Sector, SectorId, Version,
};
use crate::error::{EntityKind, StoreError};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct MemoryStore {
    facilities: RwLock<FxHashMap<FacilityId, Facility>>,
    sectors: RwLock<FxHashMap<SectorId, Sector>>,
    reservations: RwLock<FxHashMap<ReservationId, Reservation>>,
    events: RwLock<Vec<ParkingEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reservations in any status
    pub fn reservation_count(&self) -> usize {
        self.reservations.read().len()
    }
}

impl FacilityRepository for MemoryStore {
    fn insert_facility(&self, facility: Facility) -> Result<Facility, StoreError> {
        let mut facilities = self.facilities.write();
        if facilities.contains_key(&facility.id()) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Facility,
                id: facility.id().to_string(),
            });
        }
        let stored = facility.stamped(Version::INITIAL);
        facilities.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    fn load_facility(&self, id: FacilityId) -> Result<Facility, StoreError> {
        self.facilities
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Facility, id))
    }

    fn all_facilities(&self) -> Vec<Facility> {
        let mut all: Vec<Facility> = self.facilities.read().values().cloned().collect();
        all.sort_by(|a, b| {
            let (a, b) = (a.address(), b.address());
            (&a.city, &a.street, &a.zip_code).cmp(&(&b.city, &b.street, &b.zip_code))
        });
        all
    }
}

impl SectorRepository for MemoryStore {
    fn insert_sector(&self, sector: Sector) -> Result<Sector, StoreError> {
        let mut sectors = self.sectors.write();
        let name_taken = sectors
            .values()
            .any(|s| s.facility_id() == sector.facility_id() && s.name() == sector.name());
        if name_taken || sectors.contains_key(&sector.id()) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Sector,
                id: sector.name().to_string(),
            });
        }
        let stored = sector.stamped(Version::INITIAL);
        sectors.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    fn load_sector(&self, id: SectorId) -> Result<Sector, StoreError> {
        self.sectors
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Sector, id))
    }

    fn sectors_in(&self, facility: FacilityId) -> Vec<Sector> {
        let mut found: Vec<Sector> =
            self.sectors.read().values().filter(|s| s.facility_id() == facility).cloned().collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        found
    }

    fn save_sector(&self, sector: Sector, expected: Version) -> Result<Sector, StoreError> {
        let mut sectors = self.sectors.write();
        let current = sectors
            .get(&sector.id())
            .ok_or_else(|| StoreError::not_found(EntityKind::Sector, sector.id()))?;
        if current.version() != expected {
            return Err(StoreError::conflict(
                EntityKind::Sector,
                sector.id(),
                expected,
                current.version(),
            ));
        }
        let stored = sector.stamped(expected.next());
        sectors.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    fn delete_sector(&self, id: SectorId, expected: Version) -> Result<Sector, StoreError> {
        let mut sectors = self.sectors.write();
        let current =
            sectors.get(&id).ok_or_else(|| StoreError::not_found(EntityKind::Sector, id))?;
        if current.version() != expected {
            return Err(StoreError::conflict(EntityKind::Sector, id, expected, current.version()));
        }
        sectors.remove(&id).ok_or_else(|| StoreError::not_found(EntityKind::Sector, id))
    }
}

impl ReservationRepository for MemoryStore {
    fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let mut reservations = self.reservations.write();
        if reservations.contains_key(&reservation.id()) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Reservation,
                id: reservation.id().to_string(),
            });
        }
        let stored = reservation.stamped(Version::INITIAL);
        reservations.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    fn load_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.reservations
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Reservation, id))
    }

    fn save_reservation(
        &self,
        reservation: Reservation,
        expected: Version,
    ) -> Result<Reservation, StoreError> {
        let mut reservations = self.reservations.write();
        let current = reservations
            .get(&reservation.id())
            .ok_or_else(|| StoreError::not_found(EntityKind::Reservation, reservation.id()))?;
        if current.version() != expected {
            return Err(StoreError::conflict(
                EntityKind::Reservation,
                reservation.id(),
                expected,
                current.version(),
            ));
        }
        let stored = reservation.stamped(expected.next());
        reservations.insert(stored.id(), stored.clone());
        Ok(stored)
    }

    fn find_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let mut found: Vec<Reservation> =
            self.reservations.read().values().filter(|r| filter.matches(r)).cloned().collect();
        found.sort_by_key(|r| (r.begin_time(), r.id()));
        found
    }
}

impl ParkingEventRepository for MemoryStore {
    fn append_event(&self, event: ParkingEvent) {
        self.events.write().push(event);
    }

    fn events_for(&self, reservation: ReservationId) -> Vec<ParkingEvent> {
        self.events.read().iter().filter(|e| e.reservation_id == reservation).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, ClientId, ClientTier, NewSector, PlacementStrategy, SectorType};
    use chrono::Utc;
    use std::sync::Arc;
    use std::thread;

    fn store_with_sector() -> (MemoryStore, Sector) {
        let store = MemoryStore::new();
        let facility = store
            .insert_facility(Facility::new(
                Address::new("Lodz", "90-000", "Pomorska"),
                PlacementStrategy::LeastOccupied,
            ))
            .unwrap();
        let sector = store
            .insert_sector(Sector::new(
                facility.id(),
                NewSector::new("SA-01", SectorType::Covered, 10, 1),
                Utc::now(),
            ))
            .unwrap();
        (store, sector)
    }

    #[test]
    fn test_save_bumps_version() {
        let (store, sector) = store_with_sector();
        assert_eq!(sector.version(), Version(0));

        let saved = store.save_sector(sector.clone(), Version(0)).unwrap();
        assert_eq!(saved.version(), Version(1));
        assert_eq!(store.load_sector(sector.id()).unwrap().version(), Version(1));
    }

    #[test]
    fn test_stale_save_is_rejected_without_mutation() {
        let (store, sector) = store_with_sector();
        let mut first = sector.clone();
        first.occupy();
        store.save_sector(first, Version(0)).unwrap();

        let mut stale = sector.clone();
        stale.apply_max_places(99);
        let err = store.save_sector(stale, Version(0)).unwrap_err();
        assert_eq!(
            err,
            StoreError::conflict(EntityKind::Sector, sector.id(), Version(0), Version(1))
        );

        let stored = store.load_sector(sector.id()).unwrap();
        assert_eq!(stored.max_places(), 10);
        assert_eq!(stored.occupied_places(), 1);
    }

    #[test]
    fn test_duplicate_sector_name_rejected() {
        let (store, sector) = store_with_sector();
        let dup = Sector::new(
            sector.facility_id(),
            NewSector::new("SA-01", SectorType::Uncovered, 5, 1),
            Utc::now(),
        );
        assert!(matches!(store.insert_sector(dup), Err(StoreError::AlreadyExists { .. })));
    }

    #[test]
    fn test_delete_requires_current_version() {
        let (store, sector) = store_with_sector();
        assert!(matches!(
            store.delete_sector(sector.id(), Version(7)),
            Err(StoreError::Conflict { .. })
        ));
        store.delete_sector(sector.id(), Version(0)).unwrap();
        assert!(matches!(store.load_sector(sector.id()), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_concurrent_cas_single_winner() {
        let (store, sector) = store_with_sector();
        let store = Arc::new(store);
        let mut handles = vec![];

        for _ in 0..8 {
            let store = store.clone();
            let sector = sector.clone();
            handles.push(thread::spawn(move || {
                let mut s = sector;
                s.occupy();
                store.save_sector(s, Version(0)).is_ok()
            }));
        }

        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
        assert_eq!(wins, 1);
        assert_eq!(store.load_sector(sector.id()).unwrap().occupied_places(), 1);
    }

    #[test]
    fn test_find_reservations_sorted_by_begin_time() {
        let (store, sector) = store_with_sector();
        let now = Utc::now();
        for minutes in [30, 10, 20] {
            let r = Reservation::new(
                sector.facility_id(),
                sector.id(),
                ClientId::new("c"),
                ClientTier::Premium,
                now - chrono::Duration::minutes(minutes),
            );
            store.insert_reservation(r).unwrap();
        }

        let found = store.find_reservations(&ReservationFilter::active());
        assert_eq!(found.len(), 3);
        assert!(found.windows(2).all(|w| w[0].begin_time() <= w[1].begin_time()));
        assert_eq!(store.reservation_count(), 3);
    }
}
