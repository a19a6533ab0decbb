//! Capacity tracker - the only writer of `occupied_places`
//!
//! Every change is a single version-checked write. A caller that lost a
//! race gets `Conflict` back and must re-read before trying again; the
//! tracker itself never retries.

use crate::domain::{Sector, SectorId, Version};
use crate::error::{sector_err, EntityKind, ParkingError, StoreError};
use crate::store::ParkingStore;
use std::sync::Arc;
use tracing::debug;

pub struct CapacityTracker {
    store: Arc<dyn ParkingStore>,
}

impl CapacityTracker {
    pub fn new(store: Arc<dyn ParkingStore>) -> Self {
        Self { store }
    }

    /// Take one place in `sector_id`, provided the sector is still at
    /// `expected` and not full. Returns the sector as stored.
    pub fn try_increment(&self, sector_id: SectorId, expected: Version) -> Result<Sector, ParkingError> {
        let sector = self.apply(sector_id, expected, |s| {
            if s.occupy() {
                Ok(())
            } else {
                Err(ParkingError::CapacityExhausted(sector_id))
            }
        })?;
        debug!(
            sector_id = %sector_id,
            occupied = %sector.occupied_places(),
            max = %sector.max_places(),
            version = %sector.version(),
            "place_taken"
        );
        Ok(sector)
    }

    /// Give back one place in `sector_id`, provided the sector is still at
    /// `expected` and has an occupied place. Returns the sector as stored.
    pub fn try_decrement(&self, sector_id: SectorId, expected: Version) -> Result<Sector, ParkingError> {
        let sector = self.apply(sector_id, expected, |s| {
            if s.release() {
                Ok(())
            } else {
                Err(ParkingError::SectorEmpty(sector_id))
            }
        })?;
        debug!(
            sector_id = %sector_id,
            occupied = %sector.occupied_places(),
            max = %sector.max_places(),
            version = %sector.version(),
            "place_released"
        );
        Ok(sector)
    }

    fn apply<F>(&self, sector_id: SectorId, expected: Version, change: F) -> Result<Sector, ParkingError>
    where
        F: FnOnce(&mut Sector) -> Result<(), ParkingError>,
    {
        let mut sector = self.store.load_sector(sector_id).map_err(sector_err(sector_id))?;
        if sector.version() != expected {
            return Err(ParkingError::Conflict(StoreError::conflict(
                EntityKind::Sector,
                sector_id,
                expected,
                sector.version(),
            )));
        }
        change(&mut sector)?;
        self.store.save_sector(sector, expected).map_err(sector_err(sector_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Facility, NewSector, PlacementStrategy, SectorType};
    use crate::store::{FacilityRepository, MemoryStore, SectorRepository};
    use chrono::Utc;
    use std::thread;

    fn setup(max: u32) -> (Arc<MemoryStore>, CapacityTracker, Sector) {
        let store = Arc::new(MemoryStore::new());
        let facility = store
            .insert_facility(Facility::new(
                Address::new("Lowicz", "99-400", "Zduny"),
                PlacementStrategy::LeastOccupied,
            ))
            .unwrap();
        let sector = store
            .insert_sector(Sector::new(
                facility.id(),
                NewSector::new("UN-01", SectorType::Uncovered, max, 1),
                Utc::now(),
            ))
            .unwrap();
        let tracker = CapacityTracker::new(store.clone());
        (store, tracker, sector)
    }

    #[test]
    fn test_increment_bumps_version() {
        let (_store, tracker, sector) = setup(2);
        let s = tracker.try_increment(sector.id(), sector.version()).unwrap();
        assert_eq!(s.occupied_places(), 1);
        assert_eq!(s.version(), sector.version().next());
    }

    #[test]
    fn test_increment_stale_version_conflicts() {
        let (store, tracker, sector) = setup(2);
        tracker.try_increment(sector.id(), sector.version()).unwrap();

        let err = tracker.try_increment(sector.id(), sector.version()).unwrap_err();
        assert!(matches!(err, ParkingError::Conflict(_)));
        assert_eq!(store.load_sector(sector.id()).unwrap().occupied_places(), 1);
    }

    #[test]
    fn test_increment_full_sector_exhausted() {
        let (store, tracker, sector) = setup(1);
        let s = tracker.try_increment(sector.id(), sector.version()).unwrap();

        let err = tracker.try_increment(sector.id(), s.version()).unwrap_err();
        assert_eq!(err, ParkingError::CapacityExhausted(sector.id()));
        assert_eq!(store.load_sector(sector.id()).unwrap().version(), s.version());
    }

    #[test]
    fn test_decrement_empty_sector() {
        let (_store, tracker, sector) = setup(1);
        let err = tracker.try_decrement(sector.id(), sector.version()).unwrap_err();
        assert_eq!(err, ParkingError::SectorEmpty(sector.id()));
    }

    #[test]
    fn test_increment_then_decrement() {
        let (_store, tracker, sector) = setup(3);
        let s = tracker.try_increment(sector.id(), sector.version()).unwrap();
        let s = tracker.try_decrement(sector.id(), s.version()).unwrap();
        assert_eq!(s.occupied_places(), 0);
        assert_eq!(s.version(), Version(2));
    }

    #[test]
    fn test_unknown_sector() {
        let (_store, tracker, _sector) = setup(1);
        let missing = SectorId::new();
        assert_eq!(
            tracker.try_increment(missing, Version::INITIAL).unwrap_err(),
            ParkingError::UnknownSector(missing)
        );
    }

    #[test]
    fn test_racing_increments_never_exceed_max() {
        let (store, tracker, sector) = setup(3);
        let tracker = Arc::new(tracker);
        let mut handles = vec![];

        for _ in 0..10 {
            let tracker = tracker.clone();
            let store = store.clone();
            let id = sector.id();
            handles.push(thread::spawn(move || loop {
                let current = store.load_sector(id).unwrap();
                match tracker.try_increment(id, current.version()) {
                    Ok(_) => return true,
                    Err(ParkingError::Conflict(_)) => continue,
                    Err(ParkingError::CapacityExhausted(_)) => return false,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }));
        }

        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
        assert_eq!(wins, 3);
        assert_eq!(store.load_sector(sector.id()).unwrap().occupied_places(), 3);
    }
}
