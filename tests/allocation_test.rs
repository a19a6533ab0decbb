//! Integration tests for allocation, lifecycle and sweep under concurrency

use chrono::{Duration, Utc};
use sector_allocator::domain::{
    Address, ClientId, ClientTier, Facility, FacilityId, NewSector, ParkingEvent,
    PlacementStrategy, Reservation, ReservationId, ReservationStatus, Sector, SectorId,
    SectorType, Version,
};
use sector_allocator::error::{ParkingError, StoreError};
use sector_allocator::infra::Config;
use sector_allocator::services::{ExpirySweeper, ReservationLifecycle, SectorAdmin};
use sector_allocator::store::{
    FacilityRepository, MemoryStore, ParkingEventRepository, ReservationFilter,
    ReservationRepository, SectorRepository,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

struct Harness {
    store: Arc<MemoryStore>,
    admin: SectorAdmin,
    lifecycle: Arc<ReservationLifecycle>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            admin: SectorAdmin::new(store.clone()),
            lifecycle: Arc::new(ReservationLifecycle::new(store.clone(), &Config::default())),
            store,
        }
    }

    fn facility(&self) -> FacilityId {
        self.admin
            .create_facility(
                Address::new("Lodz", "90-001", "Piotrkowska 1"),
                PlacementStrategy::LeastOccupied,
            )
            .unwrap()
            .id()
    }

    fn eligible(&self, facility: FacilityId, tier: ClientTier) -> BTreeSet<String> {
        self.lifecycle
            .allocator()
            .eligible_sectors(facility, tier)
            .unwrap()
            .into_iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// occupied_places must equal the number of active reservations per sector
    fn assert_consistent(&self, facility: FacilityId) {
        for sector in self.store.sectors_in(facility) {
            let active =
                self.store.find_reservations(&ReservationFilter::active().in_sector(sector.id())).len();
            assert_eq!(sector.occupied_places() as usize, active, "sector {}", sector.name());
            assert!(sector.occupied_places() <= sector.max_places());
        }
    }
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_reference_facility_tier_eligibility() {
    let h = Harness::new();
    let facility = h.facility();
    let now = Utc::now();

    // CO1 goes in first and is booked out while it is the only sector
    h.admin.add_sector(facility, NewSector::new("CO1", SectorType::Covered, 1, 1), now).unwrap();
    h.lifecycle
        .create_reservation(facility, ClientTier::Standard, &ClientId::new("early"), now)
        .unwrap();

    for (name, t, weight) in [
        ("UC1", SectorType::Uncovered, 0),
        ("UC2", SectorType::Uncovered, 1),
        ("UC3", SectorType::Uncovered, 1),
        ("UC4", SectorType::Uncovered, 1),
        ("CO2", SectorType::Covered, 1),
        ("UN1", SectorType::Underground, 0),
        ("UN2", SectorType::Underground, 1),
    ] {
        h.admin.add_sector(facility, NewSector::new(name, t, 10, weight), now).unwrap();
    }

    let basic = h.eligible(facility, ClientTier::Basic);
    let standard = h.eligible(facility, ClientTier::Standard);
    let premium = h.eligible(facility, ClientTier::Premium);

    assert_eq!(basic, names(&["UC2", "UC3", "UC4"]));
    assert_eq!(standard, names(&["UC2", "UC3", "UC4", "CO2"]));
    assert_eq!(premium, names(&["UC2", "UC3", "UC4", "CO2", "UN2"]));
    assert!(basic.is_subset(&standard));
    assert!(standard.is_subset(&premium));

    // All empty sectors tie on ratio and free places, so the name decides
    let chosen = h.lifecycle.allocator().select_sector(facility, ClientTier::Premium, now).unwrap();
    assert_eq!(chosen.name(), "CO2");
}

#[test]
fn test_least_occupied_spreads_reservations() {
    let h = Harness::new();
    let facility = h.facility();
    let now = Utc::now();
    h.admin.add_sector(facility, NewSector::new("A", SectorType::Uncovered, 4, 1), now).unwrap();
    h.admin.add_sector(facility, NewSector::new("B", SectorType::Uncovered, 2, 1), now).unwrap();

    let mut placed = Vec::new();
    for i in 0..6 {
        let r = h
            .lifecycle
            .create_reservation(facility, ClientTier::Basic, &ClientId::new(format!("c{i}")), now)
            .unwrap();
        placed.push(h.store.load_sector(r.sector_id()).unwrap().name().to_string());
    }

    // 2/4 and 1/2 tie on ratio; A wins it with more free places
    assert_eq!(placed, vec!["A", "B", "A", "A", "B", "A"]);
    h.assert_consistent(facility);
    assert!(matches!(
        h.lifecycle.create_reservation(facility, ClientTier::Basic, &ClientId::new("late"), now),
        Err(ParkingError::NoAvailablePlace { .. })
    ));
}

#[test]
fn test_no_overbooking_under_races() {
    // More free places than the default allocation attempt budget
    const FREE: usize = 12;
    const CALLERS: usize = 40;

    let h = Harness::new();
    let facility = h.facility();
    let sector = h
        .admin
        .add_sector(facility, NewSector::new("UC1", SectorType::Uncovered, FREE as u32, 1), Utc::now())
        .unwrap();

    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let lifecycle = h.lifecycle.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                lifecycle.create_reservation(
                    facility,
                    ClientTier::Premium,
                    &ClientId::new(format!("racer-{i}")),
                    Utc::now(),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ParkingError::NoAvailablePlace { .. })))
        .count();

    assert_eq!(successes, FREE);
    assert_eq!(rejected, CALLERS - FREE);
    let stored = h.store.load_sector(sector.id()).unwrap();
    assert_eq!(stored.occupied_places(), stored.max_places());
    h.assert_consistent(facility);
}

#[test]
fn test_races_across_sectors_fill_exactly() {
    let h = Harness::new();
    let facility = h.facility();
    let now = Utc::now();
    for name in ["UC1", "UC2"] {
        h.admin.add_sector(facility, NewSector::new(name, SectorType::Uncovered, 3, 1), now).unwrap();
    }

    let handles: Vec<_> = (0..24)
        .map(|i| {
            let lifecycle = h.lifecycle.clone();
            thread::spawn(move || {
                lifecycle
                    .create_reservation(facility, ClientTier::Basic, &ClientId::new(format!("c{i}")), now)
                    .is_ok()
            })
        })
        .collect();

    let successes = handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
    assert_eq!(successes, 6);
    h.assert_consistent(facility);
}

#[test]
fn test_concurrent_double_end_releases_once() {
    let h = Harness::new();
    let facility = h.facility();
    let sector = h
        .admin
        .add_sector(facility, NewSector::new("UC1", SectorType::Uncovered, 3, 1), Utc::now())
        .unwrap();
    let r = h
        .lifecycle
        .create_reservation(facility, ClientTier::Basic, &ClientId::new("c"), Utc::now())
        .unwrap();
    h.lifecycle
        .create_reservation(facility, ClientTier::Basic, &ClientId::new("d"), Utc::now())
        .unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lifecycle = h.lifecycle.clone();
            let barrier = barrier.clone();
            let id = r.id();
            thread::spawn(move || {
                barrier.wait();
                lifecycle.end_reservation(id, Utc::now())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(ParkingError::ReservationNotActive { .. }))));
    assert_eq!(h.store.load_sector(sector.id()).unwrap().occupied_places(), 1);
    h.assert_consistent(facility);
}

#[test]
fn test_sweep_and_exit_race() {
    let h = Harness::new();
    let facility = h.facility();
    h.admin.add_sector(facility, NewSector::new("UC1", SectorType::Uncovered, 50, 1), Utc::now()).unwrap();

    let now = Utc::now();
    let stale: Vec<_> = (0..10)
        .map(|i| {
            h.lifecycle
                .create_reservation(
                    facility,
                    ClientTier::Basic,
                    &ClientId::new(format!("c{i}")),
                    now - Duration::hours(30),
                )
                .unwrap()
        })
        .collect();

    let sweeper = Arc::new(ExpirySweeper::new(h.store.clone(), h.lifecycle.clone()));
    let sweeps: Vec<_> = (0..2)
        .map(|_| {
            let sweeper = sweeper.clone();
            thread::spawn(move || sweeper.sweep(now, Duration::hours(24)))
        })
        .collect();
    let exits: Vec<_> = stale
        .iter()
        .step_by(3)
        .map(|r| {
            let lifecycle = h.lifecycle.clone();
            let id = r.id();
            thread::spawn(move || lifecycle.end_reservation(id, now).is_ok())
        })
        .collect();

    let mut ended_by_sweep = 0;
    for handle in sweeps {
        let report = handle.join().unwrap();
        ended_by_sweep += report.ended.len();
        assert!(report
            .failed
            .iter()
            .all(|f| matches!(f.error, ParkingError::ReservationNotActive { .. })));
    }
    let ended_by_exit = exits.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();

    assert_eq!(ended_by_sweep + ended_by_exit, stale.len());
    for r in &stale {
        assert_eq!(h.store.load_reservation(r.id()).unwrap().status(), ReservationStatus::Ended);
    }
    h.assert_consistent(facility);
}

#[test]
fn test_weight_zero_excludes_and_restores() {
    let h = Harness::new();
    let facility = h.facility();
    let now = Utc::now();
    let a = h.admin.add_sector(facility, NewSector::new("A", SectorType::Uncovered, 10, 1), now).unwrap();
    h.admin.add_sector(facility, NewSector::new("B", SectorType::Uncovered, 10, 1), now).unwrap();

    let off = h.admin.set_weight(a.id(), 0, a.version(), now).unwrap();
    for i in 0..5 {
        let r = h
            .lifecycle
            .create_reservation(facility, ClientTier::Premium, &ClientId::new(format!("c{i}")), now)
            .unwrap();
        assert_ne!(r.sector_id(), a.id());
    }
    assert_eq!(h.eligible(facility, ClientTier::Premium), names(&["B"]));

    h.admin.set_weight(a.id(), 2, off.version(), now).unwrap();
    assert_eq!(h.eligible(facility, ClientTier::Premium), names(&["A", "B"]));
    let r = h
        .lifecycle
        .create_reservation(facility, ClientTier::Premium, &ClientId::new("back"), now)
        .unwrap();
    assert_eq!(r.sector_id(), a.id());
}

#[test]
fn test_admin_write_races_with_allocation() {
    let h = Harness::new();
    let facility = h.facility();
    let sector = h
        .admin
        .add_sector(facility, NewSector::new("UC1", SectorType::Uncovered, 5, 1), Utc::now())
        .unwrap();

    // An admin holding the version from before the reservation loses
    h.lifecycle
        .create_reservation(facility, ClientTier::Basic, &ClientId::new("c"), Utc::now())
        .unwrap();
    assert!(matches!(
        h.admin.resize_capacity(sector.id(), 8, sector.version()),
        Err(ParkingError::Conflict(_))
    ));
    assert!(matches!(
        h.admin.remove_sector(sector.id(), sector.version()),
        Err(ParkingError::Conflict(_))
    ));
    assert_eq!(h.store.load_sector(sector.id()).unwrap().max_places(), 5);
}

/// Store wrapper that runs `interloper` against the inner store just before
/// each of the first `remaining` sector writes it forwards
struct InterleavedStore {
    inner: Arc<MemoryStore>,
    interloper: Box<dyn Fn() + Send + Sync>,
    remaining: AtomicU32,
}

impl FacilityRepository for InterleavedStore {
    fn insert_facility(&self, facility: Facility) -> Result<Facility, StoreError> {
        self.inner.insert_facility(facility)
    }

    fn load_facility(&self, id: FacilityId) -> Result<Facility, StoreError> {
        self.inner.load_facility(id)
    }

    fn all_facilities(&self) -> Vec<Facility> {
        self.inner.all_facilities()
    }
}

impl SectorRepository for InterleavedStore {
    fn insert_sector(&self, sector: Sector) -> Result<Sector, StoreError> {
        self.inner.insert_sector(sector)
    }

    fn load_sector(&self, id: SectorId) -> Result<Sector, StoreError> {
        self.inner.load_sector(id)
    }

    fn sectors_in(&self, facility: FacilityId) -> Vec<Sector> {
        self.inner.sectors_in(facility)
    }

    fn save_sector(&self, sector: Sector, expected: Version) -> Result<Sector, StoreError> {
        if self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            (self.interloper)();
        }
        self.inner.save_sector(sector, expected)
    }

    fn delete_sector(&self, id: SectorId, expected: Version) -> Result<Sector, StoreError> {
        self.inner.delete_sector(id, expected)
    }
}

impl ReservationRepository for InterleavedStore {
    fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        self.inner.insert_reservation(reservation)
    }

    fn load_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.inner.load_reservation(id)
    }

    fn save_reservation(
        &self,
        reservation: Reservation,
        expected: Version,
    ) -> Result<Reservation, StoreError> {
        self.inner.save_reservation(reservation, expected)
    }

    fn find_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        self.inner.find_reservations(filter)
    }
}

impl ParkingEventRepository for InterleavedStore {
    fn append_event(&self, event: ParkingEvent) {
        self.inner.append_event(event)
    }

    fn events_for(&self, reservation: ReservationId) -> Vec<ParkingEvent> {
        self.inner.events_for(reservation)
    }
}

fn single_sector(max_places: u32) -> (Arc<MemoryStore>, FacilityId, SectorId) {
    let inner = Arc::new(MemoryStore::new());
    let admin = SectorAdmin::new(inner.clone());
    let facility = admin
        .create_facility(Address::new("Lodz", "90-001", "Piotrkowska 1"), PlacementStrategy::LeastOccupied)
        .unwrap()
        .id();
    let sector = admin
        .add_sector(facility, NewSector::new("UC1", SectorType::Uncovered, max_places, 1), Utc::now())
        .unwrap()
        .id();
    (inner, facility, sector)
}

#[test]
fn test_outpaced_caller_keeps_trying_while_places_remain() {
    let (inner, facility, sector) = single_sector(20);
    let rival = Arc::new(ReservationLifecycle::new(inner.clone(), &Config::default()));

    // Every one of the first 12 commits is beaten by a competing booking
    let store = Arc::new(InterleavedStore {
        inner: inner.clone(),
        interloper: Box::new(move || {
            rival
                .create_reservation(facility, ClientTier::Basic, &ClientId::new("rival"), Utc::now())
                .unwrap();
        }),
        remaining: AtomicU32::new(12),
    });
    let lifecycle = ReservationLifecycle::new(store, &Config::default());

    let r = lifecycle
        .create_reservation(facility, ClientTier::Basic, &ClientId::new("caller"), Utc::now())
        .unwrap();
    assert_eq!(r.sector_id(), sector);

    let stored = inner.load_sector(sector).unwrap();
    assert_eq!(stored.occupied_places(), 13);
    assert_eq!(inner.find_reservations(&ReservationFilter::active()).len(), 13);
}

#[test]
fn test_conflicts_without_progress_exhaust_budget() {
    let (inner, facility, sector) = single_sector(20);
    let admin = SectorAdmin::new(inner.clone());

    // Bumps the sector version without taking a place
    let store = Arc::new(InterleavedStore {
        inner: inner.clone(),
        interloper: Box::new(move || {
            let current = admin.sector(sector).unwrap();
            admin.set_weight(sector, current.weight(), current.version(), Utc::now()).unwrap();
        }),
        remaining: AtomicU32::new(u32::MAX),
    });
    let lifecycle =
        ReservationLifecycle::new(store.clone(), &Config::default().with_max_allocation_attempts(3));

    let err = lifecycle
        .create_reservation(facility, ClientTier::Basic, &ClientId::new("caller"), Utc::now())
        .unwrap_err();
    assert!(matches!(err, ParkingError::NoAvailablePlace { .. }));
    assert_eq!(u32::MAX - store.remaining.load(Ordering::SeqCst), 3);
    assert_eq!(inner.load_sector(sector).unwrap().occupied_places(), 0);
}
