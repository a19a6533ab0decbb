//! Error types for the allocator
//!
//! - [`StoreError`] - repository-level failures (missing row, stale version)
//! - [`ParkingError`] - everything the public operations return
//! - [`ErrorCategory`] - coarse classification for the calling layer

use crate::domain::types::{
    ClientTier, FacilityId, ReservationId, SectorId, Version,
};
use crate::domain::reservation::ReservationStatus;
use thiserror::Error;

/// Kind of entity a repository error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Facility,
    Sector,
    Reservation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Facility => "facility",
            EntityKind::Sector => "sector",
            EntityKind::Reservation => "reservation",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the load / compare-and-swap repository contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("stale {kind} {id}: expected version {expected}, stored version {actual}")]
    Conflict { kind: EntityKind, id: String, expected: Version, actual: Version },
}

impl StoreError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        StoreError::NotFound { kind, id: id.to_string() }
    }

    pub fn conflict(kind: EntityKind, id: impl ToString, expected: Version, actual: Version) -> Self {
        StoreError::Conflict { kind, id: id.to_string(), expected, actual }
    }
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller error; nothing was mutated
    Validation,
    /// Expected contention on capacity; retryable
    CapacityConflict,
    /// Operation not allowed in the current state; nothing was mutated
    StateConflict,
}

/// Errors returned by allocator, lifecycle, sweep and administration operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParkingError {
    // Validation
    #[error("invalid client tier: {0}")]
    InvalidTier(String),

    #[error("invalid sector type: {0}")]
    InvalidSectorType(String),

    #[error("invalid placement strategy: {0}")]
    InvalidStrategy(String),

    #[error("unknown facility {0}")]
    UnknownFacility(FacilityId),

    #[error("unknown sector {0}")]
    UnknownSector(SectorId),

    #[error("unknown reservation {0}")]
    UnknownReservation(ReservationId),

    #[error("sector name must not be empty")]
    EmptySectorName,

    #[error("facility {facility} already has a sector named {name}")]
    DuplicateSectorName { facility: FacilityId, name: String },

    #[error("invalid capacity {0}: a sector needs at least one place")]
    InvalidCapacity(u32),

    // Capacity conflicts
    #[error("no available place in facility {facility} for {tier} tier")]
    NoAvailablePlace { facility: FacilityId, tier: ClientTier },

    #[error("concurrent modification: {0}")]
    Conflict(StoreError),

    #[error("sector {0} has no free place")]
    CapacityExhausted(SectorId),

    #[error("sector {0} has no occupied place to release")]
    SectorEmpty(SectorId),

    // State conflicts
    #[error("reservation {id} is not active (status: {status})")]
    ReservationNotActive { id: ReservationId, status: ReservationStatus },

    #[error("reservation {0} has already entered the parking")]
    AlreadyEntered(ReservationId),

    #[error("sector {sector} still has {active} active reservations")]
    SectorHasActiveReservations { sector: SectorId, active: u32 },

    #[error("sector {sector} cannot shrink to {requested} places while {occupied} are occupied")]
    CapacityBelowOccupancy { sector: SectorId, requested: u32, occupied: u32 },
}

impl ParkingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ParkingError::InvalidTier(_)
            | ParkingError::InvalidSectorType(_)
            | ParkingError::InvalidStrategy(_)
            | ParkingError::UnknownFacility(_)
            | ParkingError::UnknownSector(_)
            | ParkingError::UnknownReservation(_)
            | ParkingError::EmptySectorName
            | ParkingError::DuplicateSectorName { .. }
            | ParkingError::InvalidCapacity(_) => ErrorCategory::Validation,
            ParkingError::NoAvailablePlace { .. }
            | ParkingError::Conflict(_)
            | ParkingError::CapacityExhausted(_)
            | ParkingError::SectorEmpty(_) => ErrorCategory::CapacityConflict,
            ParkingError::ReservationNotActive { .. }
            | ParkingError::AlreadyEntered(_)
            | ParkingError::SectorHasActiveReservations { .. }
            | ParkingError::CapacityBelowOccupancy { .. } => ErrorCategory::StateConflict,
        }
    }

    /// Whether the caller may retry the same request
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::CapacityConflict
    }

    /// Short machine-readable tag used in logs and sweep reports
    pub fn code(&self) -> &'static str {
        match self {
            ParkingError::InvalidTier(_) => "invalid_tier",
            ParkingError::InvalidSectorType(_) => "invalid_sector_type",
            ParkingError::InvalidStrategy(_) => "invalid_strategy",
            ParkingError::UnknownFacility(_) => "unknown_facility",
            ParkingError::UnknownSector(_) => "unknown_sector",
            ParkingError::UnknownReservation(_) => "unknown_reservation",
            ParkingError::EmptySectorName => "empty_sector_name",
            ParkingError::DuplicateSectorName { .. } => "duplicate_sector_name",
            ParkingError::InvalidCapacity(_) => "invalid_capacity",
            ParkingError::NoAvailablePlace { .. } => "no_available_place",
            ParkingError::Conflict(_) => "conflict",
            ParkingError::CapacityExhausted(_) => "capacity_exhausted",
            ParkingError::SectorEmpty(_) => "sector_empty",
            ParkingError::ReservationNotActive { .. } => "reservation_not_active",
            ParkingError::AlreadyEntered(_) => "already_entered",
            ParkingError::SectorHasActiveReservations { .. } => "sector_has_active_reservations",
            ParkingError::CapacityBelowOccupancy { .. } => "capacity_below_occupancy",
        }
    }
}

/// Map a repository failure for an entity identified by `id`.
///
/// Not-found becomes the matching `Unknown*` validation error, stale
/// versions become `Conflict`.
pub(crate) fn sector_err(id: SectorId) -> impl Fn(StoreError) -> ParkingError {
    move |e| match e {
        StoreError::NotFound { .. } => ParkingError::UnknownSector(id),
        other => ParkingError::Conflict(other),
    }
}

pub(crate) fn reservation_err(id: ReservationId) -> impl Fn(StoreError) -> ParkingError {
    move |e| match e {
        StoreError::NotFound { .. } => ParkingError::UnknownReservation(id),
        other => ParkingError::Conflict(other),
    }
}

pub(crate) fn facility_err(id: FacilityId) -> impl Fn(StoreError) -> ParkingError {
    move |e| match e {
        StoreError::NotFound { .. } => ParkingError::UnknownFacility(id),
        other => ParkingError::Conflict(other),
    }
}
