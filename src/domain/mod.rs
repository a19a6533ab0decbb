//! Domain models - facilities, sectors and reservations
//!
//! This module contains the canonical data types used throughout the system:
//! - `Facility` / `Sector` - capacity layout of a parking location
//! - `Reservation` - a claim on one place, with its lifecycle status
//! - `ParkingEvent` - entry/exit audit records
//! - `ClientTier` / `SectorType` - tier-to-type eligibility

pub mod facility;
pub mod reservation;
pub mod types;

// Re-export commonly used types at module level
pub use facility::{Address, Facility, NewSector, Sector};
pub use reservation::{EndReason, ParkingEvent, ParkingEventType, Reservation, ReservationStatus};
pub use types::{
    ClientId, ClientTier, FacilityId, ParkingEventId, PlacementStrategy, ReservationId, SectorId,
    SectorType, Version,
};
