//! Shared identifier and classification types for the allocator

use crate::error::ParkingError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optimistic concurrency token carried by every versioned entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Version assigned to an entity on first insert
    pub const INITIAL: Version = Version(0);

    #[inline]
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable id (UUIDv7)
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Newtype wrapper for facility ids
    FacilityId
);
uuid_id!(
    /// Newtype wrapper for sector ids
    SectorId
);
uuid_id!(
    /// Newtype wrapper for reservation ids
    ReservationId
);
uuid_id!(
    /// Newtype wrapper for parking event ids
    ParkingEventId
);

/// Opaque, pre-authenticated client identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client service level. Ordering is meaningful: a higher tier reaches
/// every sector type a lower tier reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientTier {
    Basic,
    Standard,
    Premium,
}

impl ClientTier {
    pub const ALL: [ClientTier; 3] = [ClientTier::Basic, ClientTier::Standard, ClientTier::Premium];

    #[inline]
    pub fn can_use(self, sector_type: SectorType) -> bool {
        self >= sector_type.required_tier()
    }

    /// Sector types reachable by this tier, cheapest first
    pub fn eligible_types(self) -> &'static [SectorType] {
        match self {
            ClientTier::Basic => &[SectorType::Uncovered],
            ClientTier::Standard => &[SectorType::Uncovered, SectorType::Covered],
            ClientTier::Premium => {
                &[SectorType::Uncovered, SectorType::Covered, SectorType::Underground]
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientTier::Basic => "basic",
            ClientTier::Standard => "standard",
            ClientTier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for ClientTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClientTier {
    type Err = ParkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BASIC" => Ok(ClientTier::Basic),
            "STANDARD" => Ok(ClientTier::Standard),
            "PREMIUM" => Ok(ClientTier::Premium),
            _ => Err(ParkingError::InvalidTier(s.to_string())),
        }
    }
}

/// Physical kind of a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectorType {
    Uncovered,
    Covered,
    Underground,
}

impl SectorType {
    /// Lowest client tier allowed to park in this sector type
    #[inline]
    pub fn required_tier(self) -> ClientTier {
        match self {
            SectorType::Uncovered => ClientTier::Basic,
            SectorType::Covered => ClientTier::Standard,
            SectorType::Underground => ClientTier::Premium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SectorType::Uncovered => "uncovered",
            SectorType::Covered => "covered",
            SectorType::Underground => "underground",
        }
    }
}

impl std::fmt::Display for SectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SectorType {
    type Err = ParkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uncovered" => Ok(SectorType::Uncovered),
            "covered" => Ok(SectorType::Covered),
            "underground" => Ok(SectorType::Underground),
            _ => Err(ParkingError::InvalidSectorType(s.to_string())),
        }
    }
}

/// How a facility picks a sector for a new reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    #[default]
    LeastOccupied,
}

impl PlacementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementStrategy::LeastOccupied => "least_occupied",
        }
    }
}

impl std::str::FromStr for PlacementStrategy {
    type Err = ParkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "least_occupied" => Ok(PlacementStrategy::LeastOccupied),
            _ => Err(ParkingError::InvalidStrategy(s.to_string())),
        }
    }
}
