//! Facility and sector data model
//!
//! Sectors carry the only shared mutable counter in the system
//! (`occupied_places`). Its mutators are crate-private so the capacity
//! tracker is the only code path that can move it.

use crate::domain::types::{FacilityId, PlacementStrategy, SectorId, SectorType, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Postal address of a facility. Not interpreted by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub zip_code: String,
    pub street: String,
}

impl Address {
    pub fn new(city: &str, zip_code: &str, street: &str) -> Self {
        Self { city: city.to_string(), zip_code: zip_code.to_string(), street: street.to_string() }
    }
}

/// A parking location. Owns its sectors; they are stored separately and
/// reference the facility by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facility {
    id: FacilityId,
    address: Address,
    strategy: PlacementStrategy,
    version: Version,
}

impl Facility {
    pub fn new(address: Address, strategy: PlacementStrategy) -> Self {
        Self { id: FacilityId::new(), address, strategy, version: Version::INITIAL }
    }

    pub fn id(&self) -> FacilityId {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn strategy(&self) -> PlacementStrategy {
        self.strategy
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Stamp the stored version. Used by repository implementations.
    pub fn stamped(mut self, version: Version) -> Self {
        self.version = version;
        self
    }
}

/// Caller-supplied attributes for a new sector
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSector {
    pub name: String,
    #[serde(rename = "type")]
    pub sector_type: SectorType,
    pub max_places: u32,
    pub weight: u32,
}

impl NewSector {
    pub fn new(name: &str, sector_type: SectorType, max_places: u32, weight: u32) -> Self {
        Self { name: name.to_string(), sector_type, max_places, weight }
    }
}

/// A subdivision of a facility with its own capacity, type and weight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sector {
    id: SectorId,
    facility_id: FacilityId,
    name: String,
    sector_type: SectorType,
    max_places: u32,
    occupied_places: u32,
    weight: u32,
    deactivation_time: Option<DateTime<Utc>>,
    version: Version,
}

impl Sector {
    /// Build an empty sector. A sector created with weight 0 starts
    /// deactivated at `at`.
    pub(crate) fn new(facility_id: FacilityId, spec: NewSector, at: DateTime<Utc>) -> Self {
        Self {
            id: SectorId::new(),
            facility_id,
            name: spec.name,
            sector_type: spec.sector_type,
            max_places: spec.max_places,
            occupied_places: 0,
            weight: spec.weight,
            deactivation_time: (spec.weight == 0).then_some(at),
            version: Version::INITIAL,
        }
    }

    pub fn id(&self) -> SectorId {
        self.id
    }

    pub fn facility_id(&self) -> FacilityId {
        self.facility_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sector_type(&self) -> SectorType {
        self.sector_type
    }

    pub fn max_places(&self) -> u32 {
        self.max_places
    }

    pub fn occupied_places(&self) -> u32 {
        self.occupied_places
    }

    #[inline]
    pub fn available_places(&self) -> u32 {
        self.max_places.saturating_sub(self.occupied_places)
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Active sectors take part in allocation; weight 0 switches a sector off
    #[inline]
    pub fn is_active(&self) -> bool {
        self.weight > 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.occupied_places >= self.max_places
    }

    pub fn deactivation_time(&self) -> Option<DateTime<Utc>> {
        self.deactivation_time
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Stamp the stored version. Used by repository implementations.
    pub fn stamped(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Take one place. Returns false (unchanged) when already full.
    pub(crate) fn occupy(&mut self) -> bool {
        if self.is_full() {
            return false;
        }
        self.occupied_places += 1;
        true
    }

    /// Give back one place. Returns false (unchanged) when already empty.
    pub(crate) fn release(&mut self) -> bool {
        if self.occupied_places == 0 {
            return false;
        }
        self.occupied_places -= 1;
        true
    }

    /// Change the weight, stamping or clearing the deactivation time on
    /// transitions across zero.
    pub(crate) fn apply_weight(&mut self, weight: u32, at: DateTime<Utc>) {
        match (self.weight, weight) {
            (w, 0) if w > 0 => self.deactivation_time = Some(at),
            (0, w) if w > 0 => self.deactivation_time = None,
            _ => {}
        }
        self.weight = weight;
    }

    /// Change the capacity. Caller checks `max_places >= occupied_places`.
    pub(crate) fn apply_max_places(&mut self, max_places: u32) {
        self.max_places = max_places;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector(max: u32, weight: u32) -> Sector {
        Sector::new(
            FacilityId::new(),
            NewSector::new("SA-01", SectorType::Covered, max, weight),
            Utc::now(),
        )
    }

    #[test]
    fn test_occupy_stops_at_max() {
        let mut s = sector(2, 1);
        assert!(s.occupy());
        assert!(s.occupy());
        assert!(!s.occupy());
        assert_eq!(s.occupied_places(), 2);
        assert_eq!(s.available_places(), 0);
        assert!(s.is_full());
    }

    #[test]
    fn test_release_stops_at_zero() {
        let mut s = sector(2, 1);
        assert!(!s.release());
        s.occupy();
        assert!(s.release());
        assert_eq!(s.occupied_places(), 0);
    }

    #[test]
    fn test_weight_transitions_stamp_deactivation() {
        let mut s = sector(5, 3);
        assert!(s.deactivation_time().is_none());

        let t1 = Utc::now();
        s.apply_weight(0, t1);
        assert!(!s.is_active());
        assert_eq!(s.deactivation_time(), Some(t1));

        // Staying at zero keeps the original stamp
        s.apply_weight(0, t1 + chrono::Duration::minutes(5));
        assert_eq!(s.deactivation_time(), Some(t1));

        s.apply_weight(7, t1 + chrono::Duration::minutes(10));
        assert!(s.is_active());
        assert!(s.deactivation_time().is_none());
    }

    #[test]
    fn test_created_inactive_is_stamped() {
        let s = sector(5, 0);
        assert!(!s.is_active());
        assert!(s.deactivation_time().is_some());
    }
}
