//! Read-only occupancy queries used by listings and the metrics endpoint
//!
//! With `show_only_active` set, inactive sectors (weight 0) are hidden and
//! their places count as unavailable.

use crate::domain::{Facility, FacilityId, Sector, SectorId, SectorType};
use crate::error::{facility_err, ParkingError};
use crate::store::{ParkingStore, ReservationFilter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorOccupancy {
    pub id: SectorId,
    pub name: String,
    pub sector_type: SectorType,
    pub max_places: u32,
    pub occupied_places: u32,
    pub available_places: u32,
    pub weight: u32,
    pub active: bool,
    pub deactivation_time: Option<DateTime<Utc>>,
}

impl From<&Sector> for SectorOccupancy {
    fn from(s: &Sector) -> Self {
        Self {
            id: s.id(),
            name: s.name().to_string(),
            sector_type: s.sector_type(),
            max_places: s.max_places(),
            occupied_places: s.occupied_places(),
            available_places: s.available_places(),
            weight: s.weight(),
            active: s.is_active(),
            deactivation_time: s.deactivation_time(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityOccupancy {
    pub facility: Facility,
    pub sectors: Vec<SectorOccupancy>,
}

impl FacilityOccupancy {
    pub fn max_places(&self) -> u64 {
        self.sectors.iter().map(|s| u64::from(s.max_places)).sum()
    }

    pub fn occupied_places(&self) -> u64 {
        self.sectors.iter().map(|s| u64::from(s.occupied_places)).sum()
    }

    pub fn available_places(&self) -> u64 {
        self.sectors.iter().filter(|s| s.active).map(|s| u64::from(s.available_places)).sum()
    }
}

pub struct OccupancyQuery {
    store: Arc<dyn ParkingStore>,
}

impl OccupancyQuery {
    pub fn new(store: Arc<dyn ParkingStore>) -> Self {
        Self { store }
    }

    fn visible_sectors(&self, facility: FacilityId, show_only_active: bool) -> Vec<Sector> {
        self.store
            .sectors_in(facility)
            .into_iter()
            .filter(|s| !show_only_active || s.is_active())
            .collect()
    }

    /// Per-sector occupancy of one facility, sectors ordered by name
    pub fn facility_occupancy(
        &self,
        facility: FacilityId,
        show_only_active: bool,
    ) -> Result<FacilityOccupancy, ParkingError> {
        let stored = self.store.load_facility(facility).map_err(facility_err(facility))?;
        let sectors =
            self.visible_sectors(facility, show_only_active).iter().map(SectorOccupancy::from).collect();
        Ok(FacilityOccupancy { facility: stored, sectors })
    }

    /// Occupancy of every facility
    pub fn all_occupancy(&self, show_only_active: bool) -> Vec<FacilityOccupancy> {
        self.store
            .all_facilities()
            .into_iter()
            .map(|facility| {
                let sectors = self
                    .visible_sectors(facility.id(), show_only_active)
                    .iter()
                    .map(SectorOccupancy::from)
                    .collect();
                FacilityOccupancy { facility, sectors }
            })
            .collect()
    }

    /// Number of active reservations across all facilities
    pub fn active_reservations(&self) -> usize {
        self.store.find_reservations(&ReservationFilter::active()).len()
    }

    /// Facilities with at least one free place in a visible sector
    pub fn facilities_with_available_places(&self, show_only_active: bool) -> Vec<Facility> {
        self.store
            .all_facilities()
            .into_iter()
            .filter(|f| {
                self.visible_sectors(f.id(), show_only_active)
                    .iter()
                    .any(|s| s.is_active() && !s.is_full())
            })
            .collect()
    }

    /// Facilities having a visible sector of any of `types`
    pub fn facilities_by_sector_types(
        &self,
        types: &[SectorType],
        show_only_active: bool,
    ) -> Vec<Facility> {
        self.store
            .all_facilities()
            .into_iter()
            .filter(|f| {
                self.visible_sectors(f.id(), show_only_active)
                    .iter()
                    .any(|s| types.contains(&s.sector_type()))
            })
            .collect()
    }

    /// Visible sectors of a facility that still have a free place
    pub fn sectors_with_available_places(
        &self,
        facility: FacilityId,
        show_only_active: bool,
    ) -> Result<Vec<Sector>, ParkingError> {
        self.store.load_facility(facility).map_err(facility_err(facility))?;
        Ok(self
            .visible_sectors(facility, show_only_active)
            .into_iter()
            .filter(|s| !s.is_full())
            .collect())
    }
}
