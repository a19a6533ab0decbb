//! Sector allocator - picks the sector a new reservation should go to
//!
//! Selection is a pure read. The returned sector is a hint: capacity is not
//! taken until the lifecycle commits an increment against the sector's
//! version, and a lost race means selecting again.

use crate::domain::{ClientTier, FacilityId, PlacementStrategy, Sector};
use crate::error::{facility_err, ParkingError};
use crate::store::ParkingStore;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Whether `sector` may receive a new reservation from a `tier` client
#[inline]
pub fn is_eligible(sector: &Sector, tier: ClientTier) -> bool {
    sector.is_active() && !sector.is_full() && tier.can_use(sector.sector_type())
}

/// LEAST_OCCUPIED ordering: lower occupancy ratio first, then more free
/// places, then smallest name.
///
/// Ratios are compared by cross-multiplication so equal fractions such as
/// 1/2 and 2/4 tie exactly.
pub fn least_occupied_order(a: &Sector, b: &Sector) -> Ordering {
    let lhs = u64::from(a.occupied_places()) * u64::from(b.max_places());
    let rhs = u64::from(b.occupied_places()) * u64::from(a.max_places());
    lhs.cmp(&rhs)
        .then_with(|| b.available_places().cmp(&a.available_places()))
        .then_with(|| a.name().cmp(b.name()))
}

/// Pick the best sector among `candidates` for `strategy`
pub fn pick<'a>(strategy: PlacementStrategy, candidates: &'a [Sector]) -> Option<&'a Sector> {
    match strategy {
        PlacementStrategy::LeastOccupied => {
            candidates.iter().min_by(|a, b| least_occupied_order(a, b))
        }
    }
}

pub struct SectorAllocator {
    store: Arc<dyn ParkingStore>,
}

impl SectorAllocator {
    pub fn new(store: Arc<dyn ParkingStore>) -> Self {
        Self { store }
    }

    /// Sectors of `facility` a `tier` client could be placed in right now,
    /// ordered by name
    pub fn eligible_sectors(
        &self,
        facility: FacilityId,
        tier: ClientTier,
    ) -> Result<Vec<Sector>, ParkingError> {
        self.store.load_facility(facility).map_err(facility_err(facility))?;
        Ok(self
            .store
            .sectors_in(facility)
            .into_iter()
            .filter(|s| is_eligible(s, tier))
            .collect())
    }

    /// Select the sector a new `tier` reservation in `facility` should use
    pub fn select_sector(
        &self,
        facility: FacilityId,
        tier: ClientTier,
        at: DateTime<Utc>,
    ) -> Result<Sector, ParkingError> {
        let strategy = self.store.load_facility(facility).map_err(facility_err(facility))?.strategy();
        let candidates: Vec<Sector> = self
            .store
            .sectors_in(facility)
            .into_iter()
            .filter(|s| is_eligible(s, tier))
            .collect();

        let Some(chosen) = pick(strategy, &candidates) else {
            debug!(facility_id = %facility, tier = %tier, at = %at, "no_eligible_sector");
            return Err(ParkingError::NoAvailablePlace { facility, tier });
        };

        debug!(
            facility_id = %facility,
            tier = %tier,
            sector = %chosen.name(),
            occupied = %chosen.occupied_places(),
            max = %chosen.max_places(),
            candidates = %candidates.len(),
            at = %at,
            "sector_selected"
        );
        Ok(chosen.clone())
    }
}
