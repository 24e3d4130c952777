pub mod honeycomb;

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::location::{LocationService, NearbyDriver};
use crate::spatial::honeycomb::HoneycombGrid;

/// Two-tier candidate lookup: the honeycomb shortlist first, a full radius
/// scan as the correctness backstop. Both tiers apply the same post-filters
/// and distance ordering through the location service.
#[derive(Clone)]
pub struct CandidateSearch {
    grid: Arc<HoneycombGrid>,
    location: Arc<LocationService>,
}

impl CandidateSearch {
    pub fn new(grid: Arc<HoneycombGrid>, location: Arc<LocationService>) -> Self {
        Self { grid, location }
    }

    /// Finds candidate drivers for a pickup, distance-ascending. Demand is
    /// recorded against the pickup cell on every call, dispatched or not,
    /// even in zones where tier-1 dispatch is disabled. Tier-1 emptiness
    /// is a cache miss and silently falls through to the radius scan; only
    /// the combined result may be empty.
    pub fn find_candidates(
        &self,
        pickup: &GeoPoint,
        radius_km: f64,
        category_id: &str,
        zone_id: Option<&str>,
    ) -> Vec<NearbyDriver> {
        self.grid.record_demand(pickup, category_id);

        let shortlist = self.grid.candidates(pickup, category_id, zone_id);
        if !shortlist.is_empty() {
            let ranked = self
                .location
                .rank_known(pickup, &shortlist, Some(category_id));
            if !ranked.is_empty() {
                return ranked;
            }
        }

        debug!(category_id, "honeycomb shortlist empty; falling back to radius scan");
        self.location
            .nearest_drivers(pickup, radius_km, Some(category_id))
    }

    pub fn candidate_ids(
        &self,
        pickup: &GeoPoint,
        radius_km: f64,
        category_id: &str,
        zone_id: Option<&str>,
    ) -> Vec<Uuid> {
        self.find_candidates(pickup, radius_km, category_id, zone_id)
            .into_iter()
            .map(|d| d.driver_id)
            .collect()
    }
}
