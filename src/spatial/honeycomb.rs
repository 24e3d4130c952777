use std::collections::HashMap;

use dashmap::DashMap;
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;

/// Surge never exceeds this multiplier regardless of imbalance.
const SURGE_CAP: f64 = 3.0;

/// Per-zone overrides of the global dispatch settings. Absent fields fall
/// back to the global value; zones without an entry use the globals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneSettings {
    pub k_ring: Option<u32>,
    pub enabled: Option<bool>,
}

#[derive(Default)]
struct CellState {
    /// driver_id -> category_id for drivers currently inside the cell.
    supply: HashMap<Uuid, String>,
    /// Ride requests observed in the cell, keyed by category.
    demand: HashMap<String, u64>,
}

/// Read-model snapshot of a single cell, served to heatmap consumers.
#[derive(Debug, Clone, Serialize)]
pub struct CellStats {
    pub h3_index: String,
    pub supply_by_category: HashMap<String, u64>,
    pub demand_by_category: HashMap<String, u64>,
    pub imbalance_score: f64,
    pub surge_multiplier: f64,
}

/// Coarse hexagonal index of online drivers. Supply moves with drivers,
/// demand accrues per ride request; both feed the surge read path. Tier-1
/// candidate shortlisting reads the k-ring around the pickup cell.
pub struct HoneycombGrid {
    resolution: Resolution,
    k_ring: u32,
    enabled: bool,
    zones: HashMap<String, ZoneSettings>,
    cells: DashMap<CellIndex, CellState>,
    driver_cells: DashMap<Uuid, CellIndex>,
}

impl HoneycombGrid {
    pub fn new(
        resolution: u8,
        k_ring: u32,
        enabled: bool,
        zones: HashMap<String, ZoneSettings>,
    ) -> Result<Self, AppError> {
        let resolution = Resolution::try_from(resolution)
            .map_err(|err| AppError::Internal(format!("invalid h3 resolution: {err}")))?;
        Ok(Self {
            resolution,
            k_ring,
            enabled,
            zones,
            cells: DashMap::new(),
            driver_cells: DashMap::new(),
        })
    }

    fn zone_params(&self, zone_id: Option<&str>) -> (u32, bool) {
        let overrides = zone_id.and_then(|zone| self.zones.get(zone));
        (
            overrides.and_then(|z| z.k_ring).unwrap_or(self.k_ring),
            overrides.and_then(|z| z.enabled).unwrap_or(self.enabled),
        )
    }

    fn cell_for(&self, point: &GeoPoint) -> Option<CellIndex> {
        let latlng = LatLng::new(point.latitude, point.longitude).ok()?;
        Some(latlng.to_cell(self.resolution))
    }

    /// Places or moves a driver's supply. Called on online and on every
    /// applied location update; cheap no-op when the cell is unchanged.
    pub fn place_driver(&self, driver_id: Uuid, point: &GeoPoint, category_id: &str) {
        let Some(cell) = self.cell_for(point) else {
            return;
        };

        if let Some(previous) = self.driver_cells.insert(driver_id, cell) {
            if previous == cell {
                // Still inside the same hex; supply entry already present.
                self.cells
                    .entry(cell)
                    .or_default()
                    .supply
                    .insert(driver_id, category_id.to_string());
                return;
            }
            if let Some(mut state) = self.cells.get_mut(&previous) {
                state.supply.remove(&driver_id);
            }
        }

        self.cells
            .entry(cell)
            .or_default()
            .supply
            .insert(driver_id, category_id.to_string());
    }

    pub fn remove_driver(&self, driver_id: Uuid) {
        if let Some((_, cell)) = self.driver_cells.remove(&driver_id) {
            if let Some(mut state) = self.cells.get_mut(&cell) {
                state.supply.remove(&driver_id);
            }
        }
    }

    /// Counts a ride request against the pickup cell. Always recorded, even
    /// when tier-1 dispatch is disabled, so the heatmap stays truthful.
    pub fn record_demand(&self, point: &GeoPoint, category_id: &str) {
        let Some(cell) = self.cell_for(point) else {
            return;
        };
        *self
            .cells
            .entry(cell)
            .or_default()
            .demand
            .entry(category_id.to_string())
            .or_insert(0) += 1;
    }

    /// Tier-1 shortlist: union of driver ids in the pickup cell's k-ring,
    /// filtered by category. K and enablement honor the pickup zone's
    /// overrides. Emptiness here is a cache-miss signal, never a "no
    /// drivers" answer.
    pub fn candidates(&self, point: &GeoPoint, category_id: &str, zone_id: Option<&str>) -> Vec<Uuid> {
        let (k_ring, enabled) = self.zone_params(zone_id);
        if !enabled {
            return Vec::new();
        }
        let Some(origin) = self.cell_for(point) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for cell in origin.grid_disk::<Vec<_>>(k_ring) {
            if let Some(state) = self.cells.get(&cell) {
                out.extend(
                    state
                        .supply
                        .iter()
                        .filter(|(_, cat)| cat.as_str() == category_id)
                        .map(|(id, _)| *id),
                );
            }
        }
        out
    }

    pub fn cell_stats(&self, point: &GeoPoint) -> Option<CellStats> {
        let cell = self.cell_for(point)?;
        let state = self.cells.get(&cell)?;

        let mut supply_by_category: HashMap<String, u64> = HashMap::new();
        for category in state.supply.values() {
            *supply_by_category.entry(category.clone()).or_insert(0) += 1;
        }
        let demand_by_category = state.demand.clone();

        let supply_total: u64 = supply_by_category.values().sum();
        let demand_total: u64 = demand_by_category.values().sum();
        let imbalance_score = demand_total as f64 / supply_total.max(1) as f64;

        Some(CellStats {
            h3_index: cell.to_string(),
            supply_by_category,
            demand_by_category,
            imbalance_score,
            surge_multiplier: surge_multiplier(imbalance_score),
        })
    }
}

/// Linear ramp above parity, clamped to [1.0, SURGE_CAP].
pub fn surge_multiplier(imbalance_score: f64) -> f64 {
    imbalance_score.max(1.0).min(SURGE_CAP)
}
