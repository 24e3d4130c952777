use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Online,
    OnTrip,
    Disconnected,
    Offline,
}

/// Live presence record for a driver. Exactly one exists per driver
/// regardless of how many sockets that driver holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPresence {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub speed: f64,
    pub heading: f64,
    pub accuracy: f64,
    pub status: DriverStatus,
    pub last_seen_at: DateTime<Utc>,
    pub zone_id: Option<String>,
    pub category_id: String,
    pub vehicle_id: Option<Uuid>,
}

impl DriverPresence {
    pub fn online(
        driver_id: Uuid,
        location: GeoPoint,
        category_id: String,
        vehicle_id: Option<Uuid>,
        zone_id: Option<String>,
    ) -> Self {
        Self {
            driver_id,
            location,
            speed: 0.0,
            heading: 0.0,
            accuracy: 0.0,
            status: DriverStatus::Online,
            last_seen_at: Utc::now(),
            zone_id,
            category_id,
            vehicle_id,
        }
    }

    /// Whether this driver may receive and win ride offers.
    pub fn is_dispatchable(&self) -> bool {
        self.status == DriverStatus::Online
    }

    /// Whether location updates from this driver should be applied.
    /// Stale drivers (disconnected/offline) must not be resurrected by a
    /// late-arriving location frame.
    pub fn accepts_location_updates(&self) -> bool {
        matches!(self.status, DriverStatus::Online | DriverStatus::OnTrip)
    }
}
