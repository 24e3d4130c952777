use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::geo::{GeoPoint, haversine_km};
use crate::models::driver::{DriverPresence, DriverStatus};
use crate::spatial::honeycomb::HoneycombGrid;
use crate::state::AppState;

/// A candidate returned by a spatial query, distance-ascending.
#[derive(Debug, Clone)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub location: GeoPoint,
}

/// Live presence index. Position data is last-write-wins; updates are
/// fire-and-forget and may be dropped without breaking correctness.
pub struct LocationService {
    drivers: DashMap<Uuid, DriverPresence>,
    grid: Arc<HoneycombGrid>,
    disconnect_grace: Duration,
}

impl LocationService {
    pub fn new(grid: Arc<HoneycombGrid>, disconnect_grace: Duration) -> Self {
        Self {
            drivers: DashMap::new(),
            grid,
            disconnect_grace,
        }
    }

    /// Creates or overwrites the presence record with status online.
    /// Idempotent: a second call simply refreshes location and metadata.
    pub fn set_online(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
        category_id: String,
        vehicle_id: Option<Uuid>,
        zone_id: Option<String>,
    ) -> bool {
        if !location.is_valid() {
            warn!(driver_id = %driver_id, "rejected online event with invalid coordinates");
            return false;
        }

        self.grid.place_driver(driver_id, &location, &category_id);
        self.drivers.insert(
            driver_id,
            DriverPresence::online(driver_id, location, category_id, vehicle_id, zone_id),
        );
        debug!(driver_id = %driver_id, "driver online");
        true
    }

    pub fn set_offline(&self, driver_id: Uuid) {
        self.grid.remove_driver(driver_id);
        if let Some(mut presence) = self.drivers.get_mut(&driver_id) {
            presence.status = DriverStatus::Offline;
            presence.last_seen_at = Utc::now();
        }
        debug!(driver_id = %driver_id, "driver offline");
    }

    /// Marks the driver disconnected and starts the grace window. A
    /// reconnect or location update within the window restores liveness;
    /// otherwise the sweep escalates to offline.
    pub fn set_disconnected(&self, driver_id: Uuid) {
        if let Some(mut presence) = self.drivers.get_mut(&driver_id) {
            if presence.status == DriverStatus::Online {
                presence.status = DriverStatus::Disconnected;
                presence.last_seen_at = Utc::now();
            }
        }
    }

    /// Re-arms presence after a reconnect inside the grace window.
    pub fn set_reconnected(&self, driver_id: Uuid) {
        if let Some(mut presence) = self.drivers.get_mut(&driver_id) {
            if presence.status == DriverStatus::Disconnected {
                presence.status = DriverStatus::Online;
                presence.last_seen_at = Utc::now();
            }
        }
    }

    pub fn set_on_trip(&self, driver_id: Uuid) {
        self.grid.remove_driver(driver_id);
        if let Some(mut presence) = self.drivers.get_mut(&driver_id) {
            presence.status = DriverStatus::OnTrip;
            presence.last_seen_at = Utc::now();
        }
    }

    /// Returns a driver to the dispatchable pool after a trip ends.
    pub fn set_available(&self, driver_id: Uuid) {
        if let Some(mut presence) = self.drivers.get_mut(&driver_id) {
            presence.status = DriverStatus::Online;
            presence.last_seen_at = Utc::now();
            let location = presence.location;
            let category = presence.category_id.clone();
            drop(presence);
            self.grid.place_driver(driver_id, &location, &category);
        }
    }

    /// Applies a position update. A no-op (not an error) for drivers that
    /// are not online/on-trip, so a late frame cannot resurrect a stale
    /// presence. Malformed coordinates are dropped and logged.
    pub fn update_location(
        &self,
        driver_id: Uuid,
        point: GeoPoint,
        speed: f64,
        heading: f64,
        accuracy: f64,
    ) {
        if !point.is_valid() {
            warn!(driver_id = %driver_id, lat = point.latitude, lng = point.longitude,
                "dropped malformed location update");
            return;
        }

        let Some(mut presence) = self.drivers.get_mut(&driver_id) else {
            debug!(driver_id = %driver_id, "dropped location update for unknown driver");
            return;
        };
        if !presence.accepts_location_updates() {
            return;
        }

        presence.location = point;
        presence.speed = speed;
        presence.heading = heading;
        presence.accuracy = accuracy;
        presence.last_seen_at = Utc::now();

        let dispatchable = presence.is_dispatchable();
        let category = presence.category_id.clone();
        drop(presence);

        // Supply only tracks dispatchable drivers; on-trip drivers moved
        // out of the grid when the trip started.
        if dispatchable {
            self.grid.place_driver(driver_id, &point, &category);
        }
    }

    pub fn presence(&self, driver_id: Uuid) -> Option<DriverPresence> {
        self.drivers.get(&driver_id).map(|p| p.clone())
    }

    pub fn is_dispatchable(&self, driver_id: Uuid) -> bool {
        self.drivers
            .get(&driver_id)
            .map(|p| p.is_dispatchable())
            .unwrap_or(false)
    }

    /// Full-radius scan: every online driver of the category within
    /// `radius_km`, distance-ascending, ties broken most-recently-seen
    /// first.
    pub fn nearest_drivers(
        &self,
        point: &GeoPoint,
        radius_km: f64,
        category_id: Option<&str>,
    ) -> Vec<NearbyDriver> {
        let mut matches: Vec<(NearbyDriver, chrono::DateTime<Utc>)> = self
            .drivers
            .iter()
            .filter(|entry| {
                let p = entry.value();
                p.is_dispatchable() && category_id.is_none_or(|c| p.category_id == c)
            })
            .filter_map(|entry| {
                let p = entry.value();
                let distance_km = haversine_km(point, &p.location);
                (distance_km <= radius_km).then(|| {
                    (
                        NearbyDriver {
                            driver_id: p.driver_id,
                            distance_km,
                            location: p.location,
                        },
                        p.last_seen_at,
                    )
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            a.0.distance_km
                .total_cmp(&b.0.distance_km)
                .then_with(|| b.1.cmp(&a.1))
        });
        matches.into_iter().map(|(d, _)| d).collect()
    }

    /// Ranks an already-shortlisted id set with the same post-filters and
    /// ordering as the full scan. Used by the tier-1 honeycomb path.
    pub fn rank_known(
        &self,
        point: &GeoPoint,
        ids: &[Uuid],
        category_id: Option<&str>,
    ) -> Vec<NearbyDriver> {
        let mut matches: Vec<(NearbyDriver, chrono::DateTime<Utc>)> = ids
            .iter()
            .filter_map(|id| self.drivers.get(id))
            .filter(|p| p.is_dispatchable() && category_id.is_none_or(|c| p.category_id == c))
            .map(|p| {
                (
                    NearbyDriver {
                        driver_id: p.driver_id,
                        distance_km: haversine_km(point, &p.location),
                        location: p.location,
                    },
                    p.last_seen_at,
                )
            })
            .collect();

        matches.sort_by(|a, b| {
            a.0.distance_km
                .total_cmp(&b.0.distance_km)
                .then_with(|| b.1.cmp(&a.1))
        });
        matches.into_iter().map(|(d, _)| d).collect()
    }

    pub fn online_driver_count(&self) -> usize {
        self.drivers
            .iter()
            .filter(|entry| entry.value().is_dispatchable())
            .count()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Escalates drivers whose disconnect grace has lapsed to offline and
    /// drops their supply from the grid. Returns the ids escalated.
    pub fn sweep_disconnected(&self) -> Vec<Uuid> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.disconnect_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let lapsed: Vec<Uuid> = self
            .drivers
            .iter()
            .filter(|entry| {
                let p = entry.value();
                p.status == DriverStatus::Disconnected && p.last_seen_at < cutoff
            })
            .map(|entry| *entry.key())
            .collect();

        for driver_id in &lapsed {
            self.set_offline(*driver_id);
            info!(driver_id = %driver_id, "disconnect grace lapsed; driver offline");
        }
        lapsed
    }
}

/// Background task escalating lapsed disconnects on a fixed cadence.
pub async fn run_presence_sweep(state: Arc<AppState>) {
    let mut ticker = interval(state.config.sweep_interval);
    info!("presence sweep started");
    loop {
        ticker.tick().await;
        state.location.sweep_disconnected();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn service() -> LocationService {
        service_with_grace(Duration::from_secs(30))
    }

    fn service_with_grace(grace: Duration) -> LocationService {
        let grid = Arc::new(HoneycombGrid::new(8, 1, true, Default::default()).unwrap());
        LocationService::new(grid, grace)
    }

    #[test]
    fn set_online_is_idempotent_with_latest_location() {
        let svc = service();
        let driver = Uuid::new_v4();

        assert!(svc.set_online(driver, GeoPoint::new(30.05, 31.23), "budget".into(), None, None));
        assert!(svc.set_online(driver, GeoPoint::new(30.06, 31.24), "budget".into(), None, None));

        assert_eq!(svc.driver_count(), 1);
        let presence = svc.presence(driver).unwrap();
        assert_eq!(presence.location, GeoPoint::new(30.06, 31.24));
        assert_eq!(presence.status, DriverStatus::Online);
    }

    #[test]
    fn set_online_records_reported_zone() {
        let svc = service();
        let driver = Uuid::new_v4();
        svc.set_online(
            driver,
            GeoPoint::new(30.05, 31.23),
            "budget".into(),
            None,
            Some("downtown".into()),
        );

        let presence = svc.presence(driver).unwrap();
        assert_eq!(presence.zone_id.as_deref(), Some("downtown"));
    }

    #[test]
    fn nearest_drivers_orders_by_distance_within_radius() {
        let svc = service();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        let outside = Uuid::new_v4();

        svc.set_online(near, GeoPoint::new(30.05, 31.23), "budget".into(), None, None);
        svc.set_online(far, GeoPoint::new(30.06, 31.24), "budget".into(), None, None);
        svc.set_online(outside, GeoPoint::new(31.0, 32.0), "budget".into(), None, None);

        let pickup = GeoPoint::new(30.045, 31.235);
        let result = svc.nearest_drivers(&pickup, 5.0, Some("budget"));

        let ids: Vec<Uuid> = result.iter().map(|d| d.driver_id).collect();
        assert_eq!(ids, vec![near, far]);
        assert!(result.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
        assert!(result.iter().all(|d| d.distance_km <= 5.0));
    }

    #[test]
    fn nearest_drivers_filters_status_and_category() {
        let svc = service();
        let online = Uuid::new_v4();
        let on_trip = Uuid::new_v4();
        let premium = Uuid::new_v4();

        svc.set_online(online, GeoPoint::new(30.05, 31.23), "budget".into(), None, None);
        svc.set_online(on_trip, GeoPoint::new(30.05, 31.23), "budget".into(), None, None);
        svc.set_on_trip(on_trip);
        svc.set_online(premium, GeoPoint::new(30.05, 31.23), "premium".into(), None, None);

        let pickup = GeoPoint::new(30.05, 31.23);
        let ids: Vec<Uuid> = svc
            .nearest_drivers(&pickup, 5.0, Some("budget"))
            .iter()
            .map(|d| d.driver_id)
            .collect();
        assert_eq!(ids, vec![online]);
    }

    #[test]
    fn location_update_ignored_for_offline_driver() {
        let svc = service();
        let driver = Uuid::new_v4();
        svc.set_online(driver, GeoPoint::new(30.05, 31.23), "budget".into(), None, None);
        svc.set_offline(driver);

        svc.update_location(driver, GeoPoint::new(30.10, 31.30), 10.0, 90.0, 5.0);

        let presence = svc.presence(driver).unwrap();
        assert_eq!(presence.status, DriverStatus::Offline);
        assert_eq!(presence.location, GeoPoint::new(30.05, 31.23));
    }

    #[test]
    fn malformed_location_update_is_dropped() {
        let svc = service();
        let driver = Uuid::new_v4();
        svc.set_online(driver, GeoPoint::new(30.05, 31.23), "budget".into(), None, None);

        svc.update_location(driver, GeoPoint::new(95.0, 31.30), 0.0, 0.0, 0.0);

        assert_eq!(svc.presence(driver).unwrap().location, GeoPoint::new(30.05, 31.23));
    }

    #[test]
    fn disconnect_grace_escalates_to_offline() {
        let svc = service_with_grace(Duration::from_secs(0));
        let driver = Uuid::new_v4();
        svc.set_online(driver, GeoPoint::new(30.05, 31.23), "budget".into(), None, None);
        svc.set_disconnected(driver);

        let escalated = svc.sweep_disconnected();

        assert_eq!(escalated, vec![driver]);
        assert_eq!(svc.presence(driver).unwrap().status, DriverStatus::Offline);
    }

    #[test]
    fn reconnect_within_grace_restores_online() {
        let svc = service();
        let driver = Uuid::new_v4();
        svc.set_online(driver, GeoPoint::new(30.05, 31.23), "budget".into(), None, None);
        svc.set_disconnected(driver);
        svc.set_reconnected(driver);

        assert_eq!(svc.presence(driver).unwrap().status, DriverStatus::Online);
        assert!(svc.sweep_disconnected().is_empty());
    }
}
