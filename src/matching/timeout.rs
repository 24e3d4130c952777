use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::BusEvent;
use crate::geo::GeoPoint;
use crate::matching::MatchingService;
use crate::models::ride::OfferStatus;
use crate::state::AppState;

enum ExpiryAction {
    Cascade {
        pickup: GeoPoint,
        category_id: String,
        candidates: Vec<Uuid>,
    },
    Expire {
        /// `ride.timeout` when drivers were invited and never answered,
        /// `ride.no_drivers` when nobody was ever eligible.
        event: &'static str,
    },
}

impl MatchingService {
    /// One sweep pass over broadcasting offers past their deadline. Each
    /// expired offer is transitioned exactly once: cascade to a wider
    /// radius, or expire and notify the business layer. A failure on one
    /// ride never aborts the rest of the pass.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let due: Vec<Uuid> = self
            .offers
            .iter()
            .filter(|entry| {
                let offer = entry.value();
                offer.is_broadcasting() && offer.deadline_at <= now
            })
            .map(|entry| *entry.key())
            .collect();

        let mut handled = 0;
        for ride_id in due {
            // The assignment lock guards the transition against concurrent
            // accepts and against a second sweeper.
            let Some(lock_holder) = self.locks.try_acquire(ride_id) else {
                continue;
            };
            let action = self.decide_expiry(ride_id, now);
            self.locks.release(ride_id, lock_holder);

            match action {
                Some(ExpiryAction::Cascade {
                    pickup,
                    category_id,
                    candidates,
                }) => {
                    info!(ride_id = %ride_id, candidates = candidates.len(), "offer cascaded");
                    self.metrics
                        .offers_total
                        .with_label_values(&["cascaded"])
                        .inc();
                    self.bus.publish(BusEvent::RideNew {
                        ride_id,
                        pickup,
                        category_id,
                        candidates,
                    });
                    handled += 1;
                }
                Some(ExpiryAction::Expire { event }) => {
                    info!(ride_id = %ride_id, event, "offer expired");
                    self.metrics
                        .offers_total
                        .with_label_values(&["expired"])
                        .inc();
                    self.bus.publish(BusEvent::RideExpired { ride_id });
                    if let Err(err) = self
                        .backend
                        .post_event(event, json!({ "ride_id": ride_id }))
                        .await
                    {
                        warn!(ride_id = %ride_id, event, error = %err, "failed to post business event");
                    }
                    handled += 1;
                }
                None => {}
            }
        }
        handled
    }

    /// Transition decision, taken while holding the assignment lock. The
    /// broadcasting re-check makes the transition idempotent even when
    /// two sweepers saw the same expired offer.
    fn decide_expiry(&self, ride_id: Uuid, now: Instant) -> Option<ExpiryAction> {
        let mut offer = self.offers.get_mut(&ride_id)?;
        if !offer.is_broadcasting() || offer.deadline_at > now {
            return None;
        }

        if offer.cascade_count < self.policy.max_cascades {
            offer.cascade_count += 1;
            offer.radius_km *= self.policy.cascade_radius_multiplier;
            offer.deadline_at = now + self.policy.offer_deadline;

            let pickup = offer.pickup;
            let category_id = offer.category_id.clone();
            let zone_id = offer.zone_id.clone();
            let radius_km = offer.radius_km;
            let candidates =
                self.search
                    .candidate_ids(&pickup, radius_km, &category_id, zone_id.as_deref());
            offer.candidates = candidates.clone();

            Some(ExpiryAction::Cascade {
                pickup,
                category_id,
                candidates,
            })
        } else {
            offer.status = OfferStatus::Expired;
            let event = if offer.candidates.is_empty() {
                "ride.no_drivers"
            } else {
                "ride.timeout"
            };
            Some(ExpiryAction::Expire { event })
        }
    }
}

/// Background task running the sweep on a fixed cadence.
pub async fn run_timeout_sweep(state: Arc<AppState>) {
    let mut ticker = interval(state.config.sweep_interval);
    info!("ride timeout sweep started");
    loop {
        ticker.tick().await;
        state.matching.sweep_expired().await;
    }
}
