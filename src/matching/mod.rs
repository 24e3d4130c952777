pub mod lock;
pub mod timeout;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{AssignmentBackend, BackendError};
use crate::bus::{BusEvent, EventBus};
use crate::error::AppError;
use crate::gateway::auth::UserType;
use crate::geo::GeoPoint;
use crate::location::LocationService;
use crate::matching::lock::LockStore;
use crate::models::ride::{AcceptRejection, OfferStatus, RideOffer};
use crate::observability::metrics::Metrics;
use crate::spatial::CandidateSearch;

/// A ride needing a driver, as posted by the business layer.
#[derive(Debug, Clone, Deserialize)]
pub struct RideRequest {
    pub ride_id: Uuid,
    pub pickup: GeoPoint,
    pub zone_id: Option<String>,
    pub category_id: String,
    pub radius_km: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MatchingPolicy {
    pub offer_deadline: Duration,
    pub default_radius_km: f64,
    pub cascade_radius_multiplier: f64,
    pub max_cascades: u32,
}

/// Owns the ride-offer protocol: broadcast race, atomic accept, cascade
/// and expiry. Accept evaluation for one ride is serialized by the lock
/// store; everything else is lock-free on the offer map.
pub struct MatchingService {
    offers: DashMap<Uuid, RideOffer>,
    locks: LockStore,
    search: CandidateSearch,
    location: Arc<LocationService>,
    backend: Arc<dyn AssignmentBackend>,
    bus: EventBus,
    metrics: Metrics,
    policy: MatchingPolicy,
}

impl MatchingService {
    pub fn new(
        search: CandidateSearch,
        location: Arc<LocationService>,
        backend: Arc<dyn AssignmentBackend>,
        bus: EventBus,
        metrics: Metrics,
        policy: MatchingPolicy,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            offers: DashMap::new(),
            locks: LockStore::new(lock_ttl),
            search,
            location,
            backend,
            bus,
            metrics,
            policy,
        }
    }

    /// Opens a broadcasting offer and invites every candidate at once.
    /// At most one broadcasting offer may exist per ride.
    pub fn open_offer(&self, request: RideRequest) -> Result<RideOffer, AppError> {
        if !request.pickup.is_valid() {
            return Err(AppError::BadRequest("invalid pickup coordinates".into()));
        }

        let radius_km = request.radius_km.unwrap_or(self.policy.default_radius_km);
        match self.offers.entry(request.ride_id) {
            Entry::Occupied(existing) if existing.get().is_broadcasting() => Err(
                AppError::Conflict(format!("ride {} is already broadcasting", request.ride_id)),
            ),
            entry => {
                let candidates = self.search.candidate_ids(
                    &request.pickup,
                    radius_km,
                    &request.category_id,
                    request.zone_id.as_deref(),
                );
                let offer = RideOffer {
                    ride_id: request.ride_id,
                    pickup: request.pickup,
                    zone_id: request.zone_id,
                    category_id: request.category_id,
                    candidates: candidates.clone(),
                    offered_at: Utc::now(),
                    deadline_at: Instant::now() + self.policy.offer_deadline,
                    status: OfferStatus::Broadcasting,
                    winning_driver_id: None,
                    cascade_count: 0,
                    radius_km,
                };

                match entry {
                    Entry::Occupied(mut slot) => {
                        slot.insert(offer.clone());
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(offer.clone());
                    }
                }

                self.metrics.offers_total.with_label_values(&["opened"]).inc();
                info!(
                    ride_id = %offer.ride_id,
                    candidates = offer.candidates.len(),
                    radius_km,
                    "ride offer broadcasting"
                );
                self.bus.publish(BusEvent::RideNew {
                    ride_id: offer.ride_id,
                    pickup: offer.pickup,
                    category_id: offer.category_id.clone(),
                    candidates,
                });
                Ok(offer)
            }
        }
    }

    /// Evaluates one driver's accept. First attempt through the lock plus
    /// the external assignment call wins; every other outcome is an
    /// explicit rejection. The external call is authoritative, so an
    /// attempt that reached it completes even if the socket died.
    pub async fn accept(&self, ride_id: Uuid, driver_id: Uuid) -> Result<(), AcceptRejection> {
        let start = Instant::now();
        let result = self.accept_inner(ride_id, driver_id).await;

        let outcome = match &result {
            Ok(()) => "won",
            Err(reason) => reason.as_str(),
        };
        self.metrics
            .accepts_total
            .with_label_values(&[outcome])
            .inc();
        self.metrics
            .accept_latency_seconds
            .with_label_values(&[if result.is_ok() { "won" } else { "rejected" }])
            .observe(start.elapsed().as_secs_f64());
        result
    }

    async fn accept_inner(&self, ride_id: Uuid, driver_id: Uuid) -> Result<(), AcceptRejection> {
        // Cheap rejections first; no lock needed for these.
        {
            let offer = self
                .offers
                .get(&ride_id)
                .ok_or(AcceptRejection::UnknownRide)?;
            match offer.status {
                OfferStatus::Broadcasting => {}
                OfferStatus::Accepted => return Err(AcceptRejection::RideTaken),
                OfferStatus::Expired => return Err(AcceptRejection::OfferExpired),
                OfferStatus::Cancelled => return Err(AcceptRejection::OfferCancelled),
            }
            if !offer.candidates.contains(&driver_id) {
                return Err(AcceptRejection::NotACandidate);
            }
        }
        if !self.location.is_dispatchable(driver_id) {
            return Err(AcceptRejection::DriverNotOnline);
        }

        // A held lock means someone else is mid-accept on this ride.
        let Some(lock_holder) = self.locks.try_acquire(ride_id) else {
            return Err(AcceptRejection::RideTaken);
        };

        let verdict = self.evaluate_under_lock(ride_id, driver_id).await;
        self.locks.release(ride_id, lock_holder);
        verdict
    }

    async fn evaluate_under_lock(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
    ) -> Result<(), AcceptRejection> {
        // Re-verify: the offer may have transitioned while we raced for
        // the lock.
        match self.offers.get(&ride_id).map(|o| o.status) {
            Some(OfferStatus::Broadcasting) => {}
            Some(OfferStatus::Accepted) => return Err(AcceptRejection::RideTaken),
            Some(OfferStatus::Expired) => return Err(AcceptRejection::OfferExpired),
            Some(OfferStatus::Cancelled) => return Err(AcceptRejection::OfferCancelled),
            None => return Err(AcceptRejection::UnknownRide),
        }

        match self.backend.assign_driver(ride_id, driver_id).await {
            Ok(()) => {
                let losers: Vec<Uuid> = {
                    let Some(mut offer) = self.offers.get_mut(&ride_id) else {
                        return Err(AcceptRejection::UnknownRide);
                    };
                    // The backend call may have outlived our lock TTL, in
                    // which case a sweeper or cancel already transitioned
                    // the offer; that transition stands.
                    match offer.status {
                        OfferStatus::Broadcasting => {}
                        OfferStatus::Accepted => return Err(AcceptRejection::RideTaken),
                        OfferStatus::Expired => return Err(AcceptRejection::OfferExpired),
                        OfferStatus::Cancelled => return Err(AcceptRejection::OfferCancelled),
                    }
                    offer.status = OfferStatus::Accepted;
                    offer.winning_driver_id = Some(driver_id);
                    offer
                        .candidates
                        .iter()
                        .copied()
                        .filter(|candidate| *candidate != driver_id)
                        .collect()
                };

                self.location.set_on_trip(driver_id);
                self.metrics
                    .offers_total
                    .with_label_values(&["accepted"])
                    .inc();
                info!(ride_id = %ride_id, driver_id = %driver_id, "ride assigned");
                self.bus.publish(BusEvent::RideAccepted {
                    ride_id,
                    driver_id,
                    losers,
                });
                Ok(())
            }
            // Assigned through another path; the offer stays broadcasting
            // and the sweep will resolve it.
            Err(BackendError::AlreadyAssigned) => Err(AcceptRejection::RideTaken),
            Err(BackendError::Rejected(reason)) => {
                warn!(ride_id = %ride_id, driver_id = %driver_id, reason, "assignment rejected");
                Err(AcceptRejection::AssignmentFailed)
            }
            // Nothing committed; pre-lock state is restored by releasing.
            Err(BackendError::Unavailable(reason)) => {
                warn!(ride_id = %ride_id, reason, "assignment backend unreachable");
                Err(AcceptRejection::BackendUnavailable)
            }
        }
    }

    /// Cancels a broadcasting offer on behalf of the business layer.
    /// Takes the assignment lock so it cannot interleave with an accept
    /// or a sweep transition.
    pub fn cancel(&self, ride_id: Uuid) -> Result<(), AppError> {
        let Some(lock_holder) = self.locks.try_acquire(ride_id) else {
            return Err(AppError::Conflict(format!(
                "ride {ride_id} has an accept in flight"
            )));
        };

        let result = (|| {
            let mut offer = self
                .offers
                .get_mut(&ride_id)
                .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;
            if !offer.is_broadcasting() {
                return Err(AppError::Conflict(format!(
                    "ride {ride_id} is not broadcasting"
                )));
            }
            offer.status = OfferStatus::Cancelled;
            Ok(offer.candidates.clone())
        })();
        self.locks.release(ride_id, lock_holder);

        let candidates = result?;
        self.metrics
            .offers_total
            .with_label_values(&["cancelled"])
            .inc();
        info!(ride_id = %ride_id, "ride offer cancelled");
        self.bus.publish(BusEvent::RideCancelled {
            ride_id,
            candidates,
        });
        Ok(())
    }

    /// Room-subscription authorization. Customers may watch any ride this
    /// service knows about; drivers only rides they were invited to or
    /// won. Ownership checks on the trip record belong to the business
    /// layer.
    pub fn can_user_access_ride(&self, user_id: Uuid, user_type: UserType, ride_id: Uuid) -> bool {
        match user_type {
            UserType::Customer => self.offers.contains_key(&ride_id),
            UserType::Driver => self
                .offers
                .get(&ride_id)
                .map(|offer| {
                    offer.candidates.contains(&user_id)
                        || offer.winning_driver_id == Some(user_id)
                })
                .unwrap_or(false),
        }
    }

    pub fn offer(&self, ride_id: Uuid) -> Option<RideOffer> {
        self.offers.get(&ride_id).map(|o| o.clone())
    }

    pub fn broadcasting_count(&self) -> usize {
        self.offers
            .iter()
            .filter(|entry| entry.value().is_broadcasting())
            .count()
    }
}
