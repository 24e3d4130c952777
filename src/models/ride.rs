use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Broadcasting,
    Accepted,
    Expired,
    Cancelled,
}

/// A ride looking for a driver. Owned by the matching service from creation
/// until it reaches a terminal state; afterward the ride record belongs to
/// the business layer.
#[derive(Debug, Clone)]
pub struct RideOffer {
    pub ride_id: Uuid,
    pub pickup: GeoPoint,
    pub zone_id: Option<String>,
    pub category_id: String,
    /// Candidate driver ids ordered by distance ascending. Distance decides
    /// who is invited; arrival order of accepts decides who wins.
    pub candidates: Vec<Uuid>,
    pub offered_at: DateTime<Utc>,
    pub deadline_at: Instant,
    pub status: OfferStatus,
    pub winning_driver_id: Option<Uuid>,
    pub cascade_count: u32,
    pub radius_km: f64,
}

impl RideOffer {
    pub fn is_broadcasting(&self) -> bool {
        self.status == OfferStatus::Broadcasting
    }
}

/// Reason codes sent with `ride:accept:failed`. Every rejected accept gets
/// one of these synchronously; silence is never an outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcceptRejection {
    RideTaken,
    NotACandidate,
    OfferExpired,
    OfferCancelled,
    UnknownRide,
    DriverNotOnline,
    AssignmentFailed,
    BackendUnavailable,
    RateLimited,
}

impl AcceptRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptRejection::RideTaken => "ride_taken",
            AcceptRejection::NotACandidate => "not_a_candidate",
            AcceptRejection::OfferExpired => "offer_expired",
            AcceptRejection::OfferCancelled => "offer_cancelled",
            AcceptRejection::UnknownRide => "unknown_ride",
            AcceptRejection::DriverNotOnline => "driver_not_online",
            AcceptRejection::AssignmentFailed => "assignment_failed",
            AcceptRejection::BackendUnavailable => "backend_unavailable",
            AcceptRejection::RateLimited => "rate_limited",
        }
    }
}
