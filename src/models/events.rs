use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::ride::AcceptRejection;

/// Frames received from a connected client, `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "driver:online")]
    DriverOnline {
        location: GeoPoint,
        category_id: String,
        #[serde(default)]
        vehicle_id: Option<Uuid>,
        #[serde(default)]
        zone_id: Option<String>,
    },
    #[serde(rename = "driver:offline")]
    DriverOffline,
    #[serde(rename = "driver:location")]
    DriverLocation {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        speed: f64,
        #[serde(default)]
        heading: f64,
        #[serde(default)]
        accuracy: f64,
    },
    #[serde(rename = "driver:accept:ride")]
    DriverAcceptRide {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "customer:subscribe:ride")]
    CustomerSubscribeRide {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "customer:unsubscribe:ride")]
    CustomerUnsubscribeRide {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "ping")]
    Ping,
}

/// Frames sent to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "ride:new")]
    RideNew {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
        pickup: GeoPoint,
        category_id: String,
    },
    #[serde(rename = "ride:accept:success")]
    RideAcceptSuccess {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "ride:accept:failed")]
    RideAcceptFailed {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
        reason: AcceptRejection,
    },
    #[serde(rename = "ride:taken")]
    RideTaken {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "ride:accepted")]
    RideAccepted {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
        #[serde(rename = "driverId")]
        driver_id: Uuid,
    },
    #[serde(rename = "ride:started")]
    RideStarted {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "ride:completed")]
    RideCompleted {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "ride:cancelled")]
    RideCancelled {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "ride:expired")]
    RideExpired {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
    },
    #[serde(rename = "subscribe:ack")]
    SubscribeAck {
        #[serde(rename = "rideId")]
        ride_id: Uuid,
        subscribed: bool,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_deserialize_from_wire_names() {
        let frame = json!({
            "event": "driver:location",
            "data": { "latitude": 30.05, "longitude": 31.23, "speed": 12.5 }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        match event {
            ClientEvent::DriverLocation {
                latitude, heading, ..
            } => {
                assert!((latitude - 30.05).abs() < 1e-9);
                assert_eq!(heading, 0.0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn accept_uses_camel_case_ride_id() {
        let ride_id = Uuid::new_v4();
        let frame = json!({
            "event": "driver:accept:ride",
            "data": { "rideId": ride_id }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert!(matches!(event, ClientEvent::DriverAcceptRide { ride_id: id } if id == ride_id));
    }

    #[test]
    fn server_events_serialize_with_event_tag() {
        let ride_id = Uuid::new_v4();
        let frame = serde_json::to_value(ServerEvent::RideTaken { ride_id }).unwrap();
        assert_eq!(frame["event"], "ride:taken");
        assert_eq!(frame["data"]["rideId"], ride_id.to_string());
    }
}
