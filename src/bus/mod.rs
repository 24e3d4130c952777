use tokio::sync::broadcast;
use uuid::Uuid;

use crate::geo::GeoPoint;

/// Trip lifecycle changes relayed from the business layer into ride rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideLifecycle {
    Started,
    Completed,
    Cancelled,
}

/// State changes that must reach every gateway instance. Published once by
/// the instance that owns the logical event; each instance re-emits to its
/// local rooms, so a socket can live anywhere.
#[derive(Debug, Clone)]
pub enum BusEvent {
    RideNew {
        ride_id: Uuid,
        pickup: GeoPoint,
        category_id: String,
        candidates: Vec<Uuid>,
    },
    RideAccepted {
        ride_id: Uuid,
        driver_id: Uuid,
        losers: Vec<Uuid>,
    },
    RideCancelled {
        ride_id: Uuid,
        candidates: Vec<Uuid>,
    },
    RideExpired {
        ride_id: Uuid,
    },
    RideState {
        ride_id: Uuid,
        state: RideLifecycle,
    },
    DriverDisconnected {
        driver_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: Uuid,
    pub event: BusEvent,
}

/// In-process fan-out channel. The seam other instances attach to in a
/// multi-process deployment; locally it is a tokio broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    instance_id: Uuid,
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(capacity);
        Self {
            instance_id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn publish(&self, event: BusEvent) {
        // No subscribers is fine (e.g. during startup or in unit tests).
        let _ = self.tx.send(Envelope {
            origin: self.instance_id,
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publisher_also_receives_its_own_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let ride_id = Uuid::new_v4();
        bus.publish(BusEvent::RideExpired { ride_id });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.origin, bus.instance_id());
        assert!(matches!(envelope.event, BusEvent::RideExpired { ride_id: id } if id == ride_id));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = EventBus::new(4);
        bus.publish(BusEvent::DriverDisconnected {
            driver_id: Uuid::new_v4(),
        });
    }
}
