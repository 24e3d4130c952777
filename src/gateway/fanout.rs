use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, RideLifecycle};
use crate::gateway::ride_room;
use crate::models::events::ServerEvent;
use crate::state::AppState;

/// Bridges the shared event bus onto local rooms. Every instance runs one
/// of these; together they make socket placement irrelevant.
pub async fn run_fanout(state: Arc<AppState>) {
    let mut rx = state.bus.subscribe();
    info!(instance_id = %state.bus.instance_id(), "event fan-out started");

    loop {
        match rx.recv().await {
            Ok(envelope) => dispatch(&state, envelope.event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "fan-out lagged behind the event bus");
            }
            Err(RecvError::Closed) => {
                warn!("event bus closed; fan-out stopped");
                return;
            }
        }
    }
}

fn dispatch(state: &AppState, event: BusEvent) {
    match event {
        BusEvent::RideNew {
            ride_id,
            pickup,
            category_id,
            candidates,
        } => {
            let offer = ServerEvent::RideNew {
                ride_id,
                pickup,
                category_id,
            };
            for driver_id in candidates {
                state.gateway.emit_to_user(driver_id, &offer);
            }
        }
        BusEvent::RideAccepted {
            ride_id,
            driver_id,
            losers,
        } => {
            for loser in losers {
                state
                    .gateway
                    .emit_to_user(loser, &ServerEvent::RideTaken { ride_id });
            }
            state.gateway.emit_to_room(
                &ride_room(ride_id),
                &ServerEvent::RideAccepted { ride_id, driver_id },
            );
        }
        BusEvent::RideCancelled {
            ride_id,
            candidates,
        } => {
            let cancelled = ServerEvent::RideCancelled { ride_id };
            for driver_id in candidates {
                state.gateway.emit_to_user(driver_id, &cancelled);
            }
            state.gateway.emit_to_room(&ride_room(ride_id), &cancelled);
        }
        BusEvent::RideExpired { ride_id } => {
            state
                .gateway
                .emit_to_room(&ride_room(ride_id), &ServerEvent::RideExpired { ride_id });
        }
        BusEvent::RideState { ride_id, state: lifecycle } => {
            let event = match lifecycle {
                RideLifecycle::Started => ServerEvent::RideStarted { ride_id },
                RideLifecycle::Completed => ServerEvent::RideCompleted { ride_id },
                RideLifecycle::Cancelled => ServerEvent::RideCancelled { ride_id },
            };
            state.gateway.emit_to_room(&ride_room(ride_id), &event);

            // A finished trip frees the winner on whichever instance holds
            // their presence.
            if lifecycle != RideLifecycle::Started {
                if let Some(driver_id) = state
                    .matching
                    .offer(ride_id)
                    .and_then(|offer| offer.winning_driver_id)
                {
                    state.location.set_available(driver_id);
                }
            }
        }
        BusEvent::DriverDisconnected { driver_id } => {
            // Nothing for clients; kept on the bus so every instance can
            // observe churn uniformly.
            debug!(driver_id = %driver_id, "driver disconnect notice");
        }
    }
}
