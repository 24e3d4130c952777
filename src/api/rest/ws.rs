use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bus::BusEvent;
use crate::error::AppError;
use crate::gateway::auth::{Identity, UserType};
use crate::gateway::rate_limit::{ConnectionRateLimiter, EventClass};
use crate::gateway::{Session, ride_room};
use crate::geo::GeoPoint;
use crate::models::events::{ClientEvent, ServerEvent};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Authenticates before upgrading; a bad token refuses the handshake.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();
    let identity = state
        .auth
        .verify(&token)
        .map_err(|err| AppError::Unauthorized(err.to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (session, mut outbound) = state.gateway.register(identity.user_id, identity.user_type);
    state.metrics.connections.inc();
    info!(
        user_id = %identity.user_id,
        user_type = ?identity.user_type,
        socket_id = %session.socket_id,
        "client connected"
    );

    // A reconnect inside the grace window restores driver liveness;
    // authentication alone never implies online.
    if identity.user_type == UserType::Driver {
        state.location.set_reconnected(identity.user_id);
    }

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut limiter = ConnectionRateLimiter::new(
        state.config.location_rate_per_sec,
        state.config.accept_rate_per_sec,
        state.config.ping_rate_per_sec,
    );

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_event(&state, &session, &mut limiter, event).await,
                Err(err) => {
                    debug!(socket_id = %session.socket_id, error = %err, "dropped malformed frame");
                    session.send(&ServerEvent::Error {
                        message: format!("invalid payload: {err}"),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    let was_last_session = state.gateway.unregister(&session);
    state.metrics.connections.dec();
    info!(socket_id = %session.socket_id, "client disconnected");

    if identity.user_type == UserType::Driver && was_last_session {
        state.location.set_disconnected(identity.user_id);
        state.bus.publish(BusEvent::DriverDisconnected {
            driver_id: identity.user_id,
        });
        let backend = state.backend.clone();
        let driver_id = identity.user_id;
        tokio::spawn(async move {
            if let Err(err) = backend
                .post_event("driver.disconnected", json!({ "driver_id": driver_id }))
                .await
            {
                warn!(driver_id = %driver_id, error = %err, "failed to post disconnect event");
            }
        });
    }
}

async fn handle_event(
    state: &AppState,
    session: &Session,
    limiter: &mut ConnectionRateLimiter,
    event: ClientEvent,
) {
    match event {
        ClientEvent::DriverOnline {
            location,
            category_id,
            vehicle_id,
            zone_id,
        } => {
            if !require_role(session, UserType::Driver) {
                return;
            }
            if !state
                .location
                .set_online(session.user_id, location, category_id, vehicle_id, zone_id)
            {
                session.send(&ServerEvent::Error {
                    message: "invalid coordinates".to_string(),
                });
            }
        }
        ClientEvent::DriverOffline => {
            if !require_role(session, UserType::Driver) {
                return;
            }
            state.location.set_offline(session.user_id);
        }
        ClientEvent::DriverLocation {
            latitude,
            longitude,
            speed,
            heading,
            accuracy,
        } => {
            if !require_role(session, UserType::Driver) {
                return;
            }
            if !allow(state, session, limiter, EventClass::Location) {
                return;
            }
            state.location.update_location(
                session.user_id,
                GeoPoint::new(latitude, longitude),
                speed,
                heading,
                accuracy,
            );
            state.metrics.location_updates_total.inc();
        }
        ClientEvent::DriverAcceptRide { ride_id } => {
            if !require_role(session, UserType::Driver) {
                return;
            }
            if !limiter.allow(EventClass::Accept) {
                state
                    .metrics
                    .rate_limited_total
                    .with_label_values(&[EventClass::Accept.as_str()])
                    .inc();
                session.send(&ServerEvent::RideAcceptFailed {
                    ride_id,
                    reason: crate::models::ride::AcceptRejection::RateLimited,
                });
                return;
            }

            // Synchronous outcome within one round trip, success or not.
            match state.matching.accept(ride_id, session.user_id).await {
                Ok(()) => {
                    state.gateway.join_room(session, &ride_room(ride_id));
                    session.send(&ServerEvent::RideAcceptSuccess { ride_id });
                }
                Err(reason) => {
                    session.send(&ServerEvent::RideAcceptFailed { ride_id, reason });
                }
            }
        }
        ClientEvent::CustomerSubscribeRide { ride_id } => {
            let subscribed =
                state
                    .matching
                    .can_user_access_ride(session.user_id, session.user_type, ride_id);
            if subscribed {
                state.gateway.join_room(session, &ride_room(ride_id));
            }
            session.send(&ServerEvent::SubscribeAck {
                ride_id,
                subscribed,
            });
        }
        ClientEvent::CustomerUnsubscribeRide { ride_id } => {
            state.gateway.leave_room(session, &ride_room(ride_id));
            session.send(&ServerEvent::SubscribeAck {
                ride_id,
                subscribed: false,
            });
        }
        ClientEvent::Ping => {
            if !allow(state, session, limiter, EventClass::Ping) {
                return;
            }
            session.send(&ServerEvent::Pong);
        }
    }
}

fn require_role(session: &Session, role: UserType) -> bool {
    if session.user_type == role {
        true
    } else {
        session.send(&ServerEvent::Error {
            message: "event not permitted for this user type".to_string(),
        });
        false
    }
}

/// Applies the limiter and signals the rejection explicitly; abusive
/// bursts are never silently swallowed.
fn allow(
    state: &AppState,
    session: &Session,
    limiter: &mut ConnectionRateLimiter,
    class: EventClass,
) -> bool {
    if limiter.allow(class) {
        return true;
    }
    state
        .metrics
        .rate_limited_total
        .with_label_values(&[class.as_str()])
        .inc();
    session.send(&ServerEvent::Error {
        message: format!("rate limited: {}", class.as_str()),
    });
    false
}

