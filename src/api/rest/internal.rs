use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::bus::{BusEvent, RideLifecycle};
use crate::error::AppError;
use crate::matching::RideRequest;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/internal/health", get(internal_health))
        .route("/internal/ride/request", post(request_ride))
        .route("/internal/ride/:id/cancel", post(cancel_ride))
        .route("/internal/ride/:id/state", post(relay_ride_state))
        .route("/internal/cells", get(cell_stats))
}

/// Every /internal route is authenticated with the shared secret before
/// any business logic runs.
fn require_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers
        .get("x-internal-secret")
        .and_then(|v| v.to_str().ok());
    if provided == Some(state.config.internal_api_secret.as_str()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("invalid internal secret".into()))
    }
}

async fn internal_health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    require_secret(&state, &headers)?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn request_ride(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RideRequest>,
) -> Result<Json<Value>, AppError> {
    require_secret(&state, &headers)?;
    let offer = state.matching.open_offer(request)?;
    Ok(Json(json!({
        "ride_id": offer.ride_id,
        "status": "broadcasting",
        "candidates": offer.candidates,
        "radius_km": offer.radius_km,
    })))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    require_secret(&state, &headers)?;
    state.matching.cancel(ride_id)?;
    Ok(Json(json!({ "ride_id": ride_id, "cancelled": true })))
}

#[derive(Deserialize)]
struct RideStateBody {
    state: RideLifecycle,
}

/// Trip lifecycle relay from the business layer into the ride room.
async fn relay_ride_state(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RideStateBody>,
) -> Result<Json<Value>, AppError> {
    require_secret(&state, &headers)?;
    state.bus.publish(BusEvent::RideState {
        ride_id,
        state: body.state,
    });
    Ok(Json(json!({ "ride_id": ride_id, "relayed": true })))
}

#[derive(Deserialize)]
struct CellQuery {
    latitude: f64,
    longitude: f64,
}

/// Surge/heatmap read path for one cell.
async fn cell_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CellQuery>,
) -> Result<Json<Value>, AppError> {
    require_secret(&state, &headers)?;
    let point = crate::geo::GeoPoint::new(query.latitude, query.longitude);
    if !point.is_valid() {
        return Err(AppError::BadRequest("invalid coordinates".into()));
    }
    match state.grid.cell_stats(&point) {
        Some(stats) => Ok(Json(serde_json::to_value(stats).map_err(|err| {
            AppError::Internal(format!("failed to serialize cell stats: {err}"))
        })?)),
        None => Err(AppError::NotFound("no data for cell".into())),
    }
}
