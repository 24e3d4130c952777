pub mod internal;
pub mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(internal::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    online_drivers: usize,
    broadcasting_offers: usize,
}

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = &state.config.metrics_api_key else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("missing or invalid api key".into()))
    }
}

async fn health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<HealthResponse>, AppError> {
    check_api_key(&state, &headers)?;
    Ok(Json(HealthResponse {
        status: "ok",
        connections: state.gateway.connection_count(),
        online_drivers: state.location.online_driver_count(),
        broadcasting_offers: state.matching.broadcasting_count(),
    }))
}

async fn metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_api_key(&state, &headers)?;
    match state.metrics.encode() {
        Ok(body) => Ok((
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response()),
        Err(err) => Ok((StatusCode::INTERNAL_SERVER_ERROR, err).into_response()),
    }
}
