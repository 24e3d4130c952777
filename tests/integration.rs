use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ride_dispatch::api::rest::router;
use ride_dispatch::backend::HttpBackend;
use ride_dispatch::config::Config;
use ride_dispatch::state::AppState;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "dev-internal-secret";

fn setup() -> (axum::Router, Arc<AppState>) {
    setup_with(Config::default())
}

fn setup_with(config: Config) -> (axum::Router, Arc<AppState>) {
    // Backend points at a closed port; none of these tests reach it.
    let backend = Arc::new(HttpBackend::new(
        "http://127.0.0.1:1".to_string(),
        config.internal_api_secret.clone(),
        config.backend_timeout,
    ));
    let state = Arc::new(AppState::new(config, backend).unwrap());
    (router(state.clone()), state)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn internal_post(uri: &str, secret: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-internal-secret", secret);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn ride_request_body(ride_id: Uuid) -> Value {
    json!({
        "ride_id": ride_id,
        "pickup": { "latitude": 30.045, "longitude": 31.235 },
        "category_id": "budget"
    })
}

#[tokio::test]
async fn health_returns_ok_with_counts() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["online_drivers"], 0);
    assert_eq!(body["broadcasting_offers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("connections"));
    assert!(body.contains("location_updates_total"));
}

#[tokio::test]
async fn health_and_metrics_can_be_gated_by_api_key() {
    let config = Config {
        metrics_api_key: Some("ops-key".to_string()),
        ..Config::default()
    };
    let (app, _state) = setup_with(config);

    let response = app
        .clone()
        .oneshot(get_request("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("x-api-key", "ops-key")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn internal_routes_reject_missing_or_wrong_secret() {
    let (app, _state) = setup();

    let ride_id = Uuid::new_v4();
    let response = app
        .clone()
        .oneshot(internal_post(
            "/internal/ride/request",
            None,
            ride_request_body(ride_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(internal_post(
            "/internal/ride/request",
            Some("wrong"),
            ride_request_body(ride_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ride_request_opens_a_broadcasting_offer() {
    let (app, state) = setup();
    let ride_id = Uuid::new_v4();

    let response = app
        .oneshot(internal_post(
            "/internal/ride/request",
            Some(SECRET),
            ride_request_body(ride_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ride_id"], ride_id.to_string());
    assert_eq!(body["status"], "broadcasting");
    assert_eq!(body["candidates"], json!([]));

    assert_eq!(state.matching.broadcasting_count(), 1);
}

#[tokio::test]
async fn second_request_for_same_ride_conflicts() {
    let (app, _state) = setup();
    let ride_id = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(internal_post(
            "/internal/ride/request",
            Some(SECRET),
            ride_request_body(ride_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(internal_post(
            "/internal/ride/request",
            Some(SECRET),
            ride_request_body(ride_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_pickup_is_rejected() {
    let (app, _state) = setup();
    let response = app
        .oneshot(internal_post(
            "/internal/ride/request",
            Some(SECRET),
            json!({
                "ride_id": Uuid::new_v4(),
                "pickup": { "latitude": 95.0, "longitude": 31.235 },
                "category_id": "budget"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_succeeds_once_then_conflicts() {
    let (app, _state) = setup();
    let ride_id = Uuid::new_v4();

    app.clone()
        .oneshot(internal_post(
            "/internal/ride/request",
            Some(SECRET),
            ride_request_body(ride_id),
        ))
        .await
        .unwrap();

    let cancel_uri = format!("/internal/ride/{ride_id}/cancel");
    let response = app
        .clone()
        .oneshot(internal_post(&cancel_uri, Some(SECRET), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(internal_post(&cancel_uri, Some(SECRET), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn ride_state_relay_is_accepted() {
    let (app, state) = setup();
    let ride_id = Uuid::new_v4();
    let mut bus_rx = state.bus.subscribe();

    let response = app
        .oneshot(internal_post(
            &format!("/internal/ride/{ride_id}/state"),
            Some(SECRET),
            json!({ "state": "started" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let envelope = bus_rx.recv().await.unwrap();
    assert!(matches!(
        envelope.event,
        ride_dispatch::bus::BusEvent::RideState { ride_id: id, .. } if id == ride_id
    ));
}

#[tokio::test]
async fn cell_stats_reflect_recorded_demand() {
    let (app, _state) = setup();
    let ride_id = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(get_request(
            "/internal/cells?latitude=30.045&longitude=31.235",
        ))
        .await
        .unwrap();
    // Secret required here too.
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/internal/cells?latitude=30.045&longitude=31.235")
        .header("x-internal-secret", SECRET)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.clone()
        .oneshot(internal_post(
            "/internal/ride/request",
            Some(SECRET),
            ride_request_body(ride_id),
        ))
        .await
        .unwrap();

    let request = Request::builder()
        .method("GET")
        .uri("/internal/cells?latitude=30.045&longitude=31.235")
        .header("x-internal-secret", SECRET)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["demand_by_category"]["budget"], 1);
}

// Upgrade requests need a live connection; `oneshot` cannot carry one.
async fn ws_handshake_status(token: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (app, _state) = setup();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws?token={token} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]).to_string();
    response
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn websocket_handshake_refuses_bad_token() {
    let status = ws_handshake_status("driver:not-a-uuid:dev-auth-secret").await;
    assert!(status.contains("401"), "unexpected status line: {status}");
}

#[tokio::test]
async fn websocket_handshake_upgrades_with_valid_token() {
    let token = format!("driver:{}:dev-auth-secret", Uuid::new_v4());
    let status = ws_handshake_status(&token).await;
    assert!(status.contains("101"), "unexpected status line: {status}");
}
