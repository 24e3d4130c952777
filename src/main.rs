mod api;
mod backend;
mod bus;
mod config;
mod error;
mod gateway;
mod geo;
mod location;
mod matching;
mod models;
mod observability;
mod spatial;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let backend = Arc::new(backend::HttpBackend::new(
        config.internal_api_url.clone(),
        config.internal_api_secret.clone(),
        config.backend_timeout,
    ));
    let state = Arc::new(state::AppState::new(config.clone(), backend)?);

    tokio::spawn(gateway::fanout::run_fanout(state.clone()));
    tokio::spawn(matching::timeout::run_timeout_sweep(state.clone()));
    tokio::spawn(location::run_presence_sweep(state.clone()));

    let app = api::rest::router(state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        instance_id = %state.bus.instance_id(),
        "dispatch server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
