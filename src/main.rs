mod api;
mod client;
mod config;
mod engine;
mod error;
mod events;
mod geo;
mod models;
mod observability;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::engine::dispatch::DispatchEngine;

#[tokio::main]
async fn main() -> Result<(), error::DispatchError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let (app_state, delivery_rx) =
        state::AppState::new(config.delivery_queue_size, config.event_buffer_size);
    let shared_state = Arc::new(app_state);

    let dispatch_engine = Arc::new(DispatchEngine::from_config(shared_state, &config));

    tokio::spawn(engine::intake::run_delivery_intake(
        dispatch_engine.clone(),
        delivery_rx,
    ));

    let app = api::rest::router(dispatch_engine);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::DispatchError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::DispatchError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
