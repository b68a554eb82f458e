pub mod couriers;
pub mod dispatch;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::engine::dispatch::DispatchEngine;

pub fn router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .merge(couriers::router())
        .merge(dispatch::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    couriers: usize,
    assignments: usize,
}

async fn health(State(engine): State<Arc<DispatchEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        couriers: engine.state.couriers.len(),
        assignments: engine.state.assignments.len(),
    })
}

async fn metrics(State(engine): State<Arc<DispatchEngine>>) -> impl IntoResponse {
    match engine.state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
