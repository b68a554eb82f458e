use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::engine::dispatch::DispatchEngine;
use crate::engine::intake::enqueue_delivery;
use crate::error::DispatchError;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::courier::GeoPoint;

pub fn router() -> Router<Arc<DispatchEngine>> {
    Router::new()
        .route("/dispatch/assign", post(assign_delivery))
        .route(
            "/dispatch/assignments/:id/status",
            put(update_assignment_status),
        )
        .route(
            "/dispatch/couriers/:id/assignments",
            get(assignments_by_courier),
        )
        .route(
            "/dispatch/couriers/:id/assignments/active",
            get(active_assignments_by_courier),
        )
        .route(
            "/dispatch/couriers/:id/assignments/cancel",
            post(cancel_all_active),
        )
        .route(
            "/dispatch/events/delivery-created",
            post(ingest_delivery_created),
        )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignQuery {
    pub delivery_id: Uuid,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lon: Option<f64>,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    pub status: AssignmentStatus,
}

async fn assign_delivery(
    State(engine): State<Arc<DispatchEngine>>,
    Query(query): Query<AssignQuery>,
) -> Result<Json<Assignment>, DispatchError> {
    let pickup = GeoPoint {
        lat: query.pickup_lat,
        lng: query.pickup_lon,
    };

    let dropoff = match (query.dropoff_lat, query.dropoff_lon) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        (None, None) => None,
        _ => {
            return Err(DispatchError::Validation(
                "dropoffLat and dropoffLon must be provided together".to_string(),
            ))
        }
    };

    let assignment = engine
        .assign_delivery(query.delivery_id, pickup, dropoff)
        .await?;
    Ok(Json(assignment))
}

async fn update_assignment_status(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Assignment>, DispatchError> {
    let assignment = engine.update_assignment_status(id, query.status).await?;
    Ok(Json(assignment))
}

async fn assignments_by_courier(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Assignment>> {
    Json(engine.assignments_by_courier(id))
}

async fn active_assignments_by_courier(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Assignment>> {
    Json(engine.active_assignments_by_courier(id))
}

async fn cancel_all_active(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Assignment>>, DispatchError> {
    let cancelled = engine.cancel_all_active(id).await?;
    Ok(Json(cancelled))
}

/// Bus adapter: hands the raw payload to the intake loop, which owns parsing
/// and the log-and-drop policy for malformed messages.
async fn ingest_delivery_created(
    State(engine): State<Arc<DispatchEngine>>,
    Json(payload): Json<Value>,
) -> Result<StatusCode, DispatchError> {
    enqueue_delivery(&engine.state, payload).await?;
    Ok(StatusCode::ACCEPTED)
}
