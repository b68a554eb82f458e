use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::DispatchEngine;
use crate::error::DispatchError;
use crate::models::courier::{Courier, CourierStatus, GeoPoint};

/// Courier directory surface. Onboarding and presence live outside the
/// dispatcher; these endpoints are the collaborator interface it reads from.
pub fn router() -> Router<Arc<DispatchEngine>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route("/couriers/:id/location", patch(update_courier_location))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn register_courier(
    State(engine): State<Arc<DispatchEngine>>,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<Json<Courier>, DispatchError> {
    if payload.first_name.trim().is_empty() || payload.last_name.trim().is_empty() {
        return Err(DispatchError::Validation(
            "courier name cannot be empty".to_string(),
        ));
    }

    if payload.email.trim().is_empty() {
        return Err(DispatchError::Validation(
            "email cannot be empty".to_string(),
        ));
    }

    let now = Utc::now();
    let courier = Courier {
        id: Uuid::new_v4(),
        first_name: payload.first_name,
        last_name: payload.last_name,
        email: payload.email,
        phone: payload.phone,
        location: payload.location,
        status: CourierStatus::Available,
        created_at: now,
        updated_at: now,
    };

    engine.state.couriers.insert(courier.id, courier.clone());
    Ok(Json(courier))
}

async fn list_couriers(State(engine): State<Arc<DispatchEngine>>) -> Json<Vec<Courier>> {
    let couriers = engine
        .state
        .couriers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(couriers)
}

async fn get_courier(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, DispatchError> {
    let courier = engine
        .state
        .couriers
        .get(&id)
        .ok_or_else(|| DispatchError::NotFound(format!("courier {id} not found")))?;

    Ok(Json(courier.value().clone()))
}

async fn update_courier_status(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, DispatchError> {
    // Busy is owned by the dispatch engine; external writers may only park
    // or free an idle courier.
    if payload.status == CourierStatus::Busy {
        return Err(DispatchError::Validation(
            "Busy is set by the dispatcher, not via the API".to_string(),
        ));
    }

    let mut courier = engine
        .state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| DispatchError::NotFound(format!("courier {id} not found")))?;

    // A Busy courier carries an active assignment; freeing them here would
    // let a second delivery book the same courier. Cancel or complete the
    // assignment instead.
    if courier.status == CourierStatus::Busy {
        return Err(DispatchError::Conflict(format!(
            "courier {id} has an active assignment"
        )));
    }

    courier.status = payload.status;
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}

async fn update_courier_location(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, DispatchError> {
    let mut courier = engine
        .state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| DispatchError::NotFound(format!("courier {id} not found")))?;

    courier.location = Some(payload.location);
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}
