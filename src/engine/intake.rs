use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::dispatch::DispatchEngine;
use crate::error::DispatchError;
use crate::models::courier::GeoPoint;
use crate::state::AppState;

/// Wire shape of the delivery-created message consumed from the bus.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryCreated {
    id: Uuid,
    pickup_address: Address,
    delivery_address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    coordinates: Coordinates,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    fn as_point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

pub async fn enqueue_delivery(state: &AppState, payload: Value) -> Result<(), DispatchError> {
    state
        .delivery_events_tx
        .send(payload)
        .await
        .map_err(|err| DispatchError::Internal(format!("delivery queue send failed: {err}")))?;

    state.metrics.deliveries_in_queue.inc();
    Ok(())
}

/// Consumes delivery-created payloads and dispatches each one. There is no
/// caller to answer on this path: malformed payloads are logged and dropped,
/// assignment failures are logged only.
pub async fn run_delivery_intake(engine: Arc<DispatchEngine>, mut rx: mpsc::Receiver<Value>) {
    info!("delivery intake started");

    while let Some(payload) = rx.recv().await {
        engine.state.metrics.deliveries_in_queue.dec();

        let event: DeliveryCreated = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping malformed delivery-created payload");
                continue;
            }
        };

        let pickup = event.pickup_address.coordinates.as_point();
        let dropoff = event
            .delivery_address
            .as_ref()
            .map(|address| address.coordinates.as_point());

        match engine.assign_delivery(event.id, pickup, dropoff).await {
            Ok(assignment) => {
                info!(
                    delivery_id = %event.id,
                    courier_id = %assignment.courier_id,
                    assignment_id = %assignment.id,
                    "delivery-created event dispatched"
                );
            }
            Err(err) => {
                error!(error = %err, delivery_id = %event.id, "failed to dispatch delivery");
            }
        }
    }

    warn!("delivery intake stopped: queue channel closed");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::{enqueue_delivery, run_delivery_intake};
    use crate::client::RouteOptimizerClient;
    use crate::engine::dispatch::DispatchEngine;
    use crate::models::courier::{Courier, CourierStatus, GeoPoint};
    use crate::state::AppState;

    #[tokio::test]
    async fn delivery_created_event_triggers_assignment() {
        let (state, rx) = AppState::new(8, 8);
        let state = Arc::new(state);

        let courier = Courier {
            id: Uuid::new_v4(),
            first_name: "Test".to_string(),
            last_name: "Courier".to_string(),
            email: "courier@example.com".to_string(),
            phone: "+330000000".to_string(),
            location: Some(GeoPoint {
                lat: 48.8566,
                lng: 2.3522,
            }),
            status: CourierStatus::Available,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let courier_id = courier.id;
        state.couriers.insert(courier_id, courier);

        let routes = RouteOptimizerClient::new("http://127.0.0.1:9", 1, Duration::from_millis(1));
        let engine = Arc::new(DispatchEngine::new(state.clone(), routes, 10.0, 20.0));
        tokio::spawn(run_delivery_intake(engine, rx));

        let delivery_id = Uuid::new_v4();
        enqueue_delivery(
            &state,
            json!({
                "id": delivery_id,
                "pickupAddress": {
                    "coordinates": { "latitude": 48.8570, "longitude": 2.3530 }
                }
            }),
        )
        .await
        .unwrap();

        // intake runs asynchronously
        for _ in 0..50 {
            if !state.assignments.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(state.assignments.len(), 1);
        let assignment = state.assignments.iter().next().unwrap().value().clone();
        assert_eq!(assignment.delivery_id, delivery_id);
        assert_eq!(assignment.courier_id, courier_id);
        assert_eq!(
            state.couriers.get(&courier_id).unwrap().status,
            CourierStatus::Busy
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let (state, rx) = AppState::new(8, 8);
        let state = Arc::new(state);

        let routes = RouteOptimizerClient::new("http://127.0.0.1:9", 1, Duration::from_millis(1));
        let engine = Arc::new(DispatchEngine::new(state.clone(), routes, 10.0, 20.0));
        tokio::spawn(run_delivery_intake(engine, rx));

        enqueue_delivery(&state, json!({ "not": "a delivery" }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.assignments.is_empty());
    }
}
