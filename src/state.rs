use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::events::DispatchEvent;
use crate::models::assignment::Assignment;
use crate::models::courier::{Courier, CourierStatus};
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub couriers: DashMap<Uuid, Courier>,
    pub assignments: DashMap<Uuid, Assignment>,
    pub delivery_events_tx: mpsc::Sender<serde_json::Value>,
    pub dispatch_events_tx: broadcast::Sender<DispatchEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        delivery_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<serde_json::Value>) {
        let (delivery_events_tx, delivery_events_rx) = mpsc::channel(delivery_queue_size);
        let (dispatch_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                couriers: DashMap::new(),
                assignments: DashMap::new(),
                delivery_events_tx,
                dispatch_events_tx,
                metrics: Metrics::new(),
            },
            delivery_events_rx,
        )
    }

    /// Compare-and-set claim of a courier: Available -> Busy, executed under
    /// the map's entry lock so two concurrent assignments cannot both win.
    /// Returns the claimed courier snapshot.
    pub fn claim_courier(&self, courier_id: Uuid) -> Result<Courier, DispatchError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| DispatchError::NotFound(format!("courier {courier_id} not found")))?;

        if courier.status != CourierStatus::Available {
            return Err(DispatchError::Conflict(format!(
                "courier {courier_id} is no longer available"
            )));
        }

        courier.status = CourierStatus::Busy;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    /// Flips a courier back to Available after its assignment reached a
    /// terminal state.
    pub fn release_courier(&self, courier_id: Uuid) -> Result<Courier, DispatchError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| DispatchError::NotFound(format!("courier {courier_id} not found")))?;

        courier.status = CourierStatus::Available;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::AppState;
    use crate::error::DispatchError;
    use crate::models::courier::{Courier, CourierStatus, GeoPoint};

    fn courier(status: CourierStatus) -> Courier {
        Courier {
            id: Uuid::new_v4(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "+3312345678".to_string(),
            location: Some(GeoPoint {
                lat: 48.85,
                lng: 2.35,
            }),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn claim_flips_available_to_busy() {
        let (state, _rx) = AppState::new(8, 8);
        let c = courier(CourierStatus::Available);
        let id = c.id;
        state.couriers.insert(id, c);

        let claimed = state.claim_courier(id).unwrap();
        assert_eq!(claimed.status, CourierStatus::Busy);
        assert_eq!(state.couriers.get(&id).unwrap().status, CourierStatus::Busy);
    }

    #[test]
    fn second_claim_loses_the_race() {
        let (state, _rx) = AppState::new(8, 8);
        let c = courier(CourierStatus::Available);
        let id = c.id;
        state.couriers.insert(id, c);

        state.claim_courier(id).unwrap();
        let err = state.claim_courier(id).unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[test]
    fn claim_rejects_offline_courier() {
        let (state, _rx) = AppState::new(8, 8);
        let c = courier(CourierStatus::Offline);
        let id = c.id;
        state.couriers.insert(id, c);

        let err = state.claim_courier(id).unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[test]
    fn claim_unknown_courier_is_not_found() {
        let (state, _rx) = AppState::new(8, 8);
        let err = state.claim_courier(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[test]
    fn release_restores_availability() {
        let (state, _rx) = AppState::new(8, 8);
        let c = courier(CourierStatus::Available);
        let id = c.id;
        state.couriers.insert(id, c);

        state.claim_courier(id).unwrap();
        let released = state.release_courier(id).unwrap();
        assert_eq!(released.status, CourierStatus::Available);
    }
}
