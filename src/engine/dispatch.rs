use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::RouteOptimizerClient;
use crate::config::Config;
use crate::engine::{locator, selection};
use crate::error::DispatchError;
use crate::events::{self, DispatchEvent};
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::courier::{Courier, GeoPoint};
use crate::state::AppState;

/// How many times a lost courier claim is retried with a fresh query before
/// the attempt is reported as no-courier-available.
const MAX_CLAIM_ATTEMPTS: u32 = 3;

/// Orchestrates courier discovery, nearest selection, the atomic claim, route
/// creation against the external optimizer, and event publication.
pub struct DispatchEngine {
    pub state: Arc<AppState>,
    routes: RouteOptimizerClient,
    initial_radius_km: f64,
    widened_radius_km: f64,
}

impl DispatchEngine {
    pub fn new(
        state: Arc<AppState>,
        routes: RouteOptimizerClient,
        initial_radius_km: f64,
        widened_radius_km: f64,
    ) -> Self {
        Self {
            state,
            routes,
            initial_radius_km,
            widened_radius_km,
        }
    }

    pub fn from_config(state: Arc<AppState>, config: &Config) -> Self {
        Self::new(
            state,
            RouteOptimizerClient::from_config(config),
            config.initial_radius_km,
            config.widened_radius_km,
        )
    }

    /// Assigns a delivery to the nearest available courier. The courier claim
    /// and the assignment insert are the committed unit; route creation and
    /// event publication afterwards are best-effort and never roll it back.
    pub async fn assign_delivery(
        &self,
        delivery_id: Uuid,
        pickup: GeoPoint,
        dropoff: Option<GeoPoint>,
    ) -> Result<Assignment, DispatchError> {
        let start = Instant::now();
        let result = self.assign_inner(delivery_id, pickup, dropoff).await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        self.state
            .metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.state
            .metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn assign_inner(
        &self,
        delivery_id: Uuid,
        pickup: GeoPoint,
        dropoff: Option<GeoPoint>,
    ) -> Result<Assignment, DispatchError> {
        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let Some(candidate) = self.find_nearest_available(&pickup) else {
                return Err(DispatchError::NoCourierAvailable);
            };

            match self.state.claim_courier(candidate.id) {
                Ok(claimed) => {
                    return Ok(self.book(claimed, delivery_id, pickup, dropoff).await);
                }
                // Someone else claimed (or removed) the courier between the
                // query and the claim; re-query and re-select.
                Err(DispatchError::Conflict(_)) | Err(DispatchError::NotFound(_)) => {
                    warn!(
                        %delivery_id,
                        courier_id = %candidate.id,
                        attempt,
                        "lost courier claim race, re-selecting"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        warn!(%delivery_id, "claim retries exhausted");
        Err(DispatchError::NoCourierAvailable)
    }

    /// Initial-radius search, widened exactly once when empty.
    fn find_nearest_available(&self, pickup: &GeoPoint) -> Option<Courier> {
        let mut candidates = locator::find_available(&self.state, pickup, self.initial_radius_km);

        if candidates.is_empty() {
            debug!(
                initial_radius_km = self.initial_radius_km,
                widened_radius_km = self.widened_radius_km,
                "no couriers in initial radius, widening search"
            );
            candidates = locator::find_available(&self.state, pickup, self.widened_radius_km);
        }

        selection::select_nearest(&candidates, pickup).cloned()
    }

    /// Runs after the claim committed: persists the assignment, attempts
    /// route creation in degraded-tolerant mode, publishes the event.
    async fn book(
        &self,
        courier: Courier,
        delivery_id: Uuid,
        pickup: GeoPoint,
        dropoff: Option<GeoPoint>,
    ) -> Assignment {
        let mut assignment = Assignment::new(courier.id, delivery_id);
        self.state
            .assignments
            .insert(assignment.id, assignment.clone());

        info!(
            %delivery_id,
            courier_id = %courier.id,
            assignment_id = %assignment.id,
            "delivery assigned"
        );

        match dropoff {
            Some(dropoff) => {
                match self
                    .routes
                    .create_route(delivery_id, courier.id, &pickup, &dropoff)
                    .await
                {
                    Ok(route_id) => {
                        assignment.route_id = Some(route_id);
                        if let Some(mut stored) = self.state.assignments.get_mut(&assignment.id) {
                            stored.route_id = Some(route_id);
                        }
                        info!(%delivery_id, %route_id, "route created");
                    }
                    Err(err) => {
                        self.state
                            .metrics
                            .route_client_failures_total
                            .with_label_values(&["create_route"])
                            .inc();
                        error!(
                            error = %err,
                            %delivery_id,
                            "route creation failed, assignment kept without a route"
                        );
                    }
                }
            }
            None => {
                debug!(%delivery_id, "no dropoff coordinates, skipping route creation");
            }
        }

        events::publish(
            &self.state.dispatch_events_tx,
            DispatchEvent::Dispatched {
                assignment: assignment.clone(),
            },
        );

        assignment
    }

    /// Applies a lifecycle transition. Entry into a terminal state releases
    /// the courier, keeping "Busy iff an active assignment exists" true.
    pub async fn update_assignment_status(
        &self,
        assignment_id: Uuid,
        next: AssignmentStatus,
    ) -> Result<Assignment, DispatchError> {
        let updated = {
            let mut assignment = self.state.assignments.get_mut(&assignment_id).ok_or_else(
                || DispatchError::NotFound(format!("assignment {assignment_id} not found")),
            )?;

            if !assignment.status.can_transition_to(next) {
                return Err(DispatchError::InvalidTransition {
                    from: format!("{:?}", assignment.status),
                    to: format!("{next:?}"),
                });
            }

            let now = Utc::now();
            assignment.status = next;
            assignment.updated_at = now;
            if next == AssignmentStatus::Completed {
                assignment.completed_at = Some(now);
            }
            assignment.clone()
            // entry lock dropped here, before touching the courier map
        };

        if next.is_terminal() {
            if let Err(err) = self.state.release_courier(updated.courier_id) {
                warn!(
                    error = %err,
                    courier_id = %updated.courier_id,
                    "could not release courier after terminal transition"
                );
            }
        }

        info!(
            %assignment_id,
            status = ?next,
            "assignment status updated"
        );

        let event = match next {
            AssignmentStatus::Cancelled => DispatchEvent::Cancelled {
                assignment: updated.clone(),
            },
            _ => DispatchEvent::StatusChanged {
                assignment: updated.clone(),
            },
        };
        events::publish(&self.state.dispatch_events_tx, event);

        Ok(updated)
    }

    pub fn assignments_by_courier(&self, courier_id: Uuid) -> Vec<Assignment> {
        let mut assignments: Vec<Assignment> = self
            .state
            .assignments
            .iter()
            .filter(|entry| entry.courier_id == courier_id)
            .map(|entry| entry.value().clone())
            .collect();
        assignments.sort_by_key(|a| a.assigned_at);
        assignments
    }

    pub fn active_assignments_by_courier(&self, courier_id: Uuid) -> Vec<Assignment> {
        let mut assignments: Vec<Assignment> = self
            .state
            .assignments
            .iter()
            .filter(|entry| entry.courier_id == courier_id && entry.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        assignments.sort_by_key(|a| a.assigned_at);
        assignments
    }

    /// Cancels every active assignment of a courier and frees the courier.
    /// Cancelled deliveries are not re-dispatched here.
    pub async fn cancel_all_active(
        &self,
        courier_id: Uuid,
    ) -> Result<Vec<Assignment>, DispatchError> {
        if !self.state.couriers.contains_key(&courier_id) {
            return Err(DispatchError::NotFound(format!(
                "courier {courier_id} not found"
            )));
        }

        let active_ids: Vec<Uuid> = self
            .state
            .assignments
            .iter()
            .filter(|entry| entry.courier_id == courier_id && entry.is_active())
            .map(|entry| entry.id)
            .collect();

        let mut cancelled = Vec::new();
        for id in active_ids {
            if let Some(mut assignment) = self.state.assignments.get_mut(&id) {
                if !assignment.is_active() {
                    continue;
                }
                assignment.status = AssignmentStatus::Cancelled;
                assignment.updated_at = Utc::now();
                cancelled.push(assignment.clone());
            }
        }

        self.state.release_courier(courier_id)?;

        info!(
            %courier_id,
            count = cancelled.len(),
            "cancelled active assignments"
        );

        for assignment in &cancelled {
            events::publish(
                &self.state.dispatch_events_tx,
                DispatchEvent::Cancelled {
                    assignment: assignment.clone(),
                },
            );
        }

        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::DispatchEngine;
    use crate::client::RouteOptimizerClient;
    use crate::error::DispatchError;
    use crate::models::assignment::AssignmentStatus;
    use crate::models::courier::{Courier, CourierStatus, GeoPoint};
    use crate::state::AppState;

    fn engine() -> DispatchEngine {
        let (state, _rx) = AppState::new(64, 64);
        // unroutable endpoint: tests exercise the degraded path or skip
        // route creation entirely by omitting the dropoff
        let routes =
            RouteOptimizerClient::new("http://127.0.0.1:9", 1, Duration::from_millis(1));
        DispatchEngine::new(Arc::new(state), routes, 10.0, 20.0)
    }

    fn add_courier(engine: &DispatchEngine, lat: f64, lng: f64) -> Uuid {
        let courier = Courier {
            id: Uuid::new_v4(),
            first_name: "Test".to_string(),
            last_name: "Courier".to_string(),
            email: "courier@example.com".to_string(),
            phone: "+330000000".to_string(),
            location: Some(GeoPoint { lat, lng }),
            status: CourierStatus::Available,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = courier.id;
        engine.state.couriers.insert(id, courier);
        id
    }

    fn courier_status(engine: &DispatchEngine, id: Uuid) -> CourierStatus {
        engine.state.couriers.get(&id).unwrap().status
    }

    #[tokio::test]
    async fn assigns_delivery_to_nearby_courier() {
        let engine = engine();
        let courier_id = add_courier(&engine, 48.8566, 2.3522);

        let delivery_id = Uuid::new_v4();
        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };

        let assignment = engine
            .assign_delivery(delivery_id, pickup, None)
            .await
            .unwrap();

        assert_eq!(assignment.courier_id, courier_id);
        assert_eq!(assignment.delivery_id, delivery_id);
        assert_eq!(assignment.status, AssignmentStatus::Assigned);
        assert!(assignment.route_id.is_none());
        assert_eq!(courier_status(&engine, courier_id), CourierStatus::Busy);
        assert_eq!(engine.state.assignments.len(), 1);
    }

    #[tokio::test]
    async fn picks_the_nearest_of_several_couriers() {
        let engine = engine();
        let _far = add_courier(&engine, 48.90, 2.40);
        let near = add_courier(&engine, 48.8570, 2.3530);

        let pickup = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let assignment = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();

        assert_eq!(assignment.courier_id, near);
    }

    #[tokio::test]
    async fn widens_search_radius_once() {
        let engine = engine();
        // ~15 km north of the pickup: outside the 10 km box, inside 20 km
        let courier_id = add_courier(&engine, 48.9916, 2.3522);

        let pickup = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let assignment = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();

        assert_eq!(assignment.courier_id, courier_id);
    }

    #[tokio::test]
    async fn fails_when_no_courier_available_anywhere() {
        let engine = engine();
        let offline = add_courier(&engine, 48.8566, 2.3522);
        engine
            .state
            .couriers
            .get_mut(&offline)
            .unwrap()
            .status = CourierStatus::Offline;

        let pickup = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let err = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NoCourierAvailable));
        assert!(engine.state.assignments.is_empty());
        assert_eq!(courier_status(&engine, offline), CourierStatus::Offline);
    }

    #[tokio::test]
    async fn route_failure_keeps_the_assignment() {
        let engine = engine();
        let courier_id = add_courier(&engine, 48.8566, 2.3522);

        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };
        let dropoff = GeoPoint {
            lat: 48.8584,
            lng: 2.2945,
        };

        // route service is unreachable; assignment must still commit
        let assignment = engine
            .assign_delivery(Uuid::new_v4(), pickup, Some(dropoff))
            .await
            .unwrap();

        assert_eq!(assignment.status, AssignmentStatus::Assigned);
        assert!(assignment.route_id.is_none());
        assert_eq!(courier_status(&engine, courier_id), CourierStatus::Busy);
    }

    #[tokio::test]
    async fn dispatched_event_is_published() {
        let engine = engine();
        add_courier(&engine, 48.8566, 2.3522);
        let mut rx = engine.state.dispatch_events_tx.subscribe();

        let delivery_id = Uuid::new_v4();
        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };
        engine
            .assign_delivery(delivery_id, pickup, None)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.routing_key(), "delivery.dispatched");
        assert_eq!(event.assignment().delivery_id, delivery_id);
    }

    #[tokio::test]
    async fn completion_releases_the_courier() {
        let engine = engine();
        let courier_id = add_courier(&engine, 48.8566, 2.3522);
        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };
        let assignment = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();

        engine
            .update_assignment_status(assignment.id, AssignmentStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(courier_status(&engine, courier_id), CourierStatus::Busy);

        let completed = engine
            .update_assignment_status(assignment.id, AssignmentStatus::Completed)
            .await
            .unwrap();

        assert_eq!(completed.status, AssignmentStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert!(completed.assigned_at <= completed.updated_at);
        assert_eq!(courier_status(&engine, courier_id), CourierStatus::Available);
    }

    #[tokio::test]
    async fn terminal_states_reject_further_transitions() {
        let engine = engine();
        add_courier(&engine, 48.8566, 2.3522);
        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };
        let assignment = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();

        engine
            .update_assignment_status(assignment.id, AssignmentStatus::InProgress)
            .await
            .unwrap();
        engine
            .update_assignment_status(assignment.id, AssignmentStatus::Completed)
            .await
            .unwrap();

        let err = engine
            .update_assignment_status(assignment.id, AssignmentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        let err = engine
            .update_assignment_status(assignment.id, AssignmentStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_assignment_is_not_found() {
        let engine = engine();
        let err = engine
            .update_assignment_status(Uuid::new_v4(), AssignmentStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_all_active_frees_the_courier() {
        let engine = engine();
        let courier_id = add_courier(&engine, 48.8566, 2.3522);
        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };
        engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();

        let cancelled = engine.cancel_all_active(courier_id).await.unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].status, AssignmentStatus::Cancelled);
        assert_eq!(courier_status(&engine, courier_id), CourierStatus::Available);

        // repeat call: nothing active, no error
        let cancelled = engine.cancel_all_active(courier_id).await.unwrap();
        assert!(cancelled.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_active_for_unknown_courier_is_not_found() {
        let engine = engine();
        let err = engine.cancel_all_active(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn listings_split_active_and_terminal() {
        let engine = engine();
        let courier_id = add_courier(&engine, 48.8566, 2.3522);
        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };

        let first = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();
        engine
            .update_assignment_status(first.id, AssignmentStatus::InProgress)
            .await
            .unwrap();
        engine
            .update_assignment_status(first.id, AssignmentStatus::Completed)
            .await
            .unwrap();

        let second = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();

        let all = engine.assignments_by_courier(courier_id);
        assert_eq!(all.len(), 2);

        let active = engine.active_assignments_by_courier(courier_id);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    // With three contenders over three couriers a task can lose the claim
    // race at most twice before the remaining courier is uncontested, so
    // every dispatch must land inside the claim-attempt bound.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatches_get_distinct_couriers() {
        let engine = Arc::new(engine());
        for _ in 0..3 {
            add_courier(&engine, 48.8566, 2.3522);
        }

        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };
        let mut handles = Vec::new();
        for _ in 0..3 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.assign_delivery(Uuid::new_v4(), pickup, None).await
            }));
        }

        let mut booked = std::collections::HashSet::new();
        for handle in handles {
            let assignment = handle.await.unwrap().unwrap();
            assert!(
                booked.insert(assignment.courier_id),
                "courier {} booked twice",
                assignment.courier_id
            );
        }

        assert_eq!(engine.state.assignments.len(), 3);
        for id in booked {
            assert_eq!(courier_status(&engine, id), CourierStatus::Busy);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatches_over_one_courier_book_it_once() {
        let engine = Arc::new(engine());
        let courier_id = add_courier(&engine, 48.8566, 2.3522);

        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };
        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.assign_delivery(Uuid::new_v4(), pickup, None).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(assignment) => {
                    assert_eq!(assignment.courier_id, courier_id);
                    successes += 1;
                }
                // loser of the claim race re-queries and finds nobody
                Err(err) => assert!(matches!(err, DispatchError::NoCourierAvailable)),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(engine.state.assignments.len(), 1);
        assert_eq!(courier_status(&engine, courier_id), CourierStatus::Busy);
    }

    #[tokio::test]
    async fn courier_never_double_booked() {
        let engine = engine();
        let courier_id = add_courier(&engine, 48.8566, 2.3522);
        let pickup = GeoPoint {
            lat: 48.8570,
            lng: 2.3530,
        };

        engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap();

        // the only courier is now Busy; a second delivery finds nobody
        let err = engine
            .assign_delivery(Uuid::new_v4(), pickup, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoCourierAvailable));
        assert_eq!(engine.active_assignments_by_courier(courier_id).len(), 1);
    }
}
