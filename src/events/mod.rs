use tokio::sync::broadcast;
use tracing::debug;

use crate::models::assignment::Assignment;

/// Assignment lifecycle events published to the bus. Closed enum so a new
/// lifecycle stage forces a decision about its routing key.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Dispatched { assignment: Assignment },
    StatusChanged { assignment: Assignment },
    Cancelled { assignment: Assignment },
}

impl DispatchEvent {
    pub fn routing_key(&self) -> &'static str {
        match self {
            DispatchEvent::Dispatched { .. } => "delivery.dispatched",
            DispatchEvent::StatusChanged { .. } => "delivery.assignment.updated",
            DispatchEvent::Cancelled { .. } => "delivery.assignment.cancelled",
        }
    }

    pub fn assignment(&self) -> &Assignment {
        match self {
            DispatchEvent::Dispatched { assignment }
            | DispatchEvent::StatusChanged { assignment }
            | DispatchEvent::Cancelled { assignment } => assignment,
        }
    }
}

/// Best-effort publish. A send only fails when nobody is subscribed, which is
/// a normal state for the service, never an error for the caller.
pub fn publish(tx: &broadcast::Sender<DispatchEvent>, event: DispatchEvent) {
    let key = event.routing_key();
    let delivery_id = event.assignment().delivery_id;

    match tx.send(event) {
        Ok(receivers) => {
            debug!(routing_key = key, %delivery_id, receivers, "published dispatch event");
        }
        Err(_) => {
            debug!(routing_key = key, %delivery_id, "no subscribers for dispatch event");
        }
    }
}
