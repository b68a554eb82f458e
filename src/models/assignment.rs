use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            AssignmentStatus::Assigned | AssignmentStatus::InProgress => false,
            AssignmentStatus::Completed | AssignmentStatus::Cancelled => true,
        }
    }

    /// Legal lifecycle edges: Assigned -> InProgress -> Completed, and any
    /// non-terminal state -> Cancelled. Terminal states are sinks.
    pub fn can_transition_to(self, next: AssignmentStatus) -> bool {
        match (self, next) {
            (AssignmentStatus::Assigned, AssignmentStatus::InProgress) => true,
            (AssignmentStatus::Assigned, AssignmentStatus::Cancelled) => true,
            (AssignmentStatus::InProgress, AssignmentStatus::Completed) => true,
            (AssignmentStatus::InProgress, AssignmentStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// The binding of one delivery to one courier. Holds the courier by id only;
/// the courier record lives in the directory and outlives the assignment.
/// Assignments are never deleted, only transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub delivery_id: Uuid,
    /// Correlation id returned by the routing service; absent when route
    /// creation failed or was skipped.
    pub route_id: Option<Uuid>,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(courier_id: Uuid, delivery_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            courier_id,
            delivery_id,
            route_id: None,
            status: AssignmentStatus::Assigned,
            assigned_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::AssignmentStatus::*;

    #[test]
    fn terminal_states_are_sinks() {
        for next in [Assigned, InProgress, Completed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn cancel_reachable_from_any_active_state() {
        assert!(Assigned.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Cancelled));
    }

    #[test]
    fn happy_path_edges() {
        assert!(Assigned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        // no skipping straight to Completed
        assert!(!Assigned.can_transition_to(Completed));
    }
}
