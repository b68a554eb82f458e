use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CourierStatus {
    Available,
    Busy,
    Offline,
    OnBreak,
}

/// A delivery agent from the courier directory. Contact fields are opaque to
/// the dispatcher; it only reads the location and transitions the status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    /// Both coordinates or neither; a courier without a location is never
    /// considered for assignment.
    pub location: Option<GeoPoint>,
    pub status: CourierStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
