use crate::geo::BoundingBox;
use crate::models::courier::{Courier, CourierStatus, GeoPoint};
use crate::state::AppState;

/// Available couriers whose location falls inside the bounding box around
/// `point`. An empty result is a normal answer; the caller decides whether
/// to widen the radius. Couriers without a reported location never match.
pub fn find_available(state: &AppState, point: &GeoPoint, radius_km: f64) -> Vec<Courier> {
    let bbox = BoundingBox::around(point, radius_km);

    state
        .couriers
        .iter()
        .filter_map(|entry| {
            let courier = entry.value();
            let in_area = courier.status == CourierStatus::Available
                && courier
                    .location
                    .as_ref()
                    .is_some_and(|location| bbox.contains(location));

            if in_area {
                Some(courier.clone())
            } else {
                None
            }
        })
        .collect()
}
