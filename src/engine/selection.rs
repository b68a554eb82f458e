use crate::geo::haversine_km;
use crate::models::courier::{Courier, GeoPoint};

/// Picks the candidate strictly closest to `point` by great-circle distance.
/// Ties resolve to the first candidate in input order, so repeated calls on
/// the same list are deterministic. Candidates without a location cannot be
/// ranked and are skipped rather than treated as an error.
pub fn select_nearest<'a>(candidates: &'a [Courier], point: &GeoPoint) -> Option<&'a Courier> {
    let mut nearest: Option<(&Courier, f64)> = None;

    for candidate in candidates {
        let Some(location) = candidate.location.as_ref() else {
            continue;
        };

        let distance = haversine_km(location, point);
        match nearest {
            Some((_, best)) if distance >= best => {}
            _ => nearest = Some((candidate, distance)),
        }
    }

    nearest.map(|(courier, _)| courier)
}
