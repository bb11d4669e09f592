//! Great-circle geometry.
//!
//! [`haversine_km`] is the distance every query reports. The k-d tree stores
//! points as unit vectors ([`unit_vector`]); straight-line chord length between
//! unit vectors is monotonic in great-circle distance, so a Euclidean lower
//! bound on the chord converts to a great-circle lower bound via [`chord_to_km`].

use crate::types::Location;

/// Mean Earth radius (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance between two locations in kilometres.
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Location as a point on the unit sphere.
pub fn unit_vector(location: Location) -> [f64; 3] {
    let lat = location.latitude.to_radians();
    let lon = location.longitude.to_radians();
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

/// Great-circle distance for a chord of the unit sphere.
pub fn chord_to_km(chord: f64) -> f64 {
    2.0 * EARTH_RADIUS_KM * (chord / 2.0).clamp(0.0, 1.0).asin()
}

/// Great-circle distance between two unit vectors, computed through the chord.
///
/// Uses the same arithmetic as [`box_lower_bound_km`] on a degenerate box, so a
/// box bound never exceeds the distance to any point inside it, even where the
/// haversine formula loses precision (near the antipode).
pub fn unit_distance_km(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    box_lower_bound_km(a, b, b)
}

/// Lower bound on the great-circle distance from `point` to anything inside the box.
pub fn box_lower_bound_km(point: &[f64; 3], min: &[f64; 3], max: &[f64; 3]) -> f64 {
    let mut sq = 0.0;
    for axis in 0..3 {
        let d = if point[axis] < min[axis] {
            min[axis] - point[axis]
        } else if point[axis] > max[axis] {
            point[axis] - max[axis]
        } else {
            0.0
        };
        sq += d * d;
    }
    chord_to_km(sq.sqrt())
}
