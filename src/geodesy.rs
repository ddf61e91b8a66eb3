//! Distance helpers shared by every component.
//!
//! Two approximations live here and are not interchangeable:
//! - `haversine_distance`: great-circle distance, used for planning and
//!   route totals.
//! - `planar_distance`: equirectangular approximation, only valid over a few
//!   hundred meters; used for the frequent outlier and arrival checks.

use crate::smoothing::normalize_degrees;
use crate::types::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude in the planar approximation.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Great-circle distance in meters on a spherical Earth.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Equirectangular distance in meters, scaled at the latitude of `a`.
pub fn planar_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let dy = (b.latitude - a.latitude) * METERS_PER_DEGREE;
    let dx = (b.longitude - a.longitude) * METERS_PER_DEGREE * a.latitude.to_radians().cos();
    (dx * dx + dy * dy).sqrt()
}

/// Sum of consecutive haversine legs.
pub fn path_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(pair[0], pair[1]))
        .sum()
}

/// Initial great-circle bearing from `a` towards `b`, degrees clockwise from north in [0, 360).
pub fn initial_bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let y = d_lon.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lon.cos();
    normalize_degrees(y.atan2(x).to_degrees())
}
