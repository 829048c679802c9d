//! Great-circle geometry on a spherical Earth
//!
//! Every distance in the crate goes through these functions so geofence radii,
//! route legs and speeds agree with each other. Inputs are assumed finite;
//! callers validate samples before they get here.

use crate::domain::types::Location;
use serde::Serialize;

/// Mean Earth radius used for every calculation (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude on the sphere above
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Haversine distance in meters
pub fn distance_meters(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push h just past 1 for antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Initial bearing from `a` to `b`, in [0, 360)
pub fn bearing_degrees(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();

    normalize_bearing(y.atan2(x).to_degrees())
}

/// Wrap any angle into [0, 360)
pub fn normalize_bearing(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Eight-point compass rose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompassDirection {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl CompassDirection {
    const ROSE: [CompassDirection; 8] = [
        CompassDirection::N,
        CompassDirection::NE,
        CompassDirection::E,
        CompassDirection::SE,
        CompassDirection::S,
        CompassDirection::SW,
        CompassDirection::W,
        CompassDirection::NW,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompassDirection::N => "N",
            CompassDirection::NE => "NE",
            CompassDirection::E => "E",
            CompassDirection::SE => "SE",
            CompassDirection::S => "S",
            CompassDirection::SW => "SW",
            CompassDirection::W => "W",
            CompassDirection::NW => "NW",
        }
    }
}

impl std::fmt::Display for CompassDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a bearing onto the nearest 45° compass bucket
pub fn compass_direction(bearing: f64) -> CompassDirection {
    let bucket = (normalize_bearing(bearing) / 45.0).round() as usize % 8;
    CompassDirection::ROSE[bucket]
}

/// Point reached after travelling `distance` meters from `origin` on `bearing`
pub fn destination_point(origin: Location, distance: f64, bearing: f64) -> Location {
    let delta = distance / EARTH_RADIUS_M;
    let theta = bearing.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lng1 = origin.longitude.to_radians();

    let sin_lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).clamp(-1.0, 1.0);
    let lat2 = sin_lat2.asin();
    let lng2 = lng1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * sin_lat2);

    Location::new(lat2.to_degrees(), normalize_longitude(lng2.to_degrees()))
}

/// Wrap a longitude into [-180, 180)
pub fn normalize_longitude(degrees: f64) -> f64 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        -180.0
    } else {
        wrapped
    }
}

/// Minutes needed to cover `distance` at `meters_per_minute`
#[inline]
pub fn walking_minutes(distance: f64, meters_per_minute: f64) -> f64 {
    if meters_per_minute <= 0.0 {
        return 0.0;
    }
    distance / meters_per_minute
}

/// Degree half-extents (lat, lng) of a box that contains every point within
/// `radius` meters of `center`. Longitude saturates at 180 near the poles.
pub fn degree_extents(center: Location, radius: f64) -> (f64, f64) {
    let lat_deg = radius / METERS_PER_DEGREE;
    let cos_lat = center.latitude.to_radians().cos().abs();
    let lng_deg = if cos_lat < 1e-6 {
        180.0
    } else {
        (lat_deg / cos_lat).min(180.0)
    };
    (lat_deg, lng_deg)
}
