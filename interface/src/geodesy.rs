//! Great-circle distance and bearing on a spherical Earth.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points given in degrees,
/// using the Haversine formula.
#[must_use]
pub fn distance_between(
    start_latitude: f64,
    start_longitude: f64,
    end_latitude: f64,
    end_longitude: f64,
) -> f64 {
    let d_lat = (end_latitude - start_latitude).to_radians();
    let d_lon = (end_longitude - start_longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + start_latitude.to_radians().cos()
            * end_latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing in degrees from the start point towards the end point.
///
/// The result lies in `[-180, 180)`: 0 is north, 90 east, -90 west and due
/// south is reported as -180. The bearing back from the end point is in
/// general not the negation of this value.
#[must_use]
pub fn bearing_between(
    start_latitude: f64,
    start_longitude: f64,
    end_latitude: f64,
    end_longitude: f64,
) -> f64 {
    let start_lat = start_latitude.to_radians();
    let end_lat = end_latitude.to_radians();
    let d_lon = (end_longitude - start_longitude).to_radians();

    let y = d_lon.sin() * end_lat.cos();
    let x = start_lat.cos() * end_lat.sin() - start_lat.sin() * end_lat.cos() * d_lon.cos();

    let bearing = y.atan2(x).to_degrees();
    if bearing >= 180.0 { bearing - 360.0 } else { bearing }
}
