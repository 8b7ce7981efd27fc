use crate::models::settings::{GeoPoint, GeofenceZone};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let h = (sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng).clamp(0.0, 1.0);
    let central_angle = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * central_angle
}

pub fn is_within(position: &GeoPoint, zone: &GeofenceZone) -> bool {
    haversine_m(position, &zone.center) <= zone.radius_m
}
