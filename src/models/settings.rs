use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceZone {
    pub center: GeoPoint,
    #[serde(rename = "radiusMeters")]
    pub radius_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub location: GeoPoint,
}

pub const DEFAULT_GEOFENCE: GeofenceZone = GeofenceZone {
    center: GeoPoint {
        lat: -12.2243674,
        lng: -38.9630476,
    },
    radius_m: 500.0,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub roster_refresh: Duration,
    pub location_report: Duration,
    pub geofence: GeofenceZone,
    pub destinations: Vec<Destination>,
    pub monitoring_enabled: bool,
    pub tracked_keys: HashSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            roster_refresh: DEFAULT_INTERVAL,
            location_report: DEFAULT_INTERVAL,
            geofence: DEFAULT_GEOFENCE,
            destinations: Vec::new(),
            monitoring_enabled: false,
            tracked_keys: HashSet::new(),
        }
    }
}

impl Settings {
    pub fn endpoint_configured(&self) -> bool {
        !self.api_url.trim().is_empty()
    }
}
