use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, watch};

use crate::api::{ApiClient, RemoteConfig};
use crate::error::AppError;
use crate::models::settings::{Destination, GeofenceZone, Settings};
use crate::notify::Notices;
use crate::storage::{KvStore, keys};

#[derive(Debug, Clone)]
pub struct BootConfig {
    pub storage_path: PathBuf,
    pub log_level: String,
    pub http_timeout: Duration,
    pub event_buffer_size: usize,
}

impl BootConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            storage_path: env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("yard-agent.json")),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            http_timeout: Duration::from_secs(parse_or_default("HTTP_TIMEOUT_SECS", 10)?),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 64)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub api_url: Option<String>,
    pub roster_refresh: Option<Duration>,
    pub location_report: Option<Duration>,
    pub geofence: Option<GeofenceZone>,
}

pub struct ConfigStore {
    store: Arc<dyn KvStore>,
    notices: Arc<Notices>,
    current: watch::Sender<Settings>,
    init: OnceCell<()>,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn KvStore>, notices: Arc<Notices>) -> Self {
        let (current, _unused_rx) = watch::channel(Settings::default());
        Self {
            store,
            notices,
            current,
            init: OnceCell::new(),
        }
    }

    pub async fn load(&self) -> Settings {
        self.init
            .get_or_init(|| async {
                let loaded = self.load_fields().await;
                self.current.send_replace(loaded);
            })
            .await;
        self.settings()
    }

    pub fn ready(&self) -> bool {
        self.init.initialized()
    }

    pub fn settings(&self) -> Settings {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.current.subscribe()
    }

    async fn load_fields(&self) -> Settings {
        let mut settings = Settings::default();

        if let Some(url) = self.read_raw(keys::API_URL).await {
            settings.api_url = url;
        }
        if let Some(interval) = self.read_interval(keys::ROSTER_REFRESH_MS).await {
            settings.roster_refresh = interval;
        }
        if let Some(interval) = self.read_interval(keys::LOCATION_REPORT_MS).await {
            settings.location_report = interval;
        }
        if let Some(zone) = self.read_json::<GeofenceZone>(keys::GEOFENCE).await
            && zone.radius_m.is_finite()
            && zone.radius_m > 0.0
        {
            settings.geofence = zone;
        }
        if let Some(destinations) = self.read_json::<Vec<Destination>>(keys::DESTINATIONS).await {
            settings.destinations = destinations;
        }
        if let Some(raw) = self.read_raw(keys::MONITORING_ENABLED).await {
            match raw.parse() {
                Ok(flag) => settings.monitoring_enabled = flag,
                Err(_) => tracing::warn!(
                    key = keys::MONITORING_ENABLED,
                    "stored flag unreadable, using default"
                ),
            }
        }
        if let Some(list) = self.read_json::<Vec<String>>(keys::TRACKED_KEYS).await {
            settings.tracked_keys = list.into_iter().collect::<HashSet<_>>();
        }

        settings
    }

    async fn read_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "storage read failed, using default");
                None
            }
        }
    }

    async fn read_interval(&self, key: &str) -> Option<Duration> {
        let raw = self.read_raw(key).await?;
        match raw.parse::<u64>() {
            Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => {
                tracing::warn!(key, raw, "stored interval unreadable, using default");
                None
            }
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "stored value unreadable, using default");
                None
            }
        }
    }

    pub async fn save(&self, patch: SettingsPatch) -> Result<(), AppError> {
        validate_patch(&patch)?;

        self.current.send_modify(|settings| {
            if let Some(url) = &patch.api_url {
                settings.api_url = url.trim().to_string();
            }
            if let Some(interval) = patch.roster_refresh {
                settings.roster_refresh = interval;
            }
            if let Some(interval) = patch.location_report {
                settings.location_report = interval;
            }
            if let Some(zone) = patch.geofence {
                settings.geofence = zone;
            }
        });

        let result = self.persist_patch(&patch).await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "settings persisted incompletely");
            self.notices
                .error("Settings saved for this session but could not be stored");
        }
        result
    }

    async fn persist_patch(&self, patch: &SettingsPatch) -> Result<(), AppError> {
        if let Some(url) = &patch.api_url {
            self.store.set(keys::API_URL, url.trim()).await?;
        }
        if let Some(interval) = patch.roster_refresh {
            self.store
                .set(keys::ROSTER_REFRESH_MS, &interval.as_millis().to_string())
                .await?;
        }
        if let Some(interval) = patch.location_report {
            self.store
                .set(keys::LOCATION_REPORT_MS, &interval.as_millis().to_string())
                .await?;
        }
        if let Some(zone) = &patch.geofence {
            let json = serde_json::to_string(zone)
                .map_err(|err| AppError::Storage(format!("encode geofence: {err}")))?;
            self.store.set(keys::GEOFENCE, &json).await?;
        }
        Ok(())
    }

    pub async fn sync_from_server(&self, api: &ApiClient) -> Result<(), AppError> {
        let base = self.current.borrow().api_url.clone();
        if base.trim().is_empty() {
            return Err(AppError::EndpointNotConfigured);
        }

        let remote = match api.fetch_remote_config(&base).await {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!(error = %err, "config sync failed");
                self.notices.error(format!("Could not sync settings: {err}"));
                return Err(err);
            }
        };

        self.apply_remote(&remote);
        self.persist_remote(&remote).await
    }

    fn apply_remote(&self, remote: &RemoteConfig) {
        let zone_ok = validate_zone(&remote.geofence).is_ok();
        if !zone_ok {
            tracing::warn!(
                radius = remote.geofence.radius_m,
                "server geofence invalid, keeping the current zone"
            );
            self.notices
                .error("Server sent an invalid unloading zone; keeping the current one");
        }

        self.current.send_modify(|settings| {
            if zone_ok {
                settings.geofence = remote.geofence;
            }
            if let Some(ms) = remote.roster_refresh_ms.filter(|ms| *ms > 0) {
                settings.roster_refresh = Duration::from_millis(ms);
            }
            if let Some(ms) = remote.location_report_ms.filter(|ms| *ms > 0) {
                settings.location_report = Duration::from_millis(ms);
            }
            settings.destinations = remote.destinations.clone();
            settings.monitoring_enabled = remote.monitoring_enabled;
            settings.tracked_keys = remote.tracked_keys.iter().cloned().collect();
        });
    }

    async fn persist_remote(&self, remote: &RemoteConfig) -> Result<(), AppError> {
        let result: Result<(), AppError> = async {
            if validate_zone(&remote.geofence).is_ok() {
                let zone = serde_json::to_string(&remote.geofence)
                    .map_err(|err| AppError::Storage(format!("encode geofence: {err}")))?;
                self.store.set(keys::GEOFENCE, &zone).await?;
            }

            if let Some(ms) = remote.roster_refresh_ms.filter(|ms| *ms > 0) {
                self.store.set(keys::ROSTER_REFRESH_MS, &ms.to_string()).await?;
            }
            if let Some(ms) = remote.location_report_ms.filter(|ms| *ms > 0) {
                self.store.set(keys::LOCATION_REPORT_MS, &ms.to_string()).await?;
            }

            let destinations = serde_json::to_string(&remote.destinations)
                .map_err(|err| AppError::Storage(format!("encode destinations: {err}")))?;
            self.store.set(keys::DESTINATIONS, &destinations).await?;

            self.store
                .set(keys::MONITORING_ENABLED, &remote.monitoring_enabled.to_string())
                .await?;

            let tracked = serde_json::to_string(&remote.tracked_keys)
                .map_err(|err| AppError::Storage(format!("encode tracked keys: {err}")))?;
            self.store.set(keys::TRACKED_KEYS, &tracked).await?;

            Ok(())
        }
        .await;

        if let Err(err) = &result {
            tracing::error!(error = %err, "synced settings persisted incompletely");
            self.notices
                .error("Settings synced for this session but could not be stored");
        }
        result
    }
}

pub fn parse_interval_minutes(raw: &str) -> Result<Duration, AppError> {
    let minutes: f64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("interval must be numeric, got {raw:?}")))?;
    if !minutes.is_finite() || minutes <= 0.0 {
        return Err(AppError::Validation(
            "interval must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs_f64(minutes * 60.0))
}

pub fn parse_geofence(lat: &str, lng: &str, radius_m: &str) -> Result<GeofenceZone, AppError> {
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("latitude must be numeric, got {lat:?}")))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("longitude must be numeric, got {lng:?}")))?;
    let radius_m: f64 = radius_m
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("radius must be numeric, got {radius_m:?}")))?;

    let zone = GeofenceZone {
        center: crate::models::settings::GeoPoint { lat, lng },
        radius_m,
    };
    validate_zone(&zone)?;
    Ok(zone)
}

fn validate_zone(zone: &GeofenceZone) -> Result<(), AppError> {
    if !zone.center.lat.is_finite() || !zone.center.lng.is_finite() {
        return Err(AppError::Validation("coordinates must be finite".to_string()));
    }
    if !zone.radius_m.is_finite() || zone.radius_m <= 0.0 {
        return Err(AppError::Validation(
            "radius must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_patch(patch: &SettingsPatch) -> Result<(), AppError> {
    if let Some(url) = &patch.api_url
        && url.trim().is_empty()
    {
        return Err(AppError::Validation("endpoint URL cannot be empty".to_string()));
    }
    for interval in [patch.roster_refresh, patch.location_report].into_iter().flatten() {
        if interval.is_zero() {
            return Err(AppError::Validation(
                "interval must be greater than zero".to_string(),
            ));
        }
    }
    if let Some(zone) = &patch.geofence {
        validate_zone(zone)?;
    }
    Ok(())
}
