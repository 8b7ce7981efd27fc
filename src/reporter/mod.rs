use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, LocationReport};
use crate::config::ConfigStore;
use crate::error::AppError;
use crate::geo::haversine_m;
use crate::models::settings::GeoPoint;
use crate::notify::Notices;
use crate::observability::metrics::Metrics;
use crate::storage::{KvStore, keys};

pub const MOVEMENT_THRESHOLD_M: f64 = 10.0;

/// Implementations return [`AppError::PermissionDenied`] when the host
/// refuses location access and [`AppError::Internal`] for hardware faults;
/// the reporter drops the sample either way.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current(&self) -> Result<GeoPoint, AppError>;
}

pub struct FixedPosition(pub GeoPoint);

#[async_trait]
impl PositionSource for FixedPosition {
    async fn current(&self) -> Result<GeoPoint, AppError> {
        Ok(self.0)
    }
}

pub struct LocationReporter {
    api: ApiClient,
    config: Arc<ConfigStore>,
    store: Arc<dyn KvStore>,
    notices: Arc<Notices>,
    metrics: Arc<Metrics>,
    source: Arc<dyn PositionSource>,
}

impl LocationReporter {
    pub fn new(
        api: ApiClient,
        config: Arc<ConfigStore>,
        store: Arc<dyn KvStore>,
        notices: Arc<Notices>,
        metrics: Arc<Metrics>,
        source: Arc<dyn PositionSource>,
    ) -> Self {
        Self {
            api,
            config,
            store,
            notices,
            metrics,
            source,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("location reporter started");
        let mut settings_rx = self.config.subscribe();
        let mut last_sent: Option<GeoPoint> = None;

        'rearm: loop {
            let (enabled, every) = {
                let settings = settings_rx.borrow_and_update();
                (settings.monitoring_enabled, settings.location_report)
            };

            if !enabled {
                tokio::select! {
                    changed = settings_rx.changed() => {
                        if changed.is_err() {
                            break 'rearm;
                        }
                    }
                    _ = shutdown.changed() => break 'rearm,
                }
                continue 'rearm;
            }

            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick(&mut last_sent).await,
                    changed = settings_rx.changed() => {
                        if changed.is_err() {
                            break 'rearm;
                        }
                        continue 'rearm;
                    }
                    _ = shutdown.changed() => break 'rearm,
                }
            }
        }

        info!("location reporter stopped");
    }

    pub async fn tick(&self, last_sent: &mut Option<GeoPoint>) {
        let settings = self.config.settings();
        if !settings.monitoring_enabled {
            return;
        }

        let base = match self.read_key(keys::API_URL).await {
            Some(base) => base,
            None => {
                debug!("no stored endpoint, dropping sample");
                return;
            }
        };
        let driver_key = match self.read_key(keys::DRIVER_KEY).await {
            Some(key) => key,
            None => {
                debug!("no stored driver key, dropping sample");
                return;
            }
        };

        if !settings.tracked_keys.contains(&driver_key) {
            debug!("driver not in the tracking allow-list");
            return;
        }

        let position = match self.source.current().await {
            Ok(position) => position,
            Err(err) => {
                warn!(error = %err, "position unavailable");
                self.notices
                    .error(format!("Could not read the current position: {err}"));
                self.metrics
                    .location_reports_total
                    .with_label_values(&["error"])
                    .inc();
                return;
            }
        };

        if !moved_enough(last_sent.as_ref(), &position) {
            debug!("below movement threshold, not reporting");
            self.metrics
                .location_reports_total
                .with_label_values(&["skipped"])
                .inc();
            return;
        }

        let report = LocationReport {
            driver_key,
            latitude: position.lat,
            longitude: position.lng,
            timestamp: Utc::now(),
        };

        match self.api.report_location(&base, &report).await {
            Ok(()) => {
                *last_sent = Some(position);
                self.metrics
                    .location_reports_total
                    .with_label_values(&["sent"])
                    .inc();
                debug!(lat = position.lat, lng = position.lng, "location reported");
            }
            Err(err) => {
                warn!(error = %err, "location report failed");
                self.notices
                    .error(format!("Could not report location: {err}"));
                self.metrics
                    .location_reports_total
                    .with_label_values(&["error"])
                    .inc();
            }
        }
    }

    async fn read_key(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "storage read failed");
                None
            }
        }
    }
}

fn moved_enough(last_sent: Option<&GeoPoint>, current: &GeoPoint) -> bool {
    match last_sent {
        Some(last) => haversine_m(last, current) >= MOVEMENT_THRESHOLD_M,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{FixedPosition, LocationReporter, MOVEMENT_THRESHOLD_M, moved_enough};
    use crate::api::ApiClient;
    use crate::config::ConfigStore;
    use crate::models::settings::GeoPoint;
    use crate::notify::{NoticeKind, Notices};
    use crate::observability::metrics::Metrics;
    use crate::storage::{KvStore, MemoryStore, keys};

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    #[test]
    fn first_sample_always_clears_the_threshold() {
        assert!(moved_enough(None, &point(-12.2243674, -38.9630476)));
    }

    #[test]
    fn small_drift_is_held_back() {
        let last = point(-12.2243674, -38.9630476);
        let five_meters_north = point(-12.2243674 + 0.000045, -38.9630476);
        assert!(!moved_enough(Some(&last), &five_meters_north));

        let twenty_meters_north = point(-12.2243674 + 0.00018, -38.9630476);
        assert!(moved_enough(Some(&last), &twenty_meters_north));
    }

    #[test]
    fn threshold_is_ten_meters() {
        assert_eq!(MOVEMENT_THRESHOLD_M, 10.0);
    }

    #[tokio::test]
    async fn tick_without_monitoring_or_session_keys_sends_nothing() {
        let store = Arc::new(MemoryStore::new());
        let notices = Arc::new(Notices::default());
        let mut notices_rx = notices.subscribe();
        let config = Arc::new(ConfigStore::new(store.clone(), notices.clone()));
        config.load().await;

        let metrics = Arc::new(Metrics::new());
        let reporter = LocationReporter::new(
            ApiClient::new(Duration::from_secs(1)).unwrap(),
            config,
            store.clone(),
            notices.clone(),
            metrics.clone(),
            Arc::new(FixedPosition(point(-12.2243674, -38.9630476))),
        );

        let mut last_sent = None;
        reporter.tick(&mut last_sent).await;
        assert!(last_sent.is_none());

        store.set(keys::MONITORING_ENABLED, "true").await.unwrap();
        let config = Arc::new(ConfigStore::new(store.clone(), notices.clone()));
        config.load().await;
        let reporter = LocationReporter::new(
            ApiClient::new(Duration::from_secs(1)).unwrap(),
            config,
            store,
            notices.clone(),
            metrics.clone(),
            Arc::new(FixedPosition(point(-12.2243674, -38.9630476))),
        );
        reporter.tick(&mut last_sent).await;
        assert!(last_sent.is_none());
        assert_eq!(
            metrics
                .location_reports_total
                .with_label_values(&["sent"])
                .get(),
            0
        );
        assert!(notices_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_send_keeps_the_last_sent_position_unset() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::MONITORING_ENABLED, "true").await.unwrap();
        store.set(keys::API_URL, "http://127.0.0.1:9").await.unwrap();
        store.set(keys::DRIVER_KEY, "12345678901").await.unwrap();
        store
            .set(keys::TRACKED_KEYS, r#"["12345678901"]"#)
            .await
            .unwrap();

        let notices = Arc::new(Notices::default());
        let mut notices_rx = notices.subscribe();
        let config = Arc::new(ConfigStore::new(store.clone(), notices.clone()));
        config.load().await;
        let metrics = Arc::new(Metrics::new());
        let reporter = LocationReporter::new(
            ApiClient::new(Duration::from_secs(1)).unwrap(),
            config,
            store,
            notices.clone(),
            metrics.clone(),
            Arc::new(FixedPosition(point(-12.2243674, -38.9630476))),
        );

        let mut last_sent = None;
        reporter.tick(&mut last_sent).await;

        assert!(last_sent.is_none());
        assert_eq!(
            metrics
                .location_reports_total
                .with_label_values(&["error"])
                .get(),
            1
        );

        let notice = notices_rx.try_recv().expect("failure notice");
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.contains("Could not report location"));
    }
}
