use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::ConfigStore;
use crate::error::AppError;
use crate::geo::{haversine_m, is_within};
use crate::models::entry::{EntryStatus, QueueEntry, ReturnCounts};
use crate::models::settings::GeoPoint;
use crate::notify::Notices;
use crate::observability::metrics::Metrics;
use crate::roster::Roster;
use crate::storage::{KvStore, keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Fetched { count: usize },
    Coalesced,
}

pub struct RosterSync {
    api: ApiClient,
    config: Arc<ConfigStore>,
    roster: Arc<Roster>,
    store: Arc<dyn KvStore>,
    notices: Arc<Notices>,
    metrics: Arc<Metrics>,
    refresh_gate: Mutex<()>,
    refresh_generation: AtomicU64,
}

impl RosterSync {
    pub fn new(
        api: ApiClient,
        config: Arc<ConfigStore>,
        roster: Arc<Roster>,
        store: Arc<dyn KvStore>,
        notices: Arc<Notices>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            api,
            config,
            roster,
            store,
            notices,
            metrics,
            refresh_gate: Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
        }
    }

    pub async fn register_arrival(
        &self,
        identity: &str,
        origin: &str,
        position: &GeoPoint,
    ) -> Result<QueueEntry, AppError> {
        let identity = normalize_identity(identity)?;
        let origin = origin.trim();
        if origin.is_empty() {
            return Err(AppError::Validation("select an origin city".to_string()));
        }

        let settings = self.config.settings();
        if !settings.endpoint_configured() {
            return Err(AppError::EndpointNotConfigured);
        }

        if !is_within(position, &settings.geofence) {
            let distance_m = haversine_m(position, &settings.geofence.center);
            return Err(AppError::OutsideGeofence {
                distance_m,
                radius_m: settings.geofence.radius_m,
            });
        }

        let entry = match self
            .api
            .register_arrival(&settings.api_url, &identity, origin)
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                self.notices
                    .error(format!("Could not register arrival: {err}"));
                return Err(err);
            }
        };

        if let Err(err) = self.persist_session(&identity, &settings.api_url).await {
            warn!(error = %err, "session keys not persisted");
            self.notices
                .error("Registered, but the session could not be stored");
        }

        let mut active = entry;
        if active.driver_key.is_none() {
            active.driver_key = Some(identity);
        }
        self.roster.upsert(active.clone());
        self.roster.set_active(Some(active.clone()));

        info!(id = %active.id, "arrival registered");
        self.notices.success("You are in the unloading queue");
        Ok(active)
    }

    pub async fn start_unload(&self, id: &str) -> Result<QueueEntry, AppError> {
        let current = self.known_entry(id)?;
        guard_transition(&current, EntryStatus::Unloading)?;

        let settings = self.config.settings();
        if !settings.endpoint_configured() {
            return Err(AppError::EndpointNotConfigured);
        }

        match self.api.start_unload(&settings.api_url, id).await {
            Ok(entry) => {
                self.roster.upsert(entry.clone());
                info!(id = %entry.id, "unloading started");
                self.notices.success("Unloading started");
                Ok(entry)
            }
            Err(err) => {
                self.notices
                    .error(format!("Could not start unloading: {err}"));
                Err(err)
            }
        }
    }

    pub async fn finish_unload(
        &self,
        id: &str,
        returns: ReturnCounts,
    ) -> Result<QueueEntry, AppError> {
        let current = self.known_entry(id)?;
        guard_transition(&current, EntryStatus::Unloaded)?;

        let settings = self.config.settings();
        if !settings.endpoint_configured() {
            return Err(AppError::EndpointNotConfigured);
        }

        match self.api.finish_unload(&settings.api_url, id, returns).await {
            Ok(entry) => {
                self.roster.upsert(entry.clone());
                info!(id = %entry.id, "unloading finished");
                self.notices.success("Unloading finished");
                Ok(entry)
            }
            Err(err) => {
                self.notices
                    .error(format!("Could not finish unloading: {err}"));
                Err(err)
            }
        }
    }

    pub async fn refresh(&self) -> Result<RefreshOutcome, AppError> {
        let seen = self.refresh_generation.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_generation.load(Ordering::Acquire) != seen {
            return Ok(RefreshOutcome::Coalesced);
        }

        let count = self.fetch_and_replace().await?;
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        Ok(RefreshOutcome::Fetched { count })
    }

    async fn fetch_and_replace(&self) -> Result<usize, AppError> {
        let settings = self.config.settings();
        if !settings.endpoint_configured() {
            return Err(AppError::EndpointNotConfigured);
        }

        let start = Instant::now();
        let fetched = self.api.fetch_roster(&settings.api_url).await;
        let elapsed = start.elapsed().as_secs_f64();

        match fetched {
            Ok(entries) => {
                self.metrics
                    .roster_refresh_latency_seconds
                    .with_label_values(&["success"])
                    .observe(elapsed);
                self.metrics
                    .roster_refreshes_total
                    .with_label_values(&["success"])
                    .inc();

                let count = self.roster.replace_all(entries);
                self.metrics.roster_entries.set(count as i64);
                Ok(count)
            }
            Err(err) => {
                self.metrics
                    .roster_refresh_latency_seconds
                    .with_label_values(&["error"])
                    .observe(elapsed);
                self.metrics
                    .roster_refreshes_total
                    .with_label_values(&["error"])
                    .inc();
                Err(err)
            }
        }
    }

    pub async fn run_poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("roster poll loop started");
        let mut settings_rx = self.config.subscribe();

        'rearm: loop {
            let (configured, every) = {
                let settings = settings_rx.borrow_and_update();
                (settings.endpoint_configured(), settings.roster_refresh)
            };

            if !configured {
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
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh().await {
                            warn!(error = %err, "scheduled roster refresh failed");
                            self.notices.error(format!("Queue refresh failed: {err}"));
                        }
                    }
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

        info!("roster poll loop stopped");
    }

    fn known_entry(&self, id: &str) -> Result<QueueEntry, AppError> {
        self.roster
            .get(id)
            .ok_or_else(|| AppError::Validation(format!("unknown queue entry {id}")))
    }

    async fn persist_session(&self, identity: &str, api_url: &str) -> Result<(), AppError> {
        self.store.set(keys::DRIVER_KEY, identity).await?;
        self.store.set(keys::API_URL, api_url).await?;
        Ok(())
    }
}

fn guard_transition(entry: &QueueEntry, next: EntryStatus) -> Result<(), AppError> {
    if entry.status.can_advance_to(next) {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "cannot move from {} to {}",
        entry.status, next
    )))
}

pub fn normalize_identity(raw: &str) -> Result<String, AppError> {
    let stripped: String = raw
        .chars()
        .filter(|ch| !matches!(ch, '.' | '-' | ' '))
        .collect();

    if stripped.len() != 11 || !stripped.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(AppError::Validation(
            "identification key must have exactly 11 digits".to_string(),
        ));
    }
    Ok(stripped)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{RosterSync, normalize_identity};
    use crate::api::ApiClient;
    use crate::config::{ConfigStore, SettingsPatch};
    use crate::error::AppError;
    use crate::models::entry::{EntryStatus, QueueEntry, ReturnCounts};
    use crate::models::settings::GeoPoint;
    use crate::notify::Notices;
    use crate::observability::metrics::Metrics;
    use crate::roster::Roster;
    use crate::storage::MemoryStore;

    async fn sync_with_endpoint(endpoint: Option<&str>) -> (Arc<Roster>, RosterSync) {
        let store = Arc::new(MemoryStore::new());
        let notices = Arc::new(Notices::default());
        let config = Arc::new(ConfigStore::new(store.clone(), notices.clone()));
        config.load().await;
        if let Some(url) = endpoint {
            config
                .save(SettingsPatch {
                    api_url: Some(url.to_string()),
                    ..SettingsPatch::default()
                })
                .await
                .unwrap();
        }

        let roster = Arc::new(Roster::default());
        let sync = RosterSync::new(
            ApiClient::new(Duration::from_secs(1)).unwrap(),
            config,
            roster.clone(),
            store,
            notices,
            Arc::new(Metrics::new()),
        );
        (roster, sync)
    }

    fn entry(id: &str, status: EntryStatus) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            name: "Carlos".to_string(),
            status,
            arrived_at: chrono::Utc::now(),
            unload_started_at: None,
            unload_ended_at: None,
            queue_seconds: 0,
            unload_seconds: 0,
            returns: None,
            driver_key: None,
        }
    }

    #[test]
    fn identity_accepts_masked_and_bare_forms() {
        assert_eq!(normalize_identity("123.456.789-01").unwrap(), "12345678901");
        assert_eq!(normalize_identity("12345678901").unwrap(), "12345678901");
    }

    #[test]
    fn identity_rejects_short_long_and_lettered() {
        assert!(normalize_identity("1234567890").is_err());
        assert!(normalize_identity("123456789012").is_err());
        assert!(normalize_identity("12345abc901").is_err());
        assert!(normalize_identity("").is_err());
    }

    #[tokio::test]
    async fn registration_outside_the_fence_is_rejected_with_distance() {
        let (_roster, sync) = sync_with_endpoint(Some("http://127.0.0.1:9")).await;

        let position = GeoPoint {
            lat: -12.2143674,
            lng: -38.9630476,
        };
        let err = sync
            .register_arrival("12345678901", "Feira de Santana", &position)
            .await
            .unwrap_err();

        match err {
            AppError::OutsideGeofence { distance_m, radius_m } => {
                assert_eq!(radius_m, 500.0);
                assert!(distance_m > 1000.0 && distance_m < 1250.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn registration_requires_a_configured_endpoint() {
        let (_roster, sync) = sync_with_endpoint(None).await;
        let center = GeoPoint {
            lat: -12.2243674,
            lng: -38.9630476,
        };

        let err = sync
            .register_arrival("12345678901", "Salvador", &center)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EndpointNotConfigured));
    }

    #[tokio::test]
    async fn registration_rejects_blank_origin() {
        let (_roster, sync) = sync_with_endpoint(Some("http://127.0.0.1:9")).await;
        let center = GeoPoint {
            lat: -12.2243674,
            lng: -38.9630476,
        };

        let err = sync
            .register_arrival("12345678901", "   ", &center)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn transitions_are_guarded_before_any_request() {
        let (roster, sync) = sync_with_endpoint(Some("http://127.0.0.1:9")).await;
        roster.upsert(entry("w1", EntryStatus::Waiting));
        roster.upsert(entry("d1", EntryStatus::Unloaded));

        let err = sync
            .finish_unload("w1", ReturnCounts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = sync.start_unload("d1").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = sync.start_unload("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn refresh_without_endpoint_is_an_error() {
        let (_roster, sync) = sync_with_endpoint(None).await;
        let err = sync.refresh().await.unwrap_err();
        assert!(matches!(err, AppError::EndpointNotConfigured));
    }
}
