use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::api::ApiClient;
use crate::config::ConfigStore;
use crate::error::AppError;
use crate::notify::Notices;
use crate::observability::metrics::Metrics;
use crate::realtime::RealtimeChannel;
use crate::realtime::alarm::AlarmSink;
use crate::reporter::{LocationReporter, PositionSource};
use crate::roster::Roster;
use crate::roster::sync::RosterSync;
use crate::storage::KvStore;

pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub config: Arc<ConfigStore>,
    pub roster: Arc<Roster>,
    pub sync: Arc<RosterSync>,
    pub realtime: Arc<RealtimeChannel>,
    pub reporter: Arc<LocationReporter>,
    pub notices: Arc<Notices>,
    pub metrics: Arc<Metrics>,
    pub api: ApiClient,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KvStore>,
        http_timeout: Duration,
        event_buffer_size: usize,
        alarm: Arc<dyn AlarmSink>,
        position: Arc<dyn PositionSource>,
    ) -> Result<Self, AppError> {
        let notices = Arc::new(Notices::default());
        let metrics = Arc::new(Metrics::new());
        let api = ApiClient::new(http_timeout)?;
        let config = Arc::new(ConfigStore::new(store.clone(), notices.clone()));
        let roster = Arc::new(Roster::new(event_buffer_size));

        let sync = Arc::new(RosterSync::new(
            api.clone(),
            config.clone(),
            roster.clone(),
            store.clone(),
            notices.clone(),
            metrics.clone(),
        ));
        let realtime = Arc::new(RealtimeChannel::new(
            api.clone(),
            config.clone(),
            roster.clone(),
            notices.clone(),
            metrics.clone(),
            alarm,
            http_timeout,
        ));
        let reporter = Arc::new(LocationReporter::new(
            api.clone(),
            config.clone(),
            store.clone(),
            notices.clone(),
            metrics.clone(),
            position,
        ));

        let (shutdown, _unused_rx) = watch::channel(false);

        Ok(Self {
            store,
            config,
            roster,
            sync,
            realtime,
            reporter,
            notices,
            metrics,
            api,
            shutdown,
        })
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
