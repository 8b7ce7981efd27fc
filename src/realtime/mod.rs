pub mod alarm;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::ConfigStore;
use crate::error::AppError;
use crate::models::entry::{EntryStatus, QueueEntry};
use crate::models::event::{DockCall, RealtimeEvent};
use crate::models::settings::Settings;
use crate::notify::Notices;
use crate::observability::metrics::Metrics;
use crate::realtime::alarm::AlarmSink;
use crate::roster::Roster;

const RETRY_FLOOR: Duration = Duration::from_secs(1);
const RETRY_CEILING: Duration = Duration::from_secs(60);
const MAX_RESPONSE_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionTarget {
    base_url: String,
    driver_key: String,
}

pub struct RealtimeChannel {
    api: ApiClient,
    config: Arc<ConfigStore>,
    roster: Arc<Roster>,
    notices: Arc<Notices>,
    metrics: Arc<Metrics>,
    alarm: Arc<dyn AlarmSink>,
    connect_timeout: Duration,
    dock_call: watch::Sender<Option<DockCall>>,
}

impl RealtimeChannel {
    pub fn new(
        api: ApiClient,
        config: Arc<ConfigStore>,
        roster: Arc<Roster>,
        notices: Arc<Notices>,
        metrics: Arc<Metrics>,
        alarm: Arc<dyn AlarmSink>,
        connect_timeout: Duration,
    ) -> Self {
        let (dock_call, _unused_rx) = watch::channel(None);
        Self {
            api,
            config,
            roster,
            notices,
            metrics,
            alarm,
            connect_timeout,
            dock_call,
        }
    }

    pub fn dock_call(&self) -> Option<DockCall> {
        *self.dock_call.borrow()
    }

    pub fn watch_dock_call(&self) -> watch::Receiver<Option<DockCall>> {
        self.dock_call.subscribe()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("realtime channel supervisor started");
        let mut active_rx = self.roster.watch_active();
        let mut settings_rx = self.config.subscribe();
        let mut backoff = RETRY_FLOOR;

        'supervise: loop {
            let target = {
                let settings = settings_rx.borrow_and_update();
                let active = active_rx.borrow_and_update();
                session_target(&settings, &active)
            };

            let Some(target) = target else {
                tokio::select! {
                    changed = active_rx.changed() => {
                        if changed.is_err() {
                            break 'supervise;
                        }
                    }
                    changed = settings_rx.changed() => {
                        if changed.is_err() {
                            break 'supervise;
                        }
                    }
                    _ = shutdown.changed() => break 'supervise,
                }
                continue 'supervise;
            };

            let outcome = tokio::select! {
                outcome = self.session(&target) => Some(outcome),
                _ = wait_target_change(&mut active_rx, &mut settings_rx, &target) => None,
                _ = shutdown.changed() => {
                    self.clear_call();
                    break 'supervise;
                }
            };

            self.clear_call();

            match outcome {
                None => {
                    backoff = RETRY_FLOOR;
                    continue 'supervise;
                }
                Some(Ok(())) => {
                    info!("realtime channel closed by server");
                    backoff = RETRY_FLOOR;
                }
                Some(Err(err)) => {
                    warn!(error = %err, "realtime session failed");
                    self.notices
                        .error(format!("Live updates unavailable: {err}"));
                }
            }

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = wait_target_change(&mut active_rx, &mut settings_rx, &target) => {}
                _ = shutdown.changed() => break 'supervise,
            }
            backoff = (backoff * 2).min(RETRY_CEILING);
        }

        self.clear_call();
        info!("realtime channel supervisor stopped");
    }

    async fn session(&self, target: &SessionTarget) -> Result<(), AppError> {
        let auth = self.api.realtime_auth(&target.base_url).await?;
        let url = websocket_url(&target.base_url, auth.url.as_deref());

        let (socket, _response) = timeout(self.connect_timeout, connect_async(&url))
            .await
            .map_err(|_| AppError::Realtime(format!("connect {url}: timed out")))?
            .map_err(|err| AppError::Realtime(format!("connect {url}: {err}")))?;
        let (mut sink, mut stream) = socket.split();

        let channel = format!("driver-{}", target.driver_key);
        let subscribe = serde_json::json!({
            "event": "subscribe",
            "channel": channel,
            "token": auth.token,
        });
        sink.send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|err| AppError::Realtime(format!("subscribe: {err}")))?;
        info!(channel = %channel, "realtime channel subscribed");

        loop {
            let deadline = self.dock_call.borrow().map(|call| call.respond_by);

            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload))
                            .await
                            .map_err(|err| AppError::Realtime(format!("pong: {err}")))?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return Err(AppError::Realtime(format!("read: {err}")));
                    }
                },
                _ = countdown(deadline) => {
                    info!("dock call expired without a response");
                    self.notices.info("Dock call expired");
                    self.clear_call();
                }
            }
        }
    }

    fn handle_frame(&self, raw: &str) {
        let event: RealtimeEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(err) => {
                debug!(error = %err, "ignoring unrecognized realtime frame");
                return;
            }
        };

        match event {
            RealtimeEvent::DockAssigned(assigned) => {
                self.metrics
                    .realtime_events_total
                    .with_label_values(&["dock-assigned"])
                    .inc();

                let grace = assigned.response_time_seconds.min(MAX_RESPONSE_WINDOW_SECS) as i64;
                let call = DockCall {
                    dock_number: assigned.dock_number,
                    respond_by: Utc::now() + chrono::Duration::seconds(grace),
                };
                self.dock_call.send_replace(Some(call));
                self.alarm.start();
                self.metrics.alarm_active.set(1);

                info!(dock = assigned.dock_number, "dock assigned");
                self.notices
                    .info(format!("Proceed to dock {}", assigned.dock_number));
            }
            RealtimeEvent::StatusChanged(update) => {
                self.metrics
                    .realtime_events_total
                    .with_label_values(&["status-changed"])
                    .inc();

                if self.roster.apply_status(&update.id, update.status).is_none() {
                    debug!(id = %update.id, "status push for an entry not in the roster");
                }
                if update.status == EntryStatus::Unloading {
                    self.clear_call();
                }
            }
        }
    }

    fn clear_call(&self) {
        self.alarm.stop();
        self.metrics.alarm_active.set(0);
        self.dock_call.send_if_modified(|call| call.take().is_some());
    }
}

fn session_target(settings: &Settings, active: &Option<QueueEntry>) -> Option<SessionTarget> {
    if !settings.endpoint_configured() {
        return None;
    }
    let entry = active.as_ref()?;
    let driver_key = entry.driver_key.clone()?;
    Some(SessionTarget {
        base_url: settings.api_url.clone(),
        driver_key,
    })
}

async fn wait_target_change(
    active_rx: &mut watch::Receiver<Option<QueueEntry>>,
    settings_rx: &mut watch::Receiver<Settings>,
    current: &SessionTarget,
) {
    loop {
        tokio::select! {
            changed = active_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = settings_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let target = {
            let settings = settings_rx.borrow_and_update();
            let active = active_rx.borrow_and_update();
            session_target(&settings, &active)
        };
        if target.as_ref() != Some(current) {
            return;
        }
    }
}

async fn countdown(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            sleep(wait).await;
        }
        None => std::future::pending().await,
    }
}

fn websocket_url(base: &str, advertised: Option<&str>) -> String {
    if let Some(url) = advertised {
        return url.to_string();
    }

    let trimmed = base.trim_end_matches('/');
    let derived = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{trimmed}")
    };
    format!("{derived}/realtime")
}
