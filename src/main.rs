mod api;
mod config;
mod error;
mod geo;
mod models;
mod notify;
mod observability;
mod realtime;
mod reporter;
mod roster;
mod state;
mod storage;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::models::settings::DEFAULT_GEOFENCE;
use crate::realtime::alarm::LogAlarm;
use crate::reporter::FixedPosition;
use crate::storage::JsonFileStore;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let boot = config::BootConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(boot.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let store = Arc::new(JsonFileStore::new(boot.storage_path.clone()));
    let app = Arc::new(state::AppState::new(
        store,
        boot.http_timeout,
        boot.event_buffer_size,
        Arc::new(LogAlarm),
        Arc::new(FixedPosition(DEFAULT_GEOFENCE.center)),
    )?);

    let settings = app.config.load().await;
    tracing::info!(
        endpoint = %settings.api_url,
        storage = %boot.storage_path.display(),
        "configuration loaded"
    );

    if settings.endpoint_configured()
        && let Err(err) = app.config.sync_from_server(&app.api).await
    {
        tracing::warn!(error = %err, "initial configuration sync failed");
    }

    tokio::spawn(app.sync.clone().run_poll_loop(app.shutdown_signal()));
    tokio::spawn(app.realtime.clone().run(app.shutdown_signal()));
    tokio::spawn(app.reporter.clone().run(app.shutdown_signal()));

    let mut notices_rx = app.notices.subscribe();
    tokio::spawn(async move {
        while let Ok(notice) = notices_rx.recv().await {
            tracing::info!(kind = ?notice.kind, message = %notice.message, "notice");
        }
    });
    let mut events_rx = app.roster.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            tracing::debug!(event = ?event, "roster event");
        }
    });

    shutdown_signal().await;
    app.trigger_shutdown();
    tracing::info!("shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
