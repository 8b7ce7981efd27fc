use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::entry::{QueueEntry, ReturnCounts};
use crate::models::settings::{Destination, GeofenceZone};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    erro: Option<String>,
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, AppError> {
    if !envelope.success {
        return Err(AppError::Api(
            envelope.erro.unwrap_or_else(|| "unknown server error".to_string()),
        ));
    }
    envelope
        .data
        .ok_or_else(|| AppError::Transport("response envelope missing data".to_string()))
}

fn ack_envelope(envelope: Envelope<serde_json::Value>) -> Result<(), AppError> {
    if !envelope.success {
        return Err(AppError::Api(
            envelope.erro.unwrap_or_else(|| "unknown server error".to_string()),
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ArrivalRequest<'a> {
    identity: &'a str,
    origin: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub geofence: GeofenceZone,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub roster_refresh_ms: Option<u64>,
    #[serde(default)]
    pub location_report_ms: Option<u64>,
    #[serde(default)]
    pub monitoring_enabled: bool,
    #[serde(default)]
    pub tracked_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeAuth {
    pub token: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub driver_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
}

impl ApiClient {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("http client: {err}")))?;
        Ok(Self { http })
    }

    pub async fn fetch_roster(&self, base: &str) -> Result<Vec<QueueEntry>, AppError> {
        let response = self.http.get(join(base, "/drivers")).send().await?;
        decode(response).await
    }

    pub async fn register_arrival(
        &self,
        base: &str,
        identity: &str,
        origin: &str,
    ) -> Result<QueueEntry, AppError> {
        let response = self
            .http
            .post(join(base, "/drivers"))
            .json(&ArrivalRequest { identity, origin })
            .send()
            .await?;
        decode(response).await
    }

    pub async fn start_unload(&self, base: &str, id: &str) -> Result<QueueEntry, AppError> {
        let response = self
            .http
            .put(join(base, &format!("/drivers/{id}/start-unload")))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn finish_unload(
        &self,
        base: &str,
        id: &str,
        returns: ReturnCounts,
    ) -> Result<QueueEntry, AppError> {
        let response = self
            .http
            .put(join(base, &format!("/drivers/{id}/finish-unload")))
            .json(&returns)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn fetch_remote_config(&self, base: &str) -> Result<RemoteConfig, AppError> {
        let response = self.http.get(join(base, "/config")).send().await?;
        decode(response).await
    }

    pub async fn realtime_auth(&self, base: &str) -> Result<RealtimeAuth, AppError> {
        let response = self.http.get(join(base, "/realtime-auth")).send().await?;
        decode(response).await
    }

    pub async fn report_location(
        &self,
        base: &str,
        report: &LocationReport,
    ) -> Result<(), AppError> {
        let response = self
            .http
            .post(join(base, "/locations"))
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!("HTTP {status}")));
        }
        ack_envelope(response.json().await?)
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Transport(format!("HTTP {status}")));
    }
    unwrap_envelope(response.json().await?)
}
