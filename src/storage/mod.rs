use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AppError;

pub mod keys {
    pub const API_URL: &str = "api_url";
    pub const ROSTER_REFRESH_MS: &str = "roster_refresh_ms";
    pub const LOCATION_REPORT_MS: &str = "location_report_ms";
    pub const GEOFENCE: &str = "geofence";
    pub const DESTINATIONS: &str = "destinations";
    pub const MONITORING_ENABLED: &str = "monitoring_enabled";
    pub const TRACKED_KEYS: &str = "tracked_keys";
    pub const DRIVER_KEY: &str = "driver_key";
}

/// Values are opaque strings; callers decide the encoding per key. A missing
/// key reads as `Ok(None)`, never as an error.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    async fn remove(&self, key: &str) -> Result<(), AppError>;
}

pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_map(&self) -> BTreeMap<String, String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(error = %err, path = %self.path.display(), "storage file unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(error = %err, path = %self.path.display(), "storage file unreadable, starting empty");
                BTreeMap::new()
            }
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::Storage(format!("create storage dir: {err}")))?;
        }

        let json = serde_json::to_string_pretty(map)
            .map_err(|err| AppError::Storage(format!("encode storage file: {err}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|err| AppError::Storage(format!("write storage file: {err}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| AppError::Storage(format!("replace storage file: {err}")))?;

        Ok(())
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_map().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map).await
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.map.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        self.map.lock().await.remove(key);
        Ok(())
    }
}
