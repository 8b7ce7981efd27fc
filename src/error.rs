use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("outside unloading area: {distance_m:.0}m from center, limit {radius_m:.0}m")]
    OutsideGeofence { distance_m: f64, radius_m: f64 },

    #[error("endpoint not configured")]
    EndpointNotConfigured,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Api(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("realtime channel error: {0}")]
    Realtime(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Transport(format!("malformed response: {err}"))
    }
}
