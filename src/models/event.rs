use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entry::EntryStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RosterEvent {
    Replaced { count: usize },
    Upserted { id: String },
    StatusChanged { id: String, status: EntryStatus },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RealtimeEvent {
    DockAssigned(DockAssigned),
    StatusChanged(StatusUpdate),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockAssigned {
    pub dock_number: u32,
    pub response_time_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub id: String,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockCall {
    pub dock_number: u32,
    pub respond_by: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::RealtimeEvent;

    #[test]
    fn parses_dock_assigned_frame() {
        let json = r#"{"event":"dock-assigned","data":{"dockNumber":7,"responseTimeSeconds":120}}"#;
        let event: RealtimeEvent = serde_json::from_str(json).unwrap();
        match event {
            RealtimeEvent::DockAssigned(call) => {
                assert_eq!(call.dock_number, 7);
                assert_eq!(call.response_time_seconds, 120);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_status_changed_frame() {
        let json = r#"{"event":"status-changed","data":{"id":"66b2f1","status":"unloading"}}"#;
        let event: RealtimeEvent = serde_json::from_str(json).unwrap();
        match event {
            RealtimeEvent::StatusChanged(update) => {
                assert_eq!(update.id, "66b2f1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_name_is_an_error() {
        let json = r#"{"event":"lunch-break","data":{}}"#;
        assert!(serde_json::from_str::<RealtimeEvent>(json).is_err());
    }
}
