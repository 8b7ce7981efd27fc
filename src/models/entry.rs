use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Waiting,
    Unloading,
    Unloaded,
}

impl EntryStatus {
    pub fn can_advance_to(self, next: EntryStatus) -> bool {
        matches!(
            (self, next),
            (EntryStatus::Waiting, EntryStatus::Unloading)
                | (EntryStatus::Unloading, EntryStatus::Unloaded)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryStatus::Waiting => "waiting",
            EntryStatus::Unloading => "unloading",
            EntryStatus::Unloaded => "unloaded",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnCounts {
    pub cage_count: u32,
    pub pallet_count: u32,
    pub sleeve_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub status: EntryStatus,
    #[serde(rename = "arrivalTimestamp")]
    pub arrived_at: DateTime<Utc>,
    #[serde(rename = "unloadStartTimestamp", default)]
    pub unload_started_at: Option<DateTime<Utc>>,
    #[serde(rename = "unloadEndTimestamp", default)]
    pub unload_ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "queueDurationSeconds", default)]
    pub queue_seconds: i64,
    #[serde(rename = "unloadDurationSeconds", default)]
    pub unload_seconds: i64,
    #[serde(flatten, default)]
    pub returns: Option<ReturnCounts>,
    #[serde(rename = "identificationKey", default)]
    pub driver_key: Option<String>,
}

impl QueueEntry {
    pub fn queue_duration(&self, now: DateTime<Utc>) -> i64 {
        match self.status {
            EntryStatus::Waiting => (now - self.arrived_at).num_seconds().max(0),
            EntryStatus::Unloading | EntryStatus::Unloaded => self.queue_seconds,
        }
    }

    pub fn unload_duration(&self, now: DateTime<Utc>) -> i64 {
        match (self.status, self.unload_started_at) {
            (EntryStatus::Unloading, Some(started)) => (now - started).num_seconds().max(0),
            _ => self.unload_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{EntryStatus, QueueEntry};

    fn waiting_entry(arrived_secs_ago: i64) -> QueueEntry {
        QueueEntry {
            id: "a1".to_string(),
            name: "Carlos".to_string(),
            status: EntryStatus::Waiting,
            arrived_at: Utc::now() - Duration::seconds(arrived_secs_ago),
            unload_started_at: None,
            unload_ended_at: None,
            queue_seconds: 0,
            unload_seconds: 0,
            returns: None,
            driver_key: None,
        }
    }

    #[test]
    fn state_machine_moves_strictly_forward() {
        assert!(EntryStatus::Waiting.can_advance_to(EntryStatus::Unloading));
        assert!(EntryStatus::Unloading.can_advance_to(EntryStatus::Unloaded));

        assert!(!EntryStatus::Waiting.can_advance_to(EntryStatus::Unloaded));
        assert!(!EntryStatus::Unloading.can_advance_to(EntryStatus::Waiting));
        assert!(!EntryStatus::Unloaded.can_advance_to(EntryStatus::Waiting));
        assert!(!EntryStatus::Unloaded.can_advance_to(EntryStatus::Unloading));
    }

    #[test]
    fn queue_duration_is_live_while_waiting() {
        let entry = waiting_entry(90);
        let now = Utc::now();

        let first = entry.queue_duration(now);
        let second = entry.queue_duration(now + Duration::seconds(1));

        assert!(first >= 89 && first <= 91);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn queue_duration_is_frozen_once_unloaded() {
        let mut entry = waiting_entry(600);
        entry.status = EntryStatus::Unloaded;
        entry.queue_seconds = 120;
        entry.unload_seconds = 45;

        let now = Utc::now();
        assert_eq!(entry.queue_duration(now), 120);
        assert_eq!(entry.queue_duration(now + Duration::seconds(30)), 120);
        assert_eq!(entry.unload_duration(now + Duration::seconds(30)), 45);
    }

    #[test]
    fn unload_duration_is_live_while_unloading() {
        let mut entry = waiting_entry(300);
        entry.status = EntryStatus::Unloading;
        entry.queue_seconds = 250;
        entry.unload_started_at = Some(Utc::now() - Duration::seconds(40));

        let now = Utc::now();
        let unload = entry.unload_duration(now);
        assert!(unload >= 39 && unload <= 41);
        assert_eq!(entry.queue_duration(now), 250);
    }

    #[test]
    fn deserializes_server_assigned_underscore_id() {
        let json = r#"{
            "_id": "66b2f1",
            "name": "Ana",
            "status": "waiting",
            "arrivalTimestamp": "2025-08-20T12:00:00Z"
        }"#;

        let entry: QueueEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.id, "66b2f1");
        assert_eq!(entry.status, EntryStatus::Waiting);
        assert!(entry.returns.is_none());
        assert!(entry.driver_key.is_none());
    }

    #[test]
    fn deserializes_finalized_entry_with_return_counts() {
        let json = r#"{
            "id": "66b2f2",
            "name": "Bruno",
            "status": "unloaded",
            "arrivalTimestamp": "2025-08-20T12:00:00Z",
            "unloadStartTimestamp": "2025-08-20T12:10:00Z",
            "unloadEndTimestamp": "2025-08-20T12:25:00Z",
            "queueDurationSeconds": 600,
            "unloadDurationSeconds": 900,
            "cageCount": 4,
            "palletCount": 2,
            "sleeveCount": 7,
            "identificationKey": "12345678901"
        }"#;

        let entry: QueueEntry = serde_json::from_str(json).unwrap();
        let returns = entry.returns.expect("return counts present");
        assert_eq!(returns.cage_count, 4);
        assert_eq!(returns.pallet_count, 2);
        assert_eq!(returns.sleeve_count, 7);
        assert_eq!(entry.driver_key.as_deref(), Some("12345678901"));
    }
}
