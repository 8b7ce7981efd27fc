pub mod sections;
pub mod sync;

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use crate::models::entry::{EntryStatus, QueueEntry};
use crate::models::event::RosterEvent;

pub struct Roster {
    entries: DashMap<String, QueueEntry>,
    active: watch::Sender<Option<QueueEntry>>,
    events_tx: broadcast::Sender<RosterEvent>,
}

impl Roster {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        let (active, _unused_rx) = watch::channel(None);

        Self {
            entries: DashMap::new(),
            active,
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.events_tx.subscribe()
    }

    pub fn watch_active(&self) -> watch::Receiver<Option<QueueEntry>> {
        self.active.subscribe()
    }

    pub fn active_entry(&self) -> Option<QueueEntry> {
        self.active.borrow().clone()
    }

    pub fn set_active(&self, entry: Option<QueueEntry>) {
        self.active.send_if_modified(|current| {
            if *current == entry {
                return false;
            }
            *current = entry;
            true
        });
    }

    pub fn get(&self, id: &str) -> Option<QueueEntry> {
        self.entries.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| {
            a.arrived_at
                .cmp(&b.arrived_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries
    }

    pub fn replace_all(&self, entries: Vec<QueueEntry>) -> usize {
        let count = entries.len();
        self.entries.clear();
        for entry in entries {
            self.entries.insert(entry.id.clone(), entry);
        }

        self.active.send_if_modified(|active| {
            let Some(current) = active else {
                return false;
            };
            match self.entries.get(&current.id) {
                Some(fresh) if *fresh.value() != *current => {
                    *current = fresh.value().clone();
                    true
                }
                _ => false,
            }
        });

        let _ = self.events_tx.send(RosterEvent::Replaced { count });
        count
    }

    pub fn upsert(&self, entry: QueueEntry) {
        self.entries.insert(entry.id.clone(), entry.clone());
        self.sync_active_with(&entry);
        let _ = self.events_tx.send(RosterEvent::Upserted { id: entry.id });
    }

    pub fn apply_status(&self, id: &str, status: EntryStatus) -> Option<QueueEntry> {
        let updated = {
            let mut entry = self.entries.get_mut(id)?;
            entry.status = status;
            entry.clone()
        };

        self.sync_active_with(&updated);
        let _ = self.events_tx.send(RosterEvent::StatusChanged {
            id: updated.id.clone(),
            status,
        });
        Some(updated)
    }

    fn sync_active_with(&self, entry: &QueueEntry) {
        self.active.send_if_modified(|active| match active {
            Some(current) if current.id == entry.id && *current != *entry => {
                *current = entry.clone();
                true
            }
            _ => false,
        });
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::Roster;
    use crate::models::entry::{EntryStatus, QueueEntry};
    use crate::models::event::RosterEvent;

    fn entry(id: &str, arrived_secs_ago: i64) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            name: format!("driver-{id}"),
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
    fn snapshot_is_arrival_ascending() {
        let roster = Roster::default();
        roster.replace_all(vec![entry("c", 10), entry("a", 300), entry("b", 60)]);

        let ids: Vec<String> = roster.snapshot().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn replace_refreshes_active_in_place() {
        let roster = Roster::default();
        let original = entry("a1", 120);
        roster.replace_all(vec![original.clone()]);
        roster.set_active(Some(original));

        let mut refreshed = entry("a1", 120);
        refreshed.status = EntryStatus::Unloading;
        roster.replace_all(vec![refreshed]);

        let active = roster.active_entry().expect("active entry kept");
        assert_eq!(active.status, EntryStatus::Unloading);
    }

    #[test]
    fn replace_keeps_active_when_absent_from_fetch() {
        let roster = Roster::default();
        let mine = entry("a1", 120);
        roster.replace_all(vec![mine.clone()]);
        roster.set_active(Some(mine));

        roster.replace_all(vec![entry("b2", 30)]);

        let active = roster.active_entry().expect("active entry kept");
        assert_eq!(active.id, "a1");
        assert!(roster.get("a1").is_none());
    }

    #[test]
    fn apply_status_updates_entry_active_and_stream() {
        let roster = Roster::default();
        let mut events = roster.subscribe();
        let mine = entry("a1", 120);
        roster.replace_all(vec![mine.clone()]);
        roster.set_active(Some(mine));
        let _ = events.try_recv();

        let updated = roster
            .apply_status("a1", EntryStatus::Unloading)
            .expect("entry known");

        assert_eq!(updated.status, EntryStatus::Unloading);
        assert_eq!(
            roster.active_entry().map(|e| e.status),
            Some(EntryStatus::Unloading)
        );
        match events.try_recv() {
            Ok(RosterEvent::StatusChanged { id, status }) => {
                assert_eq!(id, "a1");
                assert_eq!(status, EntryStatus::Unloading);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn apply_status_on_unknown_id_is_none() {
        let roster = Roster::default();
        assert!(roster.apply_status("ghost", EntryStatus::Unloading).is_none());
    }
}
