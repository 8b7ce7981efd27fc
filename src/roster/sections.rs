use crate::models::entry::{EntryStatus, QueueEntry};

#[derive(Debug, Clone)]
pub struct Section {
    pub status: EntryStatus,
    pub entries: Vec<QueueEntry>,
}

pub fn sectioned(snapshot: &[QueueEntry]) -> Vec<Section> {
    [
        EntryStatus::Waiting,
        EntryStatus::Unloading,
        EntryStatus::Unloaded,
    ]
    .into_iter()
    .filter_map(|status| {
        let mut entries: Vec<QueueEntry> = snapshot
            .iter()
            .filter(|entry| entry.status == status)
            .cloned()
            .collect();
        if entries.is_empty() {
            return None;
        }

        entries.sort_by(|a, b| {
            let order = a.arrived_at.cmp(&b.arrived_at);
            let order = match status {
                EntryStatus::Unloaded => order.reverse(),
                _ => order,
            };
            order.then_with(|| a.id.cmp(&b.id))
        });

        Some(Section { status, entries })
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::sectioned;
    use crate::models::entry::{EntryStatus, QueueEntry};

    fn entry(id: &str, status: EntryStatus, arrived_secs_ago: i64) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            name: format!("driver-{id}"),
            status,
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
    fn waiting_ascending_unloaded_descending() {
        let snapshot = vec![
            entry("w2", EntryStatus::Waiting, 60),
            entry("w1", EntryStatus::Waiting, 600),
            entry("d1", EntryStatus::Unloaded, 7200),
            entry("d2", EntryStatus::Unloaded, 3600),
            entry("u1", EntryStatus::Unloading, 1800),
        ];

        let sections = sectioned(&snapshot);
        assert_eq!(sections.len(), 3);

        assert_eq!(sections[0].status, EntryStatus::Waiting);
        let waiting: Vec<&str> = sections[0].entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(waiting, vec!["w1", "w2"]);

        assert_eq!(sections[1].status, EntryStatus::Unloading);

        assert_eq!(sections[2].status, EntryStatus::Unloaded);
        let unloaded: Vec<&str> = sections[2].entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(unloaded, vec!["d2", "d1"]);
    }

    #[test]
    fn empty_statuses_are_omitted() {
        let snapshot = vec![entry("w1", EntryStatus::Waiting, 60)];

        let sections = sectioned(&snapshot);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].status, EntryStatus::Waiting);
    }

    #[test]
    fn empty_snapshot_has_no_sections() {
        assert!(sectioned(&[]).is_empty());
    }
}
