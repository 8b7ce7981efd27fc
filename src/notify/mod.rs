use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

pub const DEFAULT_DISMISS: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: Uuid,
    pub kind: NoticeKind,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

pub struct Notices {
    tx: broadcast::Sender<Notice>,
    dismiss_after: chrono::Duration,
}

impl Notices {
    pub fn new(capacity: usize, dismiss_after: std::time::Duration) -> Self {
        let (tx, _unused_rx) = broadcast::channel(capacity);
        let dismiss_after =
            chrono::Duration::from_std(dismiss_after).unwrap_or(chrono::Duration::seconds(2));
        Self { tx, dismiss_after }
    }

    pub fn info(&self, message: impl Into<String>) -> Notice {
        self.push(NoticeKind::Info, message.into())
    }

    pub fn success(&self, message: impl Into<String>) -> Notice {
        self.push(NoticeKind::Success, message.into())
    }

    pub fn error(&self, message: impl Into<String>) -> Notice {
        self.push(NoticeKind::Error, message.into())
    }

    fn push(&self, kind: NoticeKind, message: String) -> Notice {
        let notice = Notice {
            id: Uuid::new_v4(),
            kind,
            message,
            expires_at: Utc::now() + self.dismiss_after,
        };
        let _ = self.tx.send(notice.clone());
        notice
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn stream(&self) -> BroadcastStream<Notice> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new(64, DEFAULT_DISMISS)
    }
}
