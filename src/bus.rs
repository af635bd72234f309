//! Publish/subscribe channel between the sync session and whatever renders it.
//!
//! The bus is constructed explicitly and passed by reference (or cloned);
//! there is no process-wide instance, so tests can watch their own session.

use crate::notifications::Notification;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A reconciling fetch installed a fresh task set
    TasksReplaced { count: usize },
    /// An optimistic patch was applied locally (or rolled back)
    TaskChanged { task_id: String },
    /// A task entered or left the in-flight set
    BusyChanged { task_id: String, busy: bool },
    /// Comments of the open task were (re)loaded
    CommentsLoaded { task_id: String, count: usize },
    /// A new alert was shown or queued
    NotificationAdded(Notification),
    /// The visible/queued alert set changed in any other way
    NotificationsChanged,
    /// Blocking spinner on/off
    Loading(bool),
    /// Non-blocking, user-visible error
    Error { message: String },
}

#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget; no subscribers is not an error.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(SyncEvent::Error {
            message: message.into(),
        });
    }
}
