//! User-facing alerts about changes made by other people.
//!
//! At most `max_visible` alerts are shown at once; the rest wait in a FIFO
//! overflow queue. The visible list is newest-first by the time an alert
//! became visible: a fresh push and a promotion from the overflow queue both
//! land at the front. Nothing is dropped except by explicit dismissal or a
//! session reset.
//!
//! The full set (visible, then queued) is mirrored to a [`KeyValueSlot`] on
//! every change so a restart does not lose pending alerts. Push, dismiss and
//! persistence never fail from the caller's point of view; storage errors are
//! logged.

use crate::logging;
use crate::storage::KeyValueSlot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

pub const DEFAULT_MAX_VISIBLE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskCreated,
    TaskUpdated,
    StatusChanged,
    TaskDeleted,
    CommentAdded,
    CommentDeleted,
}

impl NotificationKind {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationKind::TaskCreated => "New Task",
            NotificationKind::TaskUpdated => "Task Updated",
            NotificationKind::StatusChanged => "Status Changed",
            NotificationKind::TaskDeleted => "Task Deleted",
            NotificationKind::CommentAdded => "New Comment",
            NotificationKind::CommentDeleted => "Comment Deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub task_id: String,
    pub task_title: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

impl Notification {
    /// A notification with a fresh random id.
    pub fn new(task_id: &str, task_title: &str, kind: NotificationKind, message: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            task_title: task_title.to_string(),
            kind,
            message: message.to_string(),
            timestamp: Utc::now(),
            read: false,
            triggered_by: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Shown,
    Queued,
    Duplicate,
}

pub struct NotificationQueue {
    visible: VecDeque<Notification>,
    overflow: VecDeque<Notification>,
    unread_task_ids: HashSet<String>,
    max_visible: usize,
    slot: Box<dyn KeyValueSlot>,
}

impl NotificationQueue {
    /// Reload whatever the slot holds. A payload that does not parse is
    /// discarded and the queue starts empty.
    pub fn restore(max_visible: usize, slot: Box<dyn KeyValueSlot>) -> Self {
        let mut queue = Self {
            visible: VecDeque::new(),
            overflow: VecDeque::new(),
            unread_task_ids: HashSet::new(),
            max_visible: max_visible.max(1),
            slot,
        };

        let stored = match queue.slot.load() {
            Ok(stored) => stored,
            Err(e) => {
                logging::warn(&format!("Could not read stored notifications: {}", e));
                None
            }
        };
        let Some(raw) = stored else {
            return queue;
        };

        match serde_json::from_str::<Vec<Notification>>(&raw) {
            Ok(saved) => {
                let mut seen = HashSet::new();
                for n in saved {
                    if !seen.insert(n.id.clone()) {
                        continue;
                    }
                    if queue.visible.len() < queue.max_visible {
                        queue.visible.push_back(n);
                    } else {
                        queue.overflow.push_back(n);
                    }
                }
                queue.recompute_unread();
                logging::info(&format!(
                    "Restored {} notifications ({} queued)",
                    queue.len(),
                    queue.overflow.len()
                ));
            }
            Err(e) => {
                logging::warn(&format!("Discarding corrupt notification history: {}", e));
            }
        }
        queue
    }

    pub fn max_visible(&self) -> usize {
        self.max_visible
    }

    /// Idempotent by id: an id already shown or queued is ignored.
    pub fn push(&mut self, notification: Notification) -> PushOutcome {
        if self.contains(&notification.id) {
            logging::debug(&format!("Duplicate notification {}", notification.id));
            return PushOutcome::Duplicate;
        }

        let outcome = if self.visible.len() < self.max_visible {
            self.visible.push_front(notification);
            PushOutcome::Shown
        } else {
            self.overflow.push_back(notification);
            PushOutcome::Queued
        };
        self.changed();
        outcome
    }

    /// Remove an alert and promote the oldest queued one into the free slot.
    pub fn dismiss(&mut self, id: &str) -> bool {
        let removed = if let Some(pos) = self.visible.iter().position(|n| n.id == id) {
            self.visible.remove(pos);
            true
        } else if let Some(pos) = self.overflow.iter().position(|n| n.id == id) {
            self.overflow.remove(pos);
            true
        } else {
            false
        };
        if !removed {
            return false;
        }

        while self.visible.len() < self.max_visible {
            let Some(next) = self.overflow.pop_front() else {
                break;
            };
            self.visible.push_front(next);
        }
        self.changed();
        true
    }

    /// Mark every alert for `task_id` read. They stay in the queue.
    pub fn mark_task_read(&mut self, task_id: &str) -> usize {
        let mut marked = 0;
        for n in self.visible.iter_mut().chain(self.overflow.iter_mut()) {
            if n.task_id == task_id && !n.read {
                n.read = true;
                marked += 1;
            }
        }
        if marked > 0 {
            self.changed();
        }
        marked
    }

    pub fn mark_all_read(&mut self) {
        let mut any = false;
        for n in self.visible.iter_mut().chain(self.overflow.iter_mut()) {
            any |= !n.read;
            n.read = true;
        }
        if any {
            self.changed();
        }
    }

    /// First unread alert for a task, visible ones first.
    pub fn notification_for_task(&self, task_id: &str) -> Option<&Notification> {
        self.visible
            .iter()
            .chain(self.overflow.iter())
            .find(|n| n.task_id == task_id && !n.read)
    }

    /// Session reset: drop everything, including the durable copy.
    pub fn reset(&mut self) {
        self.visible.clear();
        self.overflow.clear();
        self.changed();
    }

    pub fn visible(&self) -> impl Iterator<Item = &Notification> {
        self.visible.iter()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Notification> {
        self.overflow.iter()
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    pub fn queued_len(&self) -> usize {
        self.overflow.len()
    }

    pub fn len(&self) -> usize {
        self.visible.len() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.visible.iter().chain(self.overflow.iter()).any(|n| n.id == id)
    }

    /// Task ids with at least one unread alert (badge rendering).
    pub fn unread_task_ids(&self) -> &HashSet<String> {
        &self.unread_task_ids
    }

    pub fn has_unread(&self, task_id: &str) -> bool {
        self.unread_task_ids.contains(task_id)
    }

    fn changed(&mut self) {
        self.recompute_unread();
        self.persist();
    }

    fn recompute_unread(&mut self) {
        self.unread_task_ids = self
            .visible
            .iter()
            .chain(self.overflow.iter())
            .filter(|n| !n.read)
            .map(|n| n.task_id.clone())
            .collect();
    }

    fn persist(&self) {
        let result = if self.is_empty() {
            self.slot.clear()
        } else {
            let all: Vec<&Notification> = self.visible.iter().chain(self.overflow.iter()).collect();
            serde_json::to_string(&all)
                .map_err(anyhow::Error::from)
                .and_then(|json| self.slot.store(&json))
        };
        if let Err(e) = result {
            logging::error(&format!("Failed to save notifications: {}", e));
        }
    }
}
