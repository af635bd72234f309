//! Turns raw change-feed messages into canonical change events, decides
//! whether the viewer should hear about them, and words the alert.
//!
//! Every message yields a refresh target, even when it cannot be attributed
//! or is too malformed to produce an event: the store must converge either way.

use crate::logging;
use crate::model::{Comment, CommentRow, Task, TaskRow};
use crate::notifications::{Notification, NotificationKind};
use crate::permissions::Viewer;
use crate::realtime::{ChangeKind, FeedMessage, RealtimePayload};
use crate::store::EntityStore;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Change<R> {
    pub kind: ChangeKind,
    pub entity_id: String,
    /// Row before the change: the feed's `old`, completed from the store
    pub previous: Option<R>,
    pub current: Option<R>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Task(Change<TaskRow>),
    Comment(Change<CommentRow>),
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Task(c) => c.kind,
            ChangeEvent::Comment(c) => c.kind,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            ChangeEvent::Task(c) => &c.entity_id,
            ChangeEvent::Comment(c) => &c.entity_id,
        }
    }

    pub fn actor_id(&self) -> Option<&str> {
        match self {
            ChangeEvent::Task(c) => c.actor_id.as_deref(),
            ChangeEvent::Comment(c) => c.actor_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    Tasks,
    /// Comments of the given task, or of whichever task is open when unknown
    Comments { task_id: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub event: Option<ChangeEvent>,
    pub notification: Option<Notification>,
    pub refresh: RefreshTarget,
}

impl Normalized {
    fn refresh_only(refresh: RefreshTarget) -> Self {
        Self {
            event: None,
            notification: None,
            refresh,
        }
    }
}

pub struct Normalizer {
    viewer: Viewer,
    /// Ids this viewer deleted. Their feed echo carries no actor.
    own_deletes: HashSet<String>,
}

impl Normalizer {
    pub fn new(viewer: Viewer) -> Self {
        Self {
            viewer,
            own_deletes: HashSet::new(),
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Attribute the next DELETE echo for `id` to the viewer.
    pub fn expect_own_delete(&mut self, id: &str) {
        self.own_deletes.insert(id.to_string());
    }

    /// Forget an expected echo (the delete failed).
    pub fn forget_own_delete(&mut self, id: &str) {
        self.own_deletes.remove(id);
    }

    pub fn normalize(&mut self, message: &FeedMessage, store: &EntityStore) -> Normalized {
        match message {
            FeedMessage::Task(payload) => self.normalize_task(payload, store),
            FeedMessage::Comment(payload) => self.normalize_comment(payload, store),
        }
    }

    fn normalize_task(&mut self, payload: &RealtimePayload<TaskRow>, store: &EntityStore) -> Normalized {
        let kind = payload.kind();
        let (current, raw_previous) = match payload {
            RealtimePayload::Insert { new } => (Some(new), None),
            RealtimePayload::Update { new, old } => (Some(new), old.as_ref()),
            RealtimePayload::Delete { old } => (None, Some(old)),
        };

        let entity_id = current
            .and_then(|r| r.id.clone())
            .or_else(|| raw_previous.and_then(|r| r.id.clone()));
        let Some(entity_id) = entity_id else {
            logging::warn(&format!("Task {} without an id; refreshing", kind.as_str()));
            return Normalized::refresh_only(RefreshTarget::Tasks);
        };

        let known = store.get(&entity_id);
        let previous = match kind {
            ChangeKind::Insert => None,
            _ => complete_task_row(raw_previous, known),
        };

        let actor_id = match kind {
            ChangeKind::Insert => current.and_then(|r| r.updated_by.clone().or_else(|| r.created_by.clone())),
            ChangeKind::Update => current.and_then(|r| r.updated_by.clone()),
            ChangeKind::Delete => self.take_own_delete(&entity_id),
        };

        let relevant = self.task_is_relevant(current, previous.as_ref());
        let change = Change {
            kind,
            entity_id,
            previous,
            current: current.cloned(),
            actor_id,
        };

        if !relevant {
            logging::debug(&format!("Ignoring task {} for another assignee", change.entity_id));
            return Normalized::refresh_only(RefreshTarget::Tasks);
        }

        let notification = if self.is_own(change.actor_id.as_deref()) {
            None
        } else {
            self.task_notification(&change, raw_previous)
        };

        Normalized {
            event: Some(ChangeEvent::Task(change)),
            notification,
            refresh: RefreshTarget::Tasks,
        }
    }

    fn normalize_comment(&mut self, payload: &RealtimePayload<CommentRow>, store: &EntityStore) -> Normalized {
        let kind = payload.kind();
        let (current, raw_previous) = match payload {
            RealtimePayload::Insert { new } => (Some(new), None),
            RealtimePayload::Update { new, old } => (Some(new), old.as_ref()),
            RealtimePayload::Delete { old } => (None, Some(old)),
        };

        let entity_id = current
            .and_then(|r| r.id.clone())
            .or_else(|| raw_previous.and_then(|r| r.id.clone()));
        let known = entity_id.as_deref().and_then(|id| store.comment(id));
        let previous = match kind {
            ChangeKind::Insert => None,
            _ => complete_comment_row(raw_previous, known),
        };
        let task_id = current
            .and_then(|r| r.task_id.clone())
            .or_else(|| previous.as_ref().and_then(|r| r.task_id.clone()));
        let refresh = RefreshTarget::Comments {
            task_id: task_id.clone(),
        };

        let Some(entity_id) = entity_id else {
            logging::warn(&format!("Comment {} without an id; refreshing", kind.as_str()));
            return Normalized::refresh_only(refresh);
        };

        // Only the author can delete a comment, so the row's author is the actor.
        let actor_id = match kind {
            ChangeKind::Delete => self
                .take_own_delete(&entity_id)
                .or_else(|| previous.as_ref().and_then(|r| r.user_id.clone())),
            _ => current.and_then(|r| r.user_id.clone()),
        };

        if let Some(task_id) = task_id.as_deref() {
            let visible = store.get(task_id).is_some() || store.selected_id() == Some(task_id);
            if !self.viewer.is_supervisor() && !visible {
                logging::debug(&format!("Ignoring comment on foreign task {}", task_id));
                return Normalized::refresh_only(refresh);
            }
        }

        let change = Change {
            kind,
            entity_id,
            previous,
            current: current.cloned(),
            actor_id,
        };

        let notification = match task_id.as_deref() {
            Some(task_id) if !self.is_own(change.actor_id.as_deref()) => {
                self.comment_notification(&change, task_id, store)
            }
            _ => None,
        };

        Normalized {
            event: Some(ChangeEvent::Comment(change)),
            notification,
            refresh,
        }
    }

    fn take_own_delete(&mut self, id: &str) -> Option<String> {
        self.own_deletes
            .remove(id)
            .then(|| self.viewer.user_id.clone())
    }

    fn is_own(&self, actor_id: Option<&str>) -> bool {
        actor_id.is_some_and(|a| self.viewer.is(a))
    }

    /// Supervisors hear about everything. Employees hear about tasks that are,
    /// or were, assigned to them. Unknown ownership counts as relevant.
    fn task_is_relevant(&self, current: Option<&TaskRow>, previous: Option<&TaskRow>) -> bool {
        if self.viewer.is_supervisor() {
            return true;
        }
        let owners: Vec<&str> = [current, previous]
            .into_iter()
            .flatten()
            .filter_map(|r| r.assigned_to.as_deref())
            .collect();
        owners.is_empty() || owners.iter().any(|o| self.viewer.is(o))
    }

    /// `raw_previous` is the feed's own `old`, before completion from the store.
    fn task_notification(&self, change: &Change<TaskRow>, raw_previous: Option<&TaskRow>) -> Option<Notification> {
        let title = change
            .current
            .as_ref()
            .and_then(|r| r.title.clone())
            .or_else(|| change.previous.as_ref().and_then(|r| r.title.clone()))
            .unwrap_or_else(|| "Untitled task".to_string());

        let (kind, message, fingerprint) = match change.kind {
            ChangeKind::Insert => {
                let assigned_to_viewer = change
                    .current
                    .as_ref()
                    .and_then(|r| r.assigned_to.as_deref())
                    .is_some_and(|a| self.viewer.is(a));
                let message = if assigned_to_viewer {
                    format!("New task assigned to you: \"{}\"", title)
                } else {
                    format!("New task \"{}\"", title)
                };
                (
                    NotificationKind::TaskCreated,
                    message,
                    Some(format!("tasks:insert:{}", change.entity_id)),
                )
            }
            ChangeKind::Delete => (
                NotificationKind::TaskDeleted,
                format!("Task \"{}\" was deleted", title),
                Some(format!("tasks:delete:{}", change.entity_id)),
            ),
            ChangeKind::Update => {
                let current = change.current.as_ref()?;
                let fingerprint = current.updated_at.map(|at| {
                    format!("tasks:update:{}:{}", change.entity_id, at.timestamp_millis())
                });
                // A store copy may already hold this row (a reconcile beat the
                // echo), so only the feed's `old` can prove nothing changed.
                let old_is_comparable = raw_previous.is_some_and(|raw| describe_changes(raw, current).is_some());
                let changes = match change.previous.as_ref().and_then(|p| describe_changes(p, current)) {
                    Some(changes) if changes.is_empty() && old_is_comparable => return None,
                    Some(changes) if changes.is_empty() => None,
                    other => other,
                };
                match changes {
                    None => (
                        NotificationKind::TaskUpdated,
                        "Task details updated".to_string(),
                        fingerprint,
                    ),
                    Some(changes) if changes.len() == 1 => {
                        let kind = if changes[0].field == "status" {
                            NotificationKind::StatusChanged
                        } else {
                            NotificationKind::TaskUpdated
                        };
                        (kind, format!("Task \"{}\": {}", title, changes[0].text), fingerprint)
                    }
                    Some(changes) => (
                        NotificationKind::TaskUpdated,
                        format!(
                            "Task \"{}\": {} changes: {}",
                            title,
                            changes.len(),
                            join_changes(&changes)
                        ),
                        fingerprint,
                    ),
                }
            }
        };

        Some(build(
            &change.entity_id,
            &title,
            kind,
            &message,
            fingerprint,
            change.actor_id.clone(),
        ))
    }

    fn comment_notification(
        &self,
        change: &Change<CommentRow>,
        task_id: &str,
        store: &EntityStore,
    ) -> Option<Notification> {
        let title = store
            .get(task_id)
            .or_else(|| store.selected().filter(|t| t.id == task_id))
            .map(|t| t.title.clone())
            .unwrap_or_else(|| "a task".to_string());

        let (kind, message) = match change.kind {
            ChangeKind::Insert => (
                NotificationKind::CommentAdded,
                format!("New comment on task \"{}\"", title),
            ),
            ChangeKind::Delete => (
                NotificationKind::CommentDeleted,
                format!("A comment was removed from task \"{}\"", title),
            ),
            ChangeKind::Update => return None,
        };
        let fingerprint = format!("comments:{}:{}", change.kind.as_str(), change.entity_id);

        Some(build(
            task_id,
            &title,
            kind,
            &message,
            Some(fingerprint),
            change.actor_id.clone(),
        ))
    }
}

/// Same fingerprint, same id: a redelivered event is suppressed by the
/// queue's idempotent push.
pub fn notification_id(fingerprint: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("taskdash:{}", fingerprint).as_bytes()).to_string()
}

fn build(
    task_id: &str,
    title: &str,
    kind: NotificationKind,
    message: &str,
    fingerprint: Option<String>,
    actor: Option<String>,
) -> Notification {
    let mut notification = Notification::new(task_id, title, kind, message);
    if let Some(fingerprint) = fingerprint {
        notification.id = notification_id(&fingerprint);
    }
    notification.triggered_by = actor;
    notification
}

/// The feed's `old` row, with gaps filled from the store's last-known copy.
fn complete_task_row(raw: Option<&TaskRow>, known: Option<&Task>) -> Option<TaskRow> {
    let base = known.map(TaskRow::from_task);
    match (raw, base) {
        (None, base) => base,
        (Some(raw), None) => Some(raw.clone()),
        (Some(raw), Some(base)) => Some(TaskRow {
            id: raw.id.clone().or(base.id),
            title: raw.title.clone().or(base.title),
            description: raw.description.clone().or(base.description),
            priority: raw.priority.or(base.priority),
            status: raw.status.or(base.status),
            due_date: raw.due_date.or(base.due_date),
            assigned_to: raw.assigned_to.clone().or(base.assigned_to),
            created_by: raw.created_by.clone().or(base.created_by),
            updated_by: raw.updated_by.clone().or(base.updated_by),
            created_at: raw.created_at.or(base.created_at),
            updated_at: raw.updated_at.or(base.updated_at),
        }),
    }
}

fn complete_comment_row(raw: Option<&CommentRow>, known: Option<&Comment>) -> Option<CommentRow> {
    let base = known.map(|c| CommentRow {
        id: Some(c.id.clone()),
        task_id: Some(c.task_id.clone()),
        user_id: Some(c.user_id.clone()),
        content: Some(c.content.clone()),
        created_at: Some(c.created_at),
    });
    match (raw, base) {
        (None, base) => base,
        (Some(raw), None) => Some(raw.clone()),
        (Some(raw), Some(base)) => Some(CommentRow {
            id: raw.id.clone().or(base.id),
            task_id: raw.task_id.clone().or(base.task_id),
            user_id: raw.user_id.clone().or(base.user_id),
            content: raw.content.clone().or(base.content),
            created_at: raw.created_at.or(base.created_at),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDescriptor {
    pub field: &'static str,
    pub text: String,
}

impl ChangeDescriptor {
    fn new(field: &'static str, text: impl Into<String>) -> Self {
        Self {
            field,
            text: text.into(),
        }
    }
}

/// Human-readable differences between two rows. `None` when the rows share
/// no comparable column, so nothing can be said either way.
pub fn describe_changes(previous: &TaskRow, current: &TaskRow) -> Option<Vec<ChangeDescriptor>> {
    let mut compared = false;
    let mut changes = Vec::new();

    if let (Some(before), Some(after)) = (previous.status, current.status) {
        compared = true;
        if before != after {
            changes.push(ChangeDescriptor::new(
                "status",
                format!("status changed to {}", after.label()),
            ));
        }
    }
    if let (Some(before), Some(after)) = (previous.priority, current.priority) {
        compared = true;
        if before != after {
            let text = if after.is_urgent() {
                "marked urgent"
            } else {
                "no longer urgent"
            };
            changes.push(ChangeDescriptor::new("priority", text));
        }
    }
    if let (Some(before), Some(after)) = (previous.due_date, current.due_date) {
        compared = true;
        match (before, after) {
            (b, a) if b == a => {}
            (_, Some(day)) if before.is_none() => {
                changes.push(ChangeDescriptor::new("due_date", format!("due date set to {}", day)))
            }
            (_, Some(day)) => {
                changes.push(ChangeDescriptor::new("due_date", format!("due date moved to {}", day)))
            }
            (_, None) => changes.push(ChangeDescriptor::new("due_date", "due date cleared")),
        }
    }
    if let (Some(before), Some(after)) = (&previous.title, &current.title) {
        compared = true;
        if before != after {
            changes.push(ChangeDescriptor::new("title", "title changed"));
        }
    }
    if let (Some(before), Some(after)) = (&previous.description, &current.description) {
        compared = true;
        if before != after {
            changes.push(ChangeDescriptor::new("description", "description changed"));
        }
    }
    if let (Some(before), Some(after)) = (&previous.assigned_to, &current.assigned_to) {
        compared = true;
        if before != after {
            changes.push(ChangeDescriptor::new("assigned_to", "reassigned"));
        }
    }

    compared.then_some(changes)
}

/// "a", "a and b", "a, b and c"
fn join_changes(changes: &[ChangeDescriptor]) -> String {
    match changes {
        [] => String::new(),
        [only] => only.text.clone(),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(|c| c.text.as_str()).collect();
            format!("{} and {}", head.join(", "), last.text)
        }
    }
}
