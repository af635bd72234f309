//! In-memory cache of the viewer's visible tasks, plus the comments of the
//! task currently open in the detail view.
//!
//! Every operation on an id that is no longer cached is a no-op: the view may
//! still be showing an entity another actor already deleted.

use crate::model::{Comment, Task, TaskPatch};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle shared by the list view, the detail view and the coordinator.
/// Never hold the guard across an `.await`.
pub type SharedStore = Arc<Mutex<EntityStore>>;

pub fn shared(store: EntityStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub fn lock(store: &SharedStore) -> MutexGuard<'_, EntityStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct EntityStore {
    tasks: Vec<Task>,
    selected: Option<Task>,
    comments: Vec<Comment>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Merge `patch` into the cached task and return the pre-patch copy for
    /// rollback. The open detail view sees the same change.
    pub fn apply_optimistic(&mut self, id: &str, patch: &TaskPatch) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == id)?;
        let snapshot = task.clone();
        patch.apply_to(task);
        let updated = task.clone();
        self.sync_selected(updated);
        Some(snapshot)
    }

    pub fn rollback(&mut self, id: &str, snapshot: Task) {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return;
        };
        *task = snapshot.clone();
        self.sync_selected(snapshot);
    }

    /// Install the authoritative set from a reconciling fetch.
    ///
    /// The selection is re-pointed at the fresh copy when it is still present.
    /// When it disappeared the last known value stays selected, so an open
    /// detail view is never force-closed.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        let fresh = self
            .selected
            .as_ref()
            .and_then(|sel| self.tasks.iter().find(|t| t.id == sel.id))
            .cloned();
        if let Some(fresh) = fresh {
            self.selected = Some(fresh);
        }
    }

    pub fn select(&mut self, id: &str) -> Option<&Task> {
        let task = self.get(id)?.clone();
        if self.selected.as_ref().map(|t| t.id.as_str()) != Some(id) {
            self.comments.clear();
        }
        self.selected = Some(task);
        self.selected.as_ref()
    }

    pub fn selected(&self) -> Option<&Task> {
        self.selected.as_ref()
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_ref().map(|t| t.id.as_str())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.comments.clear();
    }

    /// Comments are only kept for the open task; late responses for a task
    /// that is no longer open are dropped.
    pub fn set_comments(&mut self, task_id: &str, comments: Vec<Comment>) -> bool {
        if self.selected_id() != Some(task_id) {
            return false;
        }
        self.comments = comments;
        true
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn comment(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    fn sync_selected(&mut self, task: Task) {
        if let Some(selected) = self.selected.as_mut() {
            if selected.id == task.id {
                *selected = task;
            }
        }
    }
}
