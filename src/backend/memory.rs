//! A backend that lives entirely in process memory.
//!
//! Used by `taskdash replay` when no hosted backend is configured, so
//! recorded feeds can be inspected offline.

use super::{DataStore, TaskFilter};
use crate::error::SyncError;
use crate::model::{Comment, NewComment, NewNotification, NewTask, Profile, Task, TaskPatch};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryDataStore {
    tasks: Mutex<Vec<Task>>,
    comments: Mutex<Vec<Comment>>,
    profiles: Mutex<Vec<Profile>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryDataStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            ..Default::default()
        }
    }

    pub fn add_profile(&self, profile: Profile) {
        guard(&self.profiles).push(profile);
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, SyncError> {
        let mut tasks: Vec<Task> = guard(&self.tasks)
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .is_urgent()
                .cmp(&a.priority.is_urgent())
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(tasks)
    }

    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, SyncError> {
        let mut comments: Vec<Comment> = guard(&self.comments)
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, SyncError> {
        Ok(guard(&self.profiles).iter().find(|p| p.id == user_id).cloned())
    }

    async fn create_task(&self, task: &NewTask) -> Result<(), SyncError> {
        let now = Utc::now();
        guard(&self.tasks).push(Task {
            id: uuid::Uuid::new_v4().to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            status: task.status,
            due_date: task.due_date,
            assigned_to: task.assigned_to.clone(),
            assigned_to_name: None,
            created_by: task.created_by.clone(),
            created_by_name: None,
            updated_by: Some(task.created_by.clone()),
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<(), SyncError> {
        if let Some(task) = guard(&self.tasks).iter_mut().find(|t| t.id == id) {
            patch.apply_to(task);
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), SyncError> {
        guard(&self.tasks).retain(|t| t.id != id);
        guard(&self.comments).retain(|c| c.task_id != id);
        Ok(())
    }

    async fn create_comment(&self, comment: &NewComment) -> Result<(), SyncError> {
        guard(&self.comments).push(Comment {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: comment.task_id.clone(),
            user_id: comment.user_id.clone(),
            user_name: None,
            content: comment.content.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_comment(&self, id: &str) -> Result<(), SyncError> {
        guard(&self.comments).retain(|c| c.id != id);
        Ok(())
    }

    /// Nobody reads another user's inbox offline.
    async fn insert_notification(&self, _notification: &NewNotification) -> Result<(), SyncError> {
        Ok(())
    }
}
