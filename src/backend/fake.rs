//! In-memory backend for unit tests.

use super::{DataStore, TaskFilter};
use crate::error::SyncError;
use crate::model::{Comment, NewComment, NewNotification, NewTask, Profile, Task, TaskPatch};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct FakeStore {
    pub tasks: Mutex<Vec<Task>>,
    pub comments: Mutex<Vec<Comment>>,
    pub profiles: Mutex<VecDeque<Result<Option<Profile>, SyncError>>>,
    pub reject_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            ..Default::default()
        }
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn write_result(&self, context: &str) -> Result<(), SyncError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            Err(SyncError::Rejected {
                context: context.to_string(),
                status: 400,
                body: "rejected by fake".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn read_result(&self, context: &str) -> Result<(), SyncError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(SyncError::Transport {
                context: context.to_string(),
                message: "offline".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DataStore for FakeStore {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, SyncError> {
        self.record("list_tasks".to_string());
        self.read_result("fetchTasks")?;
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, SyncError> {
        self.record(format!("list_comments:{}", task_id));
        self.read_result("fetchComments")?;
        Ok(self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, SyncError> {
        self.record(format!("get_profile:{}", user_id));
        self.profiles.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn create_task(&self, task: &NewTask) -> Result<(), SyncError> {
        self.record("create_task".to_string());
        self.write_result("createTask")?;
        let now = Utc::now();
        let mut tasks = self.tasks.lock().unwrap();
        let id = format!("new-{}", tasks.len() + 1);
        tasks.push(Task {
            id,
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            status: task.status,
            due_date: task.due_date,
            assigned_to: task.assigned_to.clone(),
            assigned_to_name: None,
            created_by: task.created_by.clone(),
            created_by_name: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<(), SyncError> {
        self.record(format!("patch_task:{}", id));
        self.write_result("patchTask")?;
        if let Some(task) = self.tasks.lock().unwrap().iter_mut().find(|t| t.id == id) {
            patch.apply_to(task);
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), SyncError> {
        self.record(format!("delete_task:{}", id));
        self.write_result("deleteTask")?;
        self.tasks.lock().unwrap().retain(|t| t.id != id);
        Ok(())
    }

    async fn create_comment(&self, comment: &NewComment) -> Result<(), SyncError> {
        self.record(format!("create_comment:{}", comment.task_id));
        self.write_result("createComment")?;
        let mut comments = self.comments.lock().unwrap();
        let id = format!("c-{}", comments.len() + 1);
        comments.push(Comment {
            id,
            task_id: comment.task_id.clone(),
            user_id: comment.user_id.clone(),
            user_name: None,
            content: comment.content.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_comment(&self, id: &str) -> Result<(), SyncError> {
        self.record(format!("delete_comment:{}", id));
        self.write_result("deleteComment")?;
        self.comments.lock().unwrap().retain(|c| c.id != id);
        Ok(())
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<(), SyncError> {
        self.record(format!("insert_notification:{}", notification.user_id));
        self.write_result("insertNotification")
    }
}
