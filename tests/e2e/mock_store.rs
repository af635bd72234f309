//! Mock data store for e2e tests
//!
//! Serves a current task set (or pre-scripted list responses), records every
//! write and can be told to fail or stall.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use taskdash::SyncError;
use taskdash::backend::{DataStore, TaskFilter};
use taskdash::model::{
    Comment, NewComment, NewNotification, NewTask, Priority, Profile, Role, Status, Task,
    TaskPatch,
};
use tokio::sync::Notify;

/// A write the session sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    CreateTask(NewTask),
    PatchTask(String, TaskPatch),
    DeleteTask(String),
    CreateComment(NewComment),
    DeleteComment(String),
}

#[derive(Default)]
pub struct MockDataStore {
    tasks: Mutex<Vec<Task>>,
    list_responses: Mutex<VecDeque<Vec<Task>>>,
    comments: Mutex<Vec<Comment>>,
    profiles: Mutex<VecDeque<Option<Profile>>>,
    write_failures: Mutex<VecDeque<SyncError>>,
    writes: Mutex<Vec<Write>>,
    list_calls: Mutex<usize>,
    stall_reads: Mutex<bool>,
    write_gate: Mutex<Option<Arc<Notify>>>,
    inbox: Mutex<Vec<NewNotification>>,
}

impl MockDataStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            ..Default::default()
        }
    }

    /// Returned by the next `list_tasks` call instead of the current set
    pub fn queue_list(&self, tasks: Vec<Task>) {
        self.list_responses.lock().unwrap().push_back(tasks);
    }

    pub fn queue_profile(&self, profile: Option<Profile>) {
        self.profiles.lock().unwrap().push_back(profile);
    }

    pub fn fail_next_write(&self, error: SyncError) {
        self.write_failures.lock().unwrap().push_back(error);
    }

    pub fn stall_reads(&self, stall: bool) {
        *self.stall_reads.lock().unwrap() = stall;
    }

    /// Hold every write until the returned handle is notified
    pub fn gate_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.write_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn add_comment(&self, comment: Comment) {
        self.comments.lock().unwrap().push(comment);
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    /// Inbox rows sent to other users, outside the write log
    pub fn inbox(&self) -> Vec<NewNotification> {
        self.inbox.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    async fn write(&self, write: Write) -> Result<(), SyncError> {
        let gate = self.write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.writes.lock().unwrap().push(write);
        match self.write_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn before_read(&self) {
        let stall = *self.stall_reads.lock().unwrap();
        if stall {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl DataStore for MockDataStore {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, SyncError> {
        *self.list_calls.lock().unwrap() += 1;
        self.before_read().await;
        let scripted = self.list_responses.lock().unwrap().pop_front();
        let tasks = scripted.unwrap_or_else(|| self.tasks.lock().unwrap().clone());
        Ok(tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, SyncError> {
        self.before_read().await;
        Ok(self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn get_profile(&self, _user_id: &str) -> Result<Option<Profile>, SyncError> {
        Ok(self.profiles.lock().unwrap().pop_front().flatten())
    }

    async fn create_task(&self, task: &NewTask) -> Result<(), SyncError> {
        self.write(Write::CreateTask(task.clone())).await
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<(), SyncError> {
        self.write(Write::PatchTask(id.to_string(), patch.clone())).await?;
        if let Some(task) = self.tasks.lock().unwrap().iter_mut().find(|t| t.id == id) {
            patch.apply_to(task);
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), SyncError> {
        self.write(Write::DeleteTask(id.to_string())).await?;
        self.tasks.lock().unwrap().retain(|t| t.id != id);
        Ok(())
    }

    async fn create_comment(&self, comment: &NewComment) -> Result<(), SyncError> {
        self.write(Write::CreateComment(comment.clone())).await?;
        let mut comments = self.comments.lock().unwrap();
        let id = format!("c{}", comments.len() + 1);
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
        self.write(Write::DeleteComment(id.to_string())).await?;
        self.comments.lock().unwrap().retain(|c| c.id != id);
        Ok(())
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<(), SyncError> {
        self.inbox.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn at(seconds: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

pub fn task(id: &str, status: Status, priority: Priority, created: i64, assignee: &str) -> Task {
    Task {
        id: id.to_string(),
        title: format!("Task {}", id),
        description: None,
        priority,
        status,
        due_date: None,
        assigned_to: assignee.to_string(),
        assigned_to_name: None,
        created_by: "mgr-1".to_string(),
        created_by_name: Some("Manager One".to_string()),
        updated_by: None,
        created_at: at(created),
        updated_at: at(created),
    }
}

pub fn profile(id: &str, role: Role) -> Profile {
    Profile {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        full_name: format!("User {}", id),
        role,
        avatar_url: None,
        created_at: at(0),
        updated_at: at(0),
    }
}
