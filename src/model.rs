//! Records exchanged with the hosted backend.
//!
//! Full records (`Task`, `Comment`, `Profile`) come from collection reads.
//! Partial rows (`TaskRow`, `CommentRow`) come from the realtime feed, where a
//! deletion may only carry the primary key.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Employee => "employee",
        }
    }

    /// Managers and admins see and edit every task.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

/// Task urgency. The backend stores urgent tasks as `"bombe"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "bombe")]
    Urgent,
    #[default]
    #[serde(rename = "normal")]
    Normal,
}

impl Priority {
    pub fn is_urgent(&self) -> bool {
        matches!(self, Priority::Urgent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::InProgress => "in_progress",
            Status::Done => "done",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Todo => "To Do",
            Status::InProgress => "In Progress",
            Status::Done => "Done",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Status::Todo),
            "in_progress" | "in-progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: Priority,
    pub status: Status,
    #[serde(default, deserialize_with = "lenient_date")]
    pub due_date: Option<NaiveDate>,
    pub assigned_to: String,
    #[serde(default, deserialize_with = "embedded_name")]
    pub assigned_to_name: Option<String>,
    pub created_by: String,
    #[serde(default, deserialize_with = "embedded_name")]
    pub created_by_name: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_done() && self.due_date.is_some_and(|due| due < today)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    #[serde(default, deserialize_with = "embedded_name")]
    pub user_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn author_label(&self) -> &str {
        self.user_name.as_deref().unwrap_or("Unknown")
    }
}

/// Fields a patch can touch. Used by the permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskField {
    Title,
    Description,
    Priority,
    Status,
    DueDate,
    AssignedTo,
}

/// Partial update of a task. `description` and `due_date` distinguish
/// "leave unchanged" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_date_patch"
    )]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl TaskPatch {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    pub fn fields(&self) -> Vec<TaskField> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push(TaskField::Title);
        }
        if self.description.is_some() {
            fields.push(TaskField::Description);
        }
        if self.priority.is_some() {
            fields.push(TaskField::Priority);
        }
        if self.status.is_some() {
            fields.push(TaskField::Status);
        }
        if self.due_date.is_some() {
            fields.push(TaskField::DueDate);
        }
        if self.assigned_to.is_some() {
            fields.push(TaskField::AssignedTo);
        }
        fields
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(assigned_to) = &self.assigned_to {
            if *assigned_to != task.assigned_to {
                // The joined display name is stale until the next authoritative read.
                task.assigned_to_name = None;
            }
            task.assigned_to = assigned_to.clone();
        }
    }
}

/// Creation payload. New tasks always start as `todo`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub assigned_to: String,
    pub created_by: String,
    pub status: Status,
}

impl NewTask {
    pub fn new(title: &str, assigned_to: &str, created_by: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            description: None,
            priority: Priority::Normal,
            due_date: None,
            assigned_to: assigned_to.to_string(),
            created_by: created_by.to_string(),
            status: Status::Todo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewComment {
    pub task_id: String,
    pub user_id: String,
    pub content: String,
}

/// Server-side inbox row kind (`notifications.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxKind {
    TaskCompleted,
    StatusUpdated,
    CommentAdded,
}

/// A row for the `notifications` table, addressed to another user's inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: InboxKind,
}

impl NewNotification {
    /// Tell the task's creator about a status change.
    pub fn status_changed(task: &Task, status: Status) -> Self {
        let (title, message, kind) = match status {
            Status::Done => (
                "Task Completed",
                format!("Task \"{}\" has been marked as complete", task.title),
                InboxKind::TaskCompleted,
            ),
            _ => (
                "Task Status Updated",
                format!(
                    "Task \"{}\" status changed to {}",
                    task.title,
                    status.as_str().replace('_', " ")
                ),
                InboxKind::StatusUpdated,
            ),
        };
        Self {
            user_id: task.created_by.clone(),
            title: title.to_string(),
            message,
            kind,
        }
    }

    pub fn comment_added(task: &Task) -> Self {
        Self {
            user_id: task.created_by.clone(),
            title: "New Comment".to_string(),
            message: format!("New comment on task \"{}\"", task.title),
            kind: InboxKind::CommentAdded,
        }
    }
}

/// A task row as delivered by the change feed. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_date_patch"
    )]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            title: Some(task.title.clone()),
            description: Some(task.description.clone()),
            priority: Some(task.priority),
            status: Some(task.status),
            due_date: Some(task.due_date),
            assigned_to: Some(task.assigned_to.clone()),
            created_by: Some(task.created_by.clone()),
            updated_by: task.updated_by.clone(),
            created_at: Some(task.created_at),
            updated_at: Some(task.updated_at),
        }
    }

    /// Builds a full task when every required column is present.
    pub fn to_task(&self) -> Option<Task> {
        let created_at = self.created_at?;
        Some(Task {
            id: self.id.clone()?,
            title: self.title.clone()?,
            description: self.description.clone().flatten(),
            priority: self.priority?,
            status: self.status?,
            due_date: self.due_date.flatten(),
            assigned_to: self.assigned_to.clone()?,
            assigned_to_name: None,
            created_by: self.created_by.clone()?,
            created_by_name: None,
            updated_by: self.updated_by.clone(),
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// PostgREST embeds joined names as `{"full_name": "..."}`; persisted copies
/// carry a plain string.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddedName {
    Plain(String),
    Embedded { full_name: Option<String> },
}

fn embedded_name<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<EmbeddedName>::deserialize(de)? {
        Some(EmbeddedName::Plain(name)) => Some(name),
        Some(EmbeddedName::Embedded { full_name }) => full_name,
        None => None,
    })
}

/// Absent -> `None`, `null` -> `Some(None)`, value -> `Some(Some(v))`.
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Accepts `YYYY-MM-DD` as well as full timestamps (the date part is kept).
fn lenient_date<'de, D>(de: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(de)? else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("invalid due date: {}", raw)))
}

fn lenient_date_patch<'de, D>(de: D) -> Result<Option<Option<NaiveDate>>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_date(de).map(Some)
}
