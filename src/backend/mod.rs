//! Hosted data store, consumed through a trait so sessions can run against
//! the REST backend or a scripted fake.

pub mod memory;
pub mod rest;

use crate::error::SyncError;
use crate::logging;
use crate::model::{Comment, NewComment, NewNotification, NewTask, Profile, Task, TaskPatch};
use crate::permissions::Viewer;
use crate::retry::RetryPolicy;
use async_trait::async_trait;

pub use memory::MemoryDataStore;
pub use rest::RestDataStore;

/// Row filter for task reads (and, in the hosted product, for the realtime
/// subscription).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub assigned_to: Option<String>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Employees are scoped to their own assignments.
    pub fn for_viewer(viewer: &Viewer) -> Self {
        if viewer.is_supervisor() {
            Self::all()
        } else {
            Self {
                assigned_to: Some(viewer.user_id.clone()),
            }
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.assigned_to
            .as_deref()
            .is_none_or(|id| id == task.assigned_to)
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, SyncError>;

    /// Comments of one task, oldest first.
    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, SyncError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, SyncError>;

    async fn create_task(&self, task: &NewTask) -> Result<(), SyncError>;

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<(), SyncError>;

    async fn delete_task(&self, id: &str) -> Result<(), SyncError>;

    async fn create_comment(&self, comment: &NewComment) -> Result<(), SyncError>;

    async fn delete_comment(&self, id: &str) -> Result<(), SyncError>;

    /// Drop a row into another user's server-side inbox.
    async fn insert_notification(&self, notification: &NewNotification) -> Result<(), SyncError>;
}

/// The profile row is created by a trigger right after sign-up, so a fresh
/// user may briefly have none. Retries on a missing row and on transient
/// errors; `Ok(None)` once the attempts are used up without finding one.
pub async fn fetch_profile_with_retry(
    store: &dyn DataStore,
    user_id: &str,
    policy: RetryPolicy,
) -> Result<Option<Profile>, SyncError> {
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;
    let mut last_error = None;

    while attempts < max_attempts {
        if attempts > 0 {
            tokio::time::sleep(policy.delay).await;
        }
        attempts += 1;

        match store.get_profile(user_id).await {
            Ok(Some(profile)) => return Ok(Some(profile)),
            Ok(None) => {
                logging::debug(&format!(
                    "Profile {} not found (attempt {}/{})",
                    user_id, attempts, max_attempts
                ));
                last_error = None;
            }
            Err(e) if e.is_transient() => {
                logging::warn(&format!(
                    "Profile fetch failed (attempt {}/{}): {}",
                    attempts, max_attempts, e
                ));
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => {
            logging::warn(&format!(
                "No profile for {} after {} attempts",
                user_id, attempts
            ));
            Ok(None)
        }
    }
}

#[cfg(test)]
pub(crate) mod fake;
