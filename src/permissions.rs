//! Who may see and change what.

use crate::error::SyncError;
use crate::model::{Comment, Profile, Role, Task, TaskField, TaskPatch};

/// The signed-in user, as far as scoping and attribution are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
    pub role: Role,
    pub name: Option<String>,
}

impl Viewer {
    pub fn new(user_id: &str, role: Role) -> Self {
        Self {
            user_id: user_id.to_string(),
            role,
            name: None,
        }
    }

    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            user_id: profile.id.clone(),
            role: profile.role,
            name: Some(profile.full_name.clone()),
        }
    }

    pub fn is_supervisor(&self) -> bool {
        self.role.is_supervisor()
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Employees only ever see their own assignments.
    pub fn can_see(&self, task: &Task) -> bool {
        self.is_supervisor() || self.is(&task.assigned_to)
    }

    /// Full edit rights: creator, manager or admin.
    pub fn owns(&self, task: &Task) -> bool {
        self.is_supervisor() || self.is(&task.created_by)
    }
}

const ASSIGNEE_FIELDS: &[TaskField] = &[TaskField::Status, TaskField::Priority];

pub fn check_patch(viewer: &Viewer, task: &Task, patch: &TaskPatch) -> Result<(), SyncError> {
    if viewer.owns(task) {
        return Ok(());
    }
    if !viewer.is(&task.assigned_to) {
        return Err(SyncError::Forbidden(format!(
            "task {} is not assigned to you",
            task.id
        )));
    }
    let denied: Vec<TaskField> = patch
        .fields()
        .into_iter()
        .filter(|f| !ASSIGNEE_FIELDS.contains(f))
        .collect();
    if denied.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Forbidden(format!(
            "assignees may only change status and priority (tried {:?})",
            denied
        )))
    }
}

pub fn check_delete_task(viewer: &Viewer, task: &Task) -> Result<(), SyncError> {
    if viewer.owns(task) {
        Ok(())
    } else {
        Err(SyncError::Forbidden(format!(
            "only the creator or a manager may delete task {}",
            task.id
        )))
    }
}

pub fn check_delete_comment(viewer: &Viewer, comment: &Comment) -> Result<(), SyncError> {
    if viewer.is(&comment.user_id) {
        Ok(())
    } else {
        Err(SyncError::Forbidden(
            "comments can only be deleted by their author".to_string(),
        ))
    }
}
