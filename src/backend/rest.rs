//! PostgREST client for the hosted backend.

use super::{DataStore, TaskFilter};
use crate::auth::AuthProvider;
use crate::config::BackendConfig;
use crate::error::SyncError;
use crate::logging;
use crate::model::{Comment, NewComment, NewNotification, NewTask, Profile, Task, TaskPatch};
use crate::retry::{RetryPolicy, with_retries};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const TASK_SELECT: &str = "*,assigned_to_name:profiles!tasks_assigned_to_fkey(full_name),created_by_name:profiles!tasks_created_by_fkey(full_name)";
const COMMENT_SELECT: &str = "*,user_name:profiles(full_name)";

pub struct RestDataStore {
    client: Client,
    base: String,
    anon_key: String,
    auth: Arc<dyn AuthProvider>,
    read_timeout: Duration,
    write_timeout: Duration,
    read_retry: RetryPolicy,
}

impl RestDataStore {
    pub fn new(config: &BackendConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("No backend URL configured (set TASKDASH_URL)"))?;
        let anon_key = config
            .anon_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No anon key configured (set TASKDASH_ANON_KEY)"))?;

        Ok(Self {
            client: Client::new(),
            base: format!("{}/rest/v1", url.trim_end_matches('/')),
            anon_key,
            auth,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            read_retry: config.read_retry_policy(),
        })
    }

    fn request(&self, method: Method, table: &str, query: &[(&str, String)], timeout: Duration) -> RequestBuilder {
        let bearer = self
            .auth
            .current_session()
            .map(|s| s.token)
            .unwrap_or_else(|| self.anon_key.clone());
        self.client
            .request(method, format!("{}/{}", self.base, table))
            .query(query)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Content-Type", "application/json")
            .timeout(timeout)
    }

    async fn read<T: DeserializeOwned>(&self, context: &str, table: &str, query: Vec<(&str, String)>) -> Result<T, SyncError> {
        let query = &query;
        with_retries(self.read_retry, context, || async move {
            let response = self
                .request(Method::GET, table, query, self.read_timeout)
                .send()
                .await
                .map_err(|e| SyncError::from_reqwest(context, e, self.read_timeout))?;
            let response = check_status(context, response).await?;
            let body = response
                .text()
                .await
                .map_err(|e| SyncError::from_reqwest(context, e, self.read_timeout))?;
            serde_json::from_str(&body).map_err(|e| SyncError::Decode {
                context: context.to_string(),
                message: e.to_string(),
            })
        })
        .await
    }

    /// Single attempt; the caller decides what a failure means.
    async fn write<B: Serialize + ?Sized>(
        &self,
        context: &str,
        method: Method,
        table: &str,
        query: Vec<(&str, String)>,
        body: Option<&B>,
    ) -> Result<(), SyncError> {
        let mut request = self
            .request(method, table, &query, self.write_timeout)
            .header("Prefer", "return=minimal");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(context, e, self.write_timeout))?;
        check_status(context, response).await?;
        logging::debug(&format!("{} ok", context));
        Ok(())
    }

    fn actor(&self) -> Option<String> {
        self.auth.current_session().map(|s| s.user_id)
    }
}

async fn check_status(context: &str, response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Rejected {
        context: context.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

fn task_list_query(filter: &TaskFilter) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", TASK_SELECT.to_string()),
        ("order", "priority.desc,created_at.desc".to_string()),
    ];
    if let Some(assignee) = &filter.assigned_to {
        query.push(("assigned_to", eq(assignee)));
    }
    query
}

fn comment_list_query(task_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("select", COMMENT_SELECT.to_string()),
        ("task_id", eq(task_id)),
        ("order", "created_at.asc".to_string()),
    ]
}

/// Patch body with the writer stamped as `updated_by`, so change-feed
/// consumers can tell who made the change.
fn patch_body(patch: &TaskPatch, actor: Option<&str>) -> Result<Value, SyncError> {
    let mut body = serde_json::to_value(patch).map_err(|e| SyncError::InvalidInput(e.to_string()))?;
    if let (Some(actor), Value::Object(map)) = (actor, &mut body) {
        map.insert("updated_by".to_string(), Value::String(actor.to_string()));
    }
    Ok(body)
}

#[async_trait]
impl DataStore for RestDataStore {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, SyncError> {
        self.read("fetchTasks", "tasks", task_list_query(filter)).await
    }

    async fn list_comments(&self, task_id: &str) -> Result<Vec<Comment>, SyncError> {
        self.read("fetchComments", "comments", comment_list_query(task_id))
            .await
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, SyncError> {
        let rows: Vec<Profile> = self
            .read("fetchProfile", "profiles", vec![("id", eq(user_id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_task(&self, task: &NewTask) -> Result<(), SyncError> {
        if task.title.is_empty() {
            return Err(SyncError::InvalidInput("task title is required".to_string()));
        }
        self.write("createTask", Method::POST, "tasks", vec![], Some(task))
            .await
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<(), SyncError> {
        let body = patch_body(patch, self.actor().as_deref())?;
        self.write("patchTask", Method::PATCH, "tasks", vec![("id", eq(id))], Some(&body))
            .await
    }

    async fn delete_task(&self, id: &str) -> Result<(), SyncError> {
        self.write::<Value>("deleteTask", Method::DELETE, "tasks", vec![("id", eq(id))], None)
            .await
    }

    async fn create_comment(&self, comment: &NewComment) -> Result<(), SyncError> {
        self.write("createComment", Method::POST, "comments", vec![], Some(comment))
            .await
    }

    async fn delete_comment(&self, id: &str) -> Result<(), SyncError> {
        self.write::<Value>(
            "deleteComment",
            Method::DELETE,
            "comments",
            vec![("id", eq(id))],
            None,
        )
        .await
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<(), SyncError> {
        self.write(
            "insertNotification",
            Method::POST,
            "notifications",
            vec![],
            Some(notification),
        )
        .await
    }
}
