//! A signed-in viewer's live dashboard state.
//!
//! `SyncSession` owns the store, the notification queue and the refresh
//! machinery, and is the only thing views talk to. It is constructed
//! explicitly and shared by reference; changes are announced on its [`Bus`].

use crate::auth::AuthProvider;
use crate::backend::{DataStore, TaskFilter, fetch_profile_with_retry};
use crate::bus::{Bus, SyncEvent};
use crate::config::Config;
use crate::coordinator::{MutationCoordinator, MutationOutcome};
use crate::error::SyncError;
use crate::logging;
use crate::model::{Comment, NewComment, NewNotification, NewTask, Priority, Status, Task, TaskPatch};
use crate::normalize::{Normalizer, RefreshTarget};
use crate::notifications::{Notification, NotificationQueue, PushOutcome};
use crate::permissions::{self, Viewer};
use crate::realtime::{ChangeFeed, FeedMessage};
use crate::reconcile::Reconciler;
use crate::retry::RetryPolicy;
use crate::storage::KeyValueSlot;
use crate::store::{self, EntityStore, SharedStore};
use crate::view::{self, ListFilter, TaskStats};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub debounce: Duration,
    pub watchdog: Duration,
    pub max_visible: usize,
    pub clear_urgent_on_done: bool,
    pub profile_retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.sync.debounce(),
            watchdog: config.sync.watchdog(),
            max_visible: config.notifications.max_visible,
            clear_urgent_on_done: config.tasks.clear_urgent_on_done,
            profile_retry: config.sync.profile_retry_policy(),
        }
    }
}

pub struct SyncSession {
    viewer: Viewer,
    store: SharedStore,
    backend: Arc<dyn DataStore>,
    bus: Bus,
    normalizer: Mutex<Normalizer>,
    notifications: Mutex<NotificationQueue>,
    reconciler: Reconciler,
    coordinator: MutationCoordinator,
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        logging::clear_context();
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SyncSession {
    pub fn new(
        viewer: Viewer,
        backend: Arc<dyn DataStore>,
        slot: Box<dyn KeyValueSlot>,
        options: SessionOptions,
        bus: Bus,
    ) -> Self {
        let store = store::shared(EntityStore::new());
        let reconciler = Reconciler::new(
            store.clone(),
            backend.clone(),
            bus.clone(),
            TaskFilter::for_viewer(&viewer),
            options.debounce,
            options.watchdog,
        );
        let coordinator = MutationCoordinator::new(
            store.clone(),
            backend.clone(),
            bus.clone(),
            reconciler.clone(),
            options.clear_urgent_on_done,
        );
        logging::set_viewer(&viewer.user_id, viewer.role.as_str());

        Self {
            normalizer: Mutex::new(Normalizer::new(viewer.clone())),
            notifications: Mutex::new(NotificationQueue::restore(options.max_visible, slot)),
            viewer,
            store,
            backend,
            bus,
            reconciler,
            coordinator,
        }
    }

    /// Resolve the signed-in user's profile and build a session for them.
    pub async fn connect(
        auth: &dyn AuthProvider,
        backend: Arc<dyn DataStore>,
        slot: Box<dyn KeyValueSlot>,
        options: SessionOptions,
        bus: Bus,
    ) -> Result<Self> {
        let session = auth
            .current_session()
            .ok_or_else(|| anyhow::anyhow!("Not signed in (set TASKDASH_TOKEN and TASKDASH_USER_ID)"))?;
        let profile = fetch_profile_with_retry(backend.as_ref(), &session.user_id, options.profile_retry)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No profile found for user {}", session.user_id))?;

        logging::info(&format!(
            "Session for {} ({})",
            profile.full_name,
            profile.role.as_str()
        ));
        Ok(Self::new(Viewer::from_profile(&profile), backend, slot, options, bus))
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    // --- reads ---

    pub fn tasks(&self) -> Vec<Task> {
        store::lock(&self.store).get_all().to_vec()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        store::lock(&self.store).get(id).cloned()
    }

    /// Filtered and in display order, recomputed on every call.
    pub fn sorted_tasks(&self, filter: &ListFilter) -> Vec<Task> {
        let store = store::lock(&self.store);
        let sorted = view::sort_for_display(store.get_all());
        filter.apply(&sorted).into_iter().cloned().collect()
    }

    pub fn stats(&self, today: NaiveDate) -> TaskStats {
        TaskStats::compute(store::lock(&self.store).get_all(), today)
    }

    pub fn selected(&self) -> Option<Task> {
        store::lock(&self.store).selected().cloned()
    }

    pub fn comments(&self) -> Vec<Comment> {
        store::lock(&self.store).comments().to_vec()
    }

    pub fn visible_notifications(&self) -> Vec<Notification> {
        guard(&self.notifications).visible().cloned().collect()
    }

    pub fn queued_notifications(&self) -> Vec<Notification> {
        guard(&self.notifications).queued().cloned().collect()
    }

    pub fn unread_task_ids(&self) -> HashSet<String> {
        guard(&self.notifications).unread_task_ids().clone()
    }

    pub fn notification_for_task(&self, task_id: &str) -> Option<Notification> {
        guard(&self.notifications)
            .notification_for_task(task_id)
            .cloned()
    }

    pub fn is_busy(&self, task_id: &str) -> bool {
        self.coordinator.is_busy(task_id)
    }

    pub fn is_loading(&self) -> bool {
        self.reconciler.is_loading()
    }

    pub fn is_refresh_pending(&self) -> bool {
        self.reconciler.is_refresh_pending()
    }

    // --- reconciliation ---

    /// User-initiated load with the blocking spinner.
    pub async fn load(&self) -> Result<usize, SyncError> {
        self.reconciler.load().await
    }

    pub async fn reconcile_in_background(&self) -> Result<usize, SyncError> {
        self.reconciler
            .reconcile(crate::refresh::RefreshMode::Background)
            .await
    }

    /// Process one change-feed message. Returns the alert it raised, if any.
    pub fn handle_feed_message(&self, message: &FeedMessage) -> Option<Notification> {
        let normalized = {
            let store = store::lock(&self.store);
            guard(&self.normalizer).normalize(message, &store)
        };

        let raised = normalized.notification.and_then(|n| {
            match guard(&self.notifications).push(n.clone()) {
                PushOutcome::Duplicate => None,
                PushOutcome::Shown | PushOutcome::Queued => Some(n),
            }
        });
        if let Some(n) = &raised {
            logging::info(&format!("Notification: {}", n.message));
            self.bus.publish(SyncEvent::NotificationAdded(n.clone()));
        }

        match normalized.refresh {
            RefreshTarget::Tasks => self.reconciler.schedule_tasks(),
            RefreshTarget::Comments { task_id } => {
                let open = store::lock(&self.store).selected_id().map(str::to_string);
                let concerns_open = match (&task_id, &open) {
                    (_, None) => false,
                    (None, Some(_)) => true,
                    (Some(id), Some(open)) => id == open,
                };
                if concerns_open {
                    self.reconciler.schedule_comments(task_id);
                }
            }
        }
        raised
    }

    /// Drain a feed until it ends. Returns how many messages were processed.
    pub async fn run_feed<F: ChangeFeed + ?Sized>(&self, feed: &mut F) -> usize {
        let mut processed = 0;
        while let Some(message) = feed.next_message().await {
            logging::debug(&format!(
                "Feed: {} {}",
                message.table(),
                message.kind().as_str()
            ));
            self.handle_feed_message(&message);
            processed += 1;
        }
        processed
    }

    // --- task writes ---

    /// Also leaves a note in the creator's inbox once the write lands.
    pub async fn set_status(&self, task_id: &str, status: Status) -> Result<MutationOutcome, SyncError> {
        let before = self.task(task_id);
        let outcome = self.edit_task(task_id, TaskPatch::status(status)).await?;
        if let (MutationOutcome::Applied, Some(task)) = (outcome, before) {
            self.notify_creator(&task, NewNotification::status_changed(&task, status));
        }
        Ok(outcome)
    }

    pub async fn set_urgent(&self, task_id: &str, urgent: bool) -> Result<MutationOutcome, SyncError> {
        let priority = if urgent {
            Priority::Urgent
        } else {
            Priority::Normal
        };
        self.edit_task(task_id, TaskPatch::priority(priority)).await
    }

    pub async fn edit_task(&self, task_id: &str, patch: TaskPatch) -> Result<MutationOutcome, SyncError> {
        self.coordinator.apply(&self.viewer, task_id, patch).await
    }

    /// Managers and admins create tasks. The new row shows up with the next
    /// reconcile.
    pub async fn create_task(&self, task: NewTask) -> Result<(), SyncError> {
        if !self.viewer.is_supervisor() {
            return Err(SyncError::Forbidden(
                "only managers and admins can create tasks".to_string(),
            ));
        }
        if task.title.trim().is_empty() {
            return Err(SyncError::InvalidInput("task title is required".to_string()));
        }

        let result = self.backend.create_task(&task).await;
        if let Err(e) = &result {
            self.bus.error(format!("Failed to create task: {}", e));
        }
        self.reconciler.schedule_tasks();
        result
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<MutationOutcome, SyncError> {
        guard(&self.normalizer).expect_own_delete(task_id);
        let result = self.coordinator.delete(&self.viewer, task_id).await;
        if !matches!(result, Ok(MutationOutcome::Applied)) {
            guard(&self.normalizer).forget_own_delete(task_id);
        }
        result
    }

    // --- detail view ---

    /// Select a task, mark its alerts read and load its comments.
    pub async fn open_task(&self, task_id: &str) -> Result<Option<Task>, SyncError> {
        let task = store::lock(&self.store).select(task_id).cloned();
        let Some(task) = task else {
            return Ok(None);
        };
        logging::set_task(Some(task_id));
        self.mark_task_read(task_id);
        self.bus.publish(SyncEvent::TaskChanged {
            task_id: task_id.to_string(),
        });
        self.reconciler.fetch_comments(task_id).await?;
        Ok(Some(task))
    }

    /// Open the task an alert points at and dismiss the alert.
    pub async fn open_from_notification(&self, notification_id: &str) -> Result<Option<Task>, SyncError> {
        let task_id = {
            let queue = guard(&self.notifications);
            queue
                .visible()
                .chain(queue.queued())
                .find(|n| n.id == notification_id)
                .map(|n| n.task_id.clone())
        };
        let Some(task_id) = task_id else {
            return Ok(None);
        };
        self.dismiss_notification(notification_id);
        self.open_task(&task_id).await
    }

    pub fn close_task(&self) {
        store::lock(&self.store).clear_selection();
        self.reconciler.cancel_comments();
        logging::set_task(None);
    }

    pub async fn add_comment(&self, content: &str) -> Result<(), SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::InvalidInput("comment is empty".to_string()));
        }
        let task = self
            .selected()
            .ok_or_else(|| SyncError::InvalidInput("no task is open".to_string()))?;
        if !self.viewer.can_see(&task) {
            return Err(SyncError::Forbidden(format!(
                "task {} is not visible to you",
                task.id
            )));
        }

        let comment = NewComment {
            task_id: task.id.clone(),
            user_id: self.viewer.user_id.clone(),
            content: content.to_string(),
        };
        if let Err(e) = self.backend.create_comment(&comment).await {
            self.bus.error(format!("Failed to add comment: {}", e));
            return Err(e);
        }
        self.notify_creator(&task, NewNotification::comment_added(&task));
        self.reconciler.fetch_comments(&task.id).await?;
        Ok(())
    }

    /// Returns false when the comment is not loaded (nothing to delete).
    pub async fn delete_comment(&self, comment_id: &str) -> Result<bool, SyncError> {
        let comment = store::lock(&self.store).comment(comment_id).cloned();
        let Some(comment) = comment else {
            return Ok(false);
        };
        permissions::check_delete_comment(&self.viewer, &comment)?;

        guard(&self.normalizer).expect_own_delete(comment_id);
        if let Err(e) = self.backend.delete_comment(comment_id).await {
            guard(&self.normalizer).forget_own_delete(comment_id);
            self.bus.error(format!("Failed to delete comment: {}", e));
            return Err(e);
        }
        self.reconciler.fetch_comments(&comment.task_id).await?;
        Ok(true)
    }

    /// Best effort: runs detached, and a failure is only logged.
    fn notify_creator(&self, task: &Task, notification: NewNotification) {
        if self.viewer.is(&task.created_by) {
            return;
        }
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.insert_notification(&notification).await {
                logging::warn(&format!(
                    "Inbox note for {} not delivered: {}",
                    notification.user_id, e
                ));
            }
        });
    }

    // --- notifications ---

    pub fn dismiss_notification(&self, notification_id: &str) -> bool {
        let dismissed = guard(&self.notifications).dismiss(notification_id);
        if dismissed {
            self.bus.publish(SyncEvent::NotificationsChanged);
        }
        dismissed
    }

    pub fn mark_task_read(&self, task_id: &str) -> usize {
        let marked = guard(&self.notifications).mark_task_read(task_id);
        if marked > 0 {
            self.bus.publish(SyncEvent::NotificationsChanged);
        }
        marked
    }

    pub fn mark_all_read(&self) {
        guard(&self.notifications).mark_all_read();
        self.bus.publish(SyncEvent::NotificationsChanged);
    }

    /// Session reset (sign-out): forget every alert, persisted ones included.
    pub fn reset_notifications(&self) {
        guard(&self.notifications).reset();
        self.bus.publish(SyncEvent::NotificationsChanged);
    }
}
