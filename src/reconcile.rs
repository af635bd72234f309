//! Authoritative re-reads of the viewer's tasks and the open task's comments.

use crate::backend::{DataStore, TaskFilter};
use crate::bus::{Bus, SyncEvent};
use crate::error::SyncError;
use crate::logging;
use crate::refresh::{LoadingGate, RefreshMode, RefreshScheduler};
use crate::store::{self, SharedStore};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Reconciler {
    store: SharedStore,
    backend: Arc<dyn DataStore>,
    bus: Bus,
    filter: TaskFilter,
    tasks: RefreshScheduler,
    comments: RefreshScheduler,
    gate: LoadingGate,
    watchdog: Duration,
}

impl Reconciler {
    pub fn new(
        store: SharedStore,
        backend: Arc<dyn DataStore>,
        bus: Bus,
        filter: TaskFilter,
        debounce: Duration,
        watchdog: Duration,
    ) -> Self {
        Self {
            gate: LoadingGate::new(watchdog, bus.clone()),
            store,
            backend,
            bus,
            filter,
            tasks: RefreshScheduler::new(debounce),
            comments: RefreshScheduler::new(debounce),
            watchdog,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.gate.is_loading()
    }

    pub fn gate(&self) -> &LoadingGate {
        &self.gate
    }

    pub fn is_refresh_pending(&self) -> bool {
        self.tasks.is_pending()
    }

    /// One read of the visible set, installed into the store.
    pub async fn fetch_tasks(&self) -> Result<usize, SyncError> {
        let tasks = self.backend.list_tasks(&self.filter).await?;
        let count = tasks.len();
        store::lock(&self.store).replace_all(tasks);
        self.bus.publish(SyncEvent::TasksReplaced { count });
        logging::debug(&format!("Reconciled {} tasks", count));
        Ok(count)
    }

    pub async fn reconcile(&self, mode: RefreshMode) -> Result<usize, SyncError> {
        match self.gate.run(mode, "fetchTasks", self.fetch_tasks()).await {
            Some(result) => result,
            None => Err(SyncError::Timeout {
                context: "fetchTasks".to_string(),
                after: self.watchdog,
            }),
        }
    }

    /// User-initiated load behind the spinner. Failures are shown.
    pub async fn load(&self) -> Result<usize, SyncError> {
        let result = self.reconcile(RefreshMode::Foreground).await;
        if let Err(e) = &result {
            logging::error(&format!("Loading tasks failed: {}", e));
            self.bus.error(format!("Could not load tasks: {}", e));
        }
        result
    }

    /// Debounced background reconcile. Failures are logged only; the next
    /// event or write schedules another attempt.
    pub fn schedule_tasks(&self) {
        let this = self.clone();
        self.tasks.schedule(move || async move {
            if let Err(e) = this.reconcile(RefreshMode::Background).await {
                logging::warn(&format!("Background refresh failed: {}", e));
            }
        });
    }

    pub async fn fetch_comments(&self, task_id: &str) -> Result<usize, SyncError> {
        let comments = self.backend.list_comments(task_id).await?;
        let count = comments.len();
        let installed = store::lock(&self.store).set_comments(task_id, comments);
        if installed {
            self.bus.publish(SyncEvent::CommentsLoaded {
                task_id: task_id.to_string(),
                count,
            });
        } else {
            logging::debug(&format!("Dropping comments for {}; no longer open", task_id));
        }
        Ok(count)
    }

    /// Debounced re-read of the open task's comments. `task_id` narrows it
    /// to one task; nothing happens if a different task is open by then.
    pub fn schedule_comments(&self, task_id: Option<String>) {
        let this = self.clone();
        self.comments.schedule(move || async move {
            let open = store::lock(&this.store).selected_id().map(str::to_string);
            let Some(open) = open else {
                return;
            };
            if task_id.as_deref().is_some_and(|id| id != open) {
                return;
            }
            if let Err(e) = this.fetch_comments(&open).await {
                logging::warn(&format!("Comment refresh failed: {}", e));
            }
        });
    }

    pub fn cancel_comments(&self) {
        self.comments.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeStore;
    use crate::model::fixtures::task;
    use crate::model::{Priority, Status};
    use crate::store::{EntityStore, shared};
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    fn reconciler(backend: Arc<FakeStore>) -> (Reconciler, SharedStore) {
        let store = shared(EntityStore::new());
        let reconciler = Reconciler::new(
            store.clone(),
            backend,
            Bus::default(),
            TaskFilter::all(),
            Duration::from_millis(300),
            Duration::from_secs(15),
        );
        (reconciler, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_events_reads_once() {
        let backend = Arc::new(FakeStore::with_tasks(vec![task("t1", Status::Todo, Priority::Normal, 0)]));
        let (reconciler, store) = reconciler(backend.clone());

        for _ in 0..5 {
            reconciler.schedule_tasks();
            sleep(Duration::from_millis(50)).await;
        }
        sleep(Duration::from_millis(400)).await;

        assert_eq!(backend.count("list_tasks"), 1);
        assert_eq!(store::lock(&store).len(), 1);
    }

    #[tokio::test]
    async fn test_background_failure_is_not_surfaced() {
        let backend = Arc::new(FakeStore::default());
        backend.fail_reads.store(true, Ordering::SeqCst);
        let (reconciler, _) = reconciler(backend);
        let mut rx = reconciler.bus.subscribe();

        assert!(reconciler.reconcile(RefreshMode::Background).await.is_err());
        assert!(rx.try_recv().is_err());

        assert!(reconciler.load().await.is_err());
        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            saw_error |= matches!(event, SyncEvent::Error { .. });
        }
        assert!(saw_error);
        assert!(!reconciler.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_comment_refresh_targets_open_task_only() {
        let backend = Arc::new(FakeStore::with_tasks(vec![
            task("t1", Status::Todo, Priority::Normal, 0),
            task("t2", Status::Todo, Priority::Normal, 1),
        ]));
        let (reconciler, store) = reconciler(backend.clone());
        reconciler.fetch_tasks().await.unwrap();
        store::lock(&store).select("t1");

        reconciler.schedule_comments(Some("t2".to_string()));
        sleep(Duration::from_millis(400)).await;
        assert_eq!(backend.count("list_comments"), 0);

        reconciler.schedule_comments(None);
        sleep(Duration::from_millis(400)).await;
        assert_eq!(backend.count("list_comments:t1"), 1);
    }
}
