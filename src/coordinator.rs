//! Optimistic task writes: apply locally, write remotely, roll back on
//! failure, and always reconcile afterwards.

use crate::backend::DataStore;
use crate::bus::{Bus, SyncEvent};
use crate::error::SyncError;
use crate::logging;
use crate::model::{Priority, Status, Task, TaskPatch};
use crate::permissions::{self, Viewer};
use crate::reconcile::Reconciler;
use crate::store::{self, SharedStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// One in-flight write: what was applied, and what to restore on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationIntent {
    pub task_id: String,
    pub patch: TaskPatch,
    pub snapshot: Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Written remotely; the local value stands until the next reconcile
    Applied,
    /// The task is not cached (already gone) or the patch was empty
    Skipped,
    /// Another write to the same task is still in flight
    Busy,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    store: SharedStore,
    backend: Arc<dyn DataStore>,
    bus: Bus,
    reconciler: Reconciler,
    in_flight: Arc<Mutex<HashSet<String>>>,
    clear_urgent_on_done: bool,
}

impl MutationCoordinator {
    pub fn new(
        store: SharedStore,
        backend: Arc<dyn DataStore>,
        bus: Bus,
        reconciler: Reconciler,
        clear_urgent_on_done: bool,
    ) -> Self {
        Self {
            store,
            backend,
            bus,
            reconciler,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            clear_urgent_on_done,
        }
    }

    pub fn is_busy(&self, task_id: &str) -> bool {
        self.busy().contains(task_id)
    }

    pub fn busy_ids(&self) -> Vec<String> {
        self.busy().iter().cloned().collect()
    }

    fn busy(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_busy(&self, task_id: &str, busy: bool) -> bool {
        let changed = if busy {
            self.busy().insert(task_id.to_string())
        } else {
            self.busy().remove(task_id)
        };
        if changed {
            self.bus.publish(SyncEvent::BusyChanged {
                task_id: task_id.to_string(),
                busy,
            });
        }
        changed
    }

    /// Completing an urgent task may also drop its urgency, when configured.
    fn with_policy(&self, task: &Task, mut patch: TaskPatch) -> TaskPatch {
        if self.clear_urgent_on_done
            && patch.status == Some(Status::Done)
            && patch.priority.is_none()
            && task.priority.is_urgent()
        {
            patch.priority = Some(Priority::Normal);
        }
        patch
    }

    /// Check, snapshot, apply and mark busy, all under the store lock.
    fn begin(&self, viewer: &Viewer, task_id: &str, patch: TaskPatch) -> Result<Result<MutationIntent, MutationOutcome>, SyncError> {
        let mut store = store::lock(&self.store);
        let Some(task) = store.get(task_id) else {
            logging::debug(&format!("Skipping write to missing task {}", task_id));
            return Ok(Err(MutationOutcome::Skipped));
        };
        let patch = self.with_policy(task, patch);
        if patch.is_empty() {
            return Ok(Err(MutationOutcome::Skipped));
        }
        permissions::check_patch(viewer, task, &patch)?;
        if self.is_busy(task_id) {
            return Ok(Err(MutationOutcome::Busy));
        }

        let Some(snapshot) = store.apply_optimistic(task_id, &patch) else {
            return Ok(Err(MutationOutcome::Skipped));
        };
        self.busy().insert(task_id.to_string());
        drop(store);

        self.bus.publish(SyncEvent::BusyChanged {
            task_id: task_id.to_string(),
            busy: true,
        });
        self.bus.publish(SyncEvent::TaskChanged {
            task_id: task_id.to_string(),
        });
        Ok(Ok(MutationIntent {
            task_id: task_id.to_string(),
            patch,
            snapshot,
        }))
    }

    pub async fn apply(&self, viewer: &Viewer, task_id: &str, patch: TaskPatch) -> Result<MutationOutcome, SyncError> {
        let intent = match self.begin(viewer, task_id, patch)? {
            Ok(intent) => intent,
            Err(outcome) => return Ok(outcome),
        };

        let result = self.backend.patch_task(&intent.task_id, &intent.patch).await;
        if let Err(e) = &result {
            logging::warn(&format!("Write to {} failed, rolling back: {}", intent.task_id, e));
            store::lock(&self.store).rollback(&intent.task_id, intent.snapshot.clone());
            self.bus.publish(SyncEvent::TaskChanged {
                task_id: intent.task_id.clone(),
            });
            self.bus.error(format!("Failed to update task: {}", e));
        }

        self.set_busy(&intent.task_id, false);
        self.reconciler.schedule_tasks();
        result.map(|()| MutationOutcome::Applied)
    }

    /// Deletion is not optimistic: the row disappears on the next reconcile.
    pub async fn delete(&self, viewer: &Viewer, task_id: &str) -> Result<MutationOutcome, SyncError> {
        {
            let store = store::lock(&self.store);
            let Some(task) = store.get(task_id) else {
                return Ok(MutationOutcome::Skipped);
            };
            permissions::check_delete_task(viewer, task)?;
        }
        if !self.set_busy(task_id, true) {
            return Ok(MutationOutcome::Busy);
        }

        let result = self.backend.delete_task(task_id).await;
        if let Err(e) = &result {
            logging::warn(&format!("Deleting {} failed: {}", task_id, e));
            self.bus.error(format!("Failed to delete task: {}", e));
        }

        self.set_busy(task_id, false);
        self.reconciler.schedule_tasks();
        result.map(|()| MutationOutcome::Applied)
    }
}
