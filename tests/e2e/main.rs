//! End-to-end tests for taskdash using a mock data store
//!
//! These drive a full `SyncSession` (store, normalizer, queue, schedulers,
//! coordinator) without touching the network.

mod mock_store;

use anyhow::Result;
use mock_store::{MockDataStore, Write, at, profile, task};
use serde_json::json;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use taskdash::auth::StaticAuth;
use taskdash::bus::{Bus, SyncEvent};
use taskdash::coordinator::MutationOutcome;
use taskdash::model::{Comment, NewTask, Priority, Role, Status};
use taskdash::permissions::Viewer;
use taskdash::realtime::{FeedMessage, JsonLinesFeed};
use taskdash::storage::{FileSlot, KeyValueSlot, MemorySlot};
use taskdash::view::ListFilter;
use taskdash::{SessionOptions, SyncError, SyncSession};
use tokio::time::sleep;

fn session_with(store: &Arc<MockDataStore>, viewer: Viewer, slot: Box<dyn KeyValueSlot>) -> SyncSession {
    SyncSession::new(
        viewer,
        store.clone(),
        slot,
        SessionOptions::default(),
        Bus::default(),
    )
}

fn employee_session(store: &Arc<MockDataStore>) -> SyncSession {
    session_with(store, Viewer::new("emp-1", Role::Employee), Box::new(MemorySlot::new()))
}

fn feed(value: serde_json::Value) -> FeedMessage {
    serde_json::from_value(value).unwrap()
}

fn task_insert(id: &str, assignee: &str) -> FeedMessage {
    feed(json!({
        "table": "tasks",
        "eventType": "INSERT",
        "new": {
            "id": id,
            "title": format!("Task {}", id),
            "status": "todo",
            "priority": "normal",
            "assigned_to": assignee,
            "created_by": "mgr-1"
        }
    }))
}

/// Connecting retries until the sign-up trigger has created the profile
#[tokio::test(start_paused = true)]
async fn test_connect_waits_for_profile() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![]));
    store.queue_profile(None);
    store.queue_profile(None);
    store.queue_profile(Some(profile("emp-1", Role::Employee)));

    let auth = StaticAuth::signed_in("emp-1", "token");
    let session = SyncSession::connect(
        &auth,
        store.clone(),
        Box::new(MemorySlot::new()),
        SessionOptions::default(),
        Bus::default(),
    )
    .await?;

    assert_eq!(session.viewer().user_id, "emp-1");
    assert_eq!(session.viewer().role, Role::Employee);
    assert_eq!(session.viewer().name.as_deref(), Some("User emp-1"));
    Ok(())
}

#[tokio::test]
async fn test_connect_without_session_fails() {
    let store = Arc::new(MockDataStore::new(vec![]));
    let auth = StaticAuth::new(None);
    let result = SyncSession::connect(
        &auth,
        store,
        Box::new(MemorySlot::new()),
        SessionOptions::default(),
        Bus::default(),
    )
    .await;
    assert!(result.is_err());
}

/// Five alerts with room for three: three shown, two queued, redelivery ignored
#[tokio::test]
async fn test_notification_queue_bounds_and_dedup() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![]));
    let session = employee_session(&store);

    for id in ["n1", "n2", "n3", "n4", "n5"] {
        assert!(session.handle_feed_message(&task_insert(id, "emp-1")).is_some());
    }
    assert_eq!(session.visible_notifications().len(), 3);
    assert_eq!(session.queued_notifications().len(), 2);

    assert!(session.handle_feed_message(&task_insert("n1", "emp-1")).is_none());
    assert_eq!(
        session.visible_notifications().len() + session.queued_notifications().len(),
        5
    );

    let visible: Vec<String> = session
        .visible_notifications()
        .iter()
        .map(|n| n.task_id.clone())
        .collect();
    assert_eq!(visible, ["n3", "n2", "n1"]);
    assert!(session.visible_notifications()[0].message.contains("assigned to you"));

    let n2 = session.notification_for_task("n2").unwrap();
    assert!(session.dismiss_notification(&n2.id));
    let visible: Vec<String> = session
        .visible_notifications()
        .iter()
        .map(|n| n.task_id.clone())
        .collect();
    assert_eq!(visible, ["n4", "n3", "n1"]);
    assert_eq!(session.queued_notifications().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_foreign_assignments_are_ignored_for_employees() {
    let store = Arc::new(MockDataStore::new(vec![]));
    let session = employee_session(&store);
    assert!(session.handle_feed_message(&task_insert("x", "emp-2")).is_none());

    let manager = session_with(&store, Viewer::new("mgr-2", Role::Manager), Box::new(MemorySlot::new()));
    let n = manager.handle_feed_message(&task_insert("x", "emp-2")).unwrap();
    assert_eq!(n.message, "New task \"Task x\"");
}

/// A rejected write restores the snapshot exactly and clears the busy flag
#[tokio::test]
async fn test_failed_write_rolls_back() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::Todo, Priority::Normal, 0, "emp-1")]));
    let session = employee_session(&store);
    session.load().await?;
    session.open_task("t1").await?;
    let mut events = session.bus().subscribe();

    store.fail_next_write(SyncError::Rejected {
        context: "patchTask".to_string(),
        status: 400,
        body: "violates check constraint".to_string(),
    });
    let result = session.set_status("t1", Status::Done).await;
    assert!(matches!(result, Err(SyncError::Rejected { status: 400, .. })));

    assert_eq!(session.task("t1").unwrap().status, Status::Todo);
    assert_eq!(session.selected().unwrap().status, Status::Todo);
    assert!(!session.is_busy("t1"));
    assert_eq!(store.writes().len(), 1);

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        saw_error |= matches!(event, SyncEvent::Error { .. });
    }
    assert!(saw_error);
    Ok(())
}

#[tokio::test]
async fn test_successful_write_is_visible_immediately() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::Todo, Priority::Normal, 0, "emp-1")]));
    let session = employee_session(&store);
    session.load().await?;

    let outcome = session.set_urgent("t1", true).await?;
    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(session.task("t1").unwrap().priority, Priority::Urgent);
    match &store.writes()[0] {
        Write::PatchTask(id, patch) => {
            assert_eq!(id, "t1");
            assert_eq!(patch.priority, Some(Priority::Urgent));
            assert!(patch.status.is_none());
        }
        other => panic!("unexpected write {:?}", other),
    }
    Ok(())
}

/// Completing a task leaves a note in the creator's inbox
#[tokio::test]
async fn test_completion_notifies_task_creator() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::InProgress, Priority::Normal, 0, "emp-1")]));
    let session = employee_session(&store);
    session.load().await?;

    session.set_status("t1", Status::Done).await?;
    for _ in 0..10 {
        if !store.inbox().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }

    let inbox = store.inbox();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].user_id, "mgr-1");
    assert_eq!(inbox[0].title, "Task Completed");
    assert_eq!(inbox[0].message, "Task \"Task t1\" has been marked as complete");
    assert_eq!(store.writes().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_second_write_to_busy_task_is_refused() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::Todo, Priority::Normal, 0, "emp-1")]));
    let session = employee_session(&store);
    session.load().await?;
    let gate = store.gate_writes();

    let (first, second) = tokio::join!(session.set_status("t1", Status::Done), async {
        while !session.is_busy("t1") {
            tokio::task::yield_now().await;
        }
        let outcome = session.set_status("t1", Status::InProgress).await;
        gate.notify_one();
        outcome
    });

    assert_eq!(first?, MutationOutcome::Applied);
    assert_eq!(second?, MutationOutcome::Busy);
    assert_eq!(store.writes().len(), 1);
    assert_eq!(session.task("t1").unwrap().status, Status::Done);
    Ok(())
}

#[tokio::test]
async fn test_assignee_cannot_rename() {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::Todo, Priority::Normal, 0, "emp-1")]));
    let session = employee_session(&store);
    session.load().await.unwrap();

    let patch = taskdash::model::TaskPatch {
        title: Some("Mine now".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        session.edit_task("t1", patch).await,
        Err(SyncError::Forbidden(_))
    ));
    assert!(store.writes().is_empty());
}

/// The viewer's own edits echoing back through the feed stay silent
#[tokio::test]
async fn test_own_change_never_notifies() {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::Todo, Priority::Normal, 0, "emp-1")]));
    let session = employee_session(&store);
    session.load().await.unwrap();

    let echo = feed(json!({
        "table": "tasks",
        "eventType": "UPDATE",
        "new": {"id": "t1", "status": "done", "updated_by": "emp-1"}
    }));
    assert!(session.handle_feed_message(&echo).is_none());

    let comment = feed(json!({
        "table": "comments",
        "eventType": "INSERT",
        "new": {"id": "c1", "task_id": "t1", "user_id": "emp-1", "content": "done"}
    }));
    assert!(session.handle_feed_message(&comment).is_none());
    assert!(session.visible_notifications().is_empty());
}

/// Events at 0, 100 and 150ms with a 300ms debounce read once, at 450ms
#[tokio::test(start_paused = true)]
async fn test_feed_burst_coalesces_into_one_read() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::Todo, Priority::Normal, 0, "emp-1")]));
    let session = employee_session(&store);
    session.load().await?;
    assert_eq!(store.list_calls(), 1);

    let update = |status: &str| {
        feed(json!({
            "table": "tasks",
            "eventType": "UPDATE",
            "new": {"id": "t1", "status": status, "updated_by": "mgr-1"}
        }))
    };
    session.handle_feed_message(&update("in_progress"));
    sleep(Duration::from_millis(100)).await;
    session.handle_feed_message(&update("done"));
    sleep(Duration::from_millis(50)).await;
    session.handle_feed_message(&update("in_progress"));

    sleep(Duration::from_millis(299)).await;
    assert_eq!(store.list_calls(), 1);
    sleep(Duration::from_millis(2)).await;
    assert_eq!(store.list_calls(), 2);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(store.list_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_display_order() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![
        task("a", Status::Done, Priority::Urgent, 0, "emp-1"),
        task("b", Status::Todo, Priority::Normal, 1, "emp-1"),
        task("c", Status::Todo, Priority::Urgent, 2, "emp-1"),
        task("d", Status::Todo, Priority::Normal, 3, "emp-1"),
    ]));
    let session = employee_session(&store);
    session.load().await?;

    let ids: Vec<String> = session
        .sorted_tasks(&ListFilter::default())
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, ["c", "d", "b", "a"]);

    let todo_only = ListFilter {
        status: Some(Status::Todo),
        ..Default::default()
    };
    assert_eq!(session.sorted_tasks(&todo_only).len(), 3);

    let stats = session.stats(at(0).date_naive());
    assert_eq!(stats.total, 4);
    assert_eq!(stats.done, 1);
    assert_eq!(stats.urgent_active, 1);
    Ok(())
}

/// Reconciling never closes the open detail view
#[tokio::test]
async fn test_selection_survives_reconcile() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![
        task("t1", Status::Todo, Priority::Normal, 0, "emp-1"),
        task("t2", Status::Todo, Priority::Normal, 1, "emp-1"),
    ]));
    let session = employee_session(&store);
    session.load().await?;
    session.open_task("t1").await?;

    let mut renamed = task("t1", Status::InProgress, Priority::Normal, 0, "emp-1");
    renamed.title = "Renamed".to_string();
    store.queue_list(vec![renamed, task("t2", Status::Todo, Priority::Normal, 1, "emp-1")]);
    session.reconcile_in_background().await?;
    let selected = session.selected().unwrap();
    assert_eq!(selected.title, "Renamed");
    assert_eq!(selected.status, Status::InProgress);

    store.queue_list(vec![task("t2", Status::Todo, Priority::Normal, 1, "emp-1")]);
    session.reconcile_in_background().await?;
    assert_eq!(session.tasks().len(), 1);
    assert_eq!(session.selected().unwrap().title, "Renamed");
    Ok(())
}

/// A delete nobody can attribute still triggers a refresh
#[tokio::test(start_paused = true)]
async fn test_unknown_delete_still_refreshes() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![]));
    let session = employee_session(&store);
    session.load().await?;

    session.handle_feed_message(&feed(json!({
        "table": "tasks",
        "eventType": "DELETE",
        "old": {"id": "ghost"}
    })));
    assert!(session.is_refresh_pending());
    sleep(Duration::from_millis(301)).await;
    assert_eq!(store.list_calls(), 2);

    session.handle_feed_message(&feed(json!({
        "table": "tasks",
        "eventType": "DELETE",
        "old": {}
    })));
    sleep(Duration::from_millis(301)).await;
    assert_eq!(store.list_calls(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_releases_stalled_load() {
    let store = Arc::new(MockDataStore::new(vec![]));
    store.stall_reads(true);
    let session = employee_session(&store);

    let result = session.load().await;
    assert!(matches!(result, Err(SyncError::Timeout { .. })));
    assert!(!session.is_loading());
}

#[tokio::test]
async fn test_manager_delete_echo_is_silent() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![
        task("t1", Status::Todo, Priority::Normal, 0, "emp-1"),
        task("t2", Status::Todo, Priority::Normal, 1, "emp-1"),
    ]));
    let manager = session_with(&store, Viewer::new("mgr-1", Role::Manager), Box::new(MemorySlot::new()));
    manager.load().await?;

    assert_eq!(manager.delete_task("t1").await?, MutationOutcome::Applied);
    assert_eq!(store.writes(), vec![Write::DeleteTask("t1".to_string())]);

    let echo = feed(json!({"table": "tasks", "eventType": "DELETE", "old": {"id": "t1"}}));
    assert!(manager.handle_feed_message(&echo).is_none());

    let employee = employee_session(&store);
    employee.load().await?;
    assert!(matches!(
        employee.delete_task("t2").await,
        Err(SyncError::Forbidden(_))
    ));
    assert_eq!(store.writes().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_created_task_arrives_with_next_reconcile() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![]));
    let manager = session_with(&store, Viewer::new("mgr-1", Role::Manager), Box::new(MemorySlot::new()));

    let mut new_task = NewTask::new("  Quarterly report ", "emp-1", "mgr-1");
    new_task.priority = Priority::Urgent;
    manager.create_task(new_task).await?;
    match &store.writes()[0] {
        Write::CreateTask(t) => {
            assert_eq!(t.title, "Quarterly report");
            assert_eq!(t.status, Status::Todo);
        }
        other => panic!("unexpected write {:?}", other),
    }
    assert!(manager.is_refresh_pending());

    assert!(matches!(
        manager.create_task(NewTask::new("   ", "emp-1", "mgr-1")).await,
        Err(SyncError::InvalidInput(_))
    ));
    assert_eq!(store.writes().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_comment_flow() -> Result<()> {
    let store = Arc::new(MockDataStore::new(vec![task("t1", Status::Todo, Priority::Normal, 0, "emp-1")]));
    store.add_comment(Comment {
        id: "c0".to_string(),
        task_id: "t1".to_string(),
        user_id: "mgr-1".to_string(),
        user_name: Some("Manager One".to_string()),
        content: "Start with the intro".to_string(),
        created_at: at(10),
    });
    let session = employee_session(&store);
    session.load().await?;

    session.open_task("t1").await?;
    assert_eq!(session.comments().len(), 1);
    assert_eq!(session.comments()[0].author_label(), "Manager One");

    session.add_comment("  on it ").await?;
    assert_eq!(session.comments().len(), 2);
    assert!(store.writes().iter().any(|w| matches!(w, Write::CreateComment(c) if c.content == "on it")));

    store.add_comment(Comment {
        id: "c9".to_string(),
        task_id: "t1".to_string(),
        user_id: "mgr-1".to_string(),
        user_name: None,
        content: "thanks".to_string(),
        created_at: at(20),
    });
    let n = session
        .handle_feed_message(&feed(json!({
            "table": "comments",
            "eventType": "INSERT",
            "new": {"id": "c9", "task_id": "t1", "user_id": "mgr-1", "content": "thanks"}
        })))
        .unwrap();
    assert_eq!(n.message, "New comment on task \"Task t1\"");

    sleep(Duration::from_millis(301)).await;
    assert_eq!(session.comments().len(), 3);

    session.close_task();
    assert!(session.selected().is_none());
    assert!(session.comments().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_notifications_persist_across_sessions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("notifications.json");
    let store = Arc::new(MockDataStore::new(vec![]));
    let viewer = Viewer::new("emp-1", Role::Employee);

    let first = session_with(&store, viewer.clone(), Box::new(FileSlot::new(path.clone())));
    first.handle_feed_message(&task_insert("n1", "emp-1"));
    first.handle_feed_message(&task_insert("n2", "emp-1"));
    let ids: Vec<String> = first.visible_notifications().into_iter().map(|n| n.id).collect();
    drop(first);

    let second = session_with(&store, viewer.clone(), Box::new(FileSlot::new(path.clone())));
    let restored: Vec<String> = second.visible_notifications().into_iter().map(|n| n.id).collect();
    assert_eq!(restored, ids);
    assert!(second.unread_task_ids().contains("n1"));

    second.reset_notifications();
    drop(second);
    let third = session_with(&store, viewer, Box::new(FileSlot::new(path)));
    assert!(third.visible_notifications().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_replay_recorded_feed() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "{}", json!({"table": "tasks", "eventType": "INSERT", "new": {"id": "r1", "title": "Replayed", "assigned_to": "emp-1", "created_by": "mgr-1"}}))?;
    writeln!(file)?;
    writeln!(file, "not json")?;
    writeln!(file, "{}", json!({"table": "tasks", "eventType": "DELETE", "old": {"id": "r2"}}))?;
    file.flush()?;

    let store = Arc::new(MockDataStore::new(vec![]));
    let session = employee_session(&store);
    let mut feed = JsonLinesFeed::open(file.path()).await?;
    assert_eq!(session.run_feed(&mut feed).await, 2);

    let messages: Vec<String> = session
        .visible_notifications()
        .into_iter()
        .map(|n| n.message)
        .collect();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.contains("Replayed")));
    Ok(())
}
