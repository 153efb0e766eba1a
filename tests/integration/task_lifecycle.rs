//! Integration tests for the task lifecycle
//!
//! Exercises the scheduler and store together: records, on-disk layout,
//! and continuity across a simulated restart.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use ultimatectl::tasks::{Scheduler, StartRequest, TaskKind, TaskStatus, TaskStore};

use super::common::fixtures::rig;

fn screen_watch(name: &str, interval_ms: u64, cap: Option<u64>) -> StartRequest {
    StartRequest {
        name: name.into(),
        kind: TaskKind::Background,
        operation: "read_screen".into(),
        args: json!({}),
        interval_ms: Some(interval_ms),
        max_iterations: cap,
    }
}

#[tokio::test]
async fn background_task_leaves_a_complete_subtree() {
    let rig = rig();

    let task = rig
        .scheduler
        .start(screen_watch("watch", 20, Some(2)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let task = rig.store.get(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.iterations, 2);

    // Background tasks live under tasks/background/<id>/.
    let task_dir = rig.store.task_dir(&task);
    assert!(task_dir.ends_with(format!("tasks/background/{}", task.id)));
    assert!(task_dir.join("task.json").exists());
    assert!(task_dir.join("artifacts").is_dir());

    let result: Value =
        serde_json::from_str(&std::fs::read_to_string(task_dir.join("result.json")).unwrap())
            .unwrap();
    assert!(result["lines"][0].as_str().unwrap().starts_with("READY."));

    let log = std::fs::read_to_string(task_dir.join("log.txt")).unwrap();
    assert!(log.contains("task created"));
    assert!(log.contains("tick 1 ok"));
    assert!(log.contains("completed"));

    // The registry file carries the same record.
    let registry: Value = serde_json::from_str(
        &std::fs::read_to_string(rig.dir.path().join("tasks.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(registry["tasks"][0]["id"], task.id.as_str());
    assert_eq!(registry["tasks"][0]["status"], "completed");
}

#[tokio::test]
async fn stop_finishes_the_record_and_frees_the_name() {
    let rig = rig();

    let task = rig
        .scheduler
        .start(screen_watch("watch", 1000, None))
        .await
        .unwrap();
    let stopped = rig.scheduler.stop("watch").unwrap();
    assert_eq!(stopped.id, task.id);
    assert_eq!(stopped.status, TaskStatus::Stopped);

    // The name is reusable once the old task is terminal.
    let again = rig
        .scheduler
        .start(screen_watch("watch", 1000, None))
        .await
        .unwrap();
    assert_ne!(again.id, task.id);
    rig.scheduler.stop_all();
}

#[tokio::test]
async fn restart_continues_ordinals_and_can_stop_stale_records() {
    let rig = rig();

    rig.scheduler
        .start(screen_watch("watch", 60_000, None))
        .await
        .unwrap();

    // Simulate a process restart: fresh store and scheduler over the same
    // directory, with no live loop handles.
    let store = Arc::new(TaskStore::new(rig.dir.path().to_path_buf()));
    store.ensure_loaded().unwrap();
    let scheduler = Scheduler::new(Arc::clone(&store), Arc::new(rig.device.clone()));

    let stale = store.find("watch").unwrap();
    assert_eq!(stale.status, TaskStatus::Running);

    // Stopping a record with no live loop still finishes it.
    let stopped = scheduler.stop("watch").unwrap();
    assert_eq!(stopped.status, TaskStatus::Stopped);

    // Ordinals keep counting from the highest ever observed.
    let next = scheduler
        .start(screen_watch("watch", 60_000, None))
        .await
        .unwrap();
    assert_eq!(next.id, "0002_watch");
    scheduler.stop_all();
    rig.scheduler.stop_all();
}

#[tokio::test]
async fn failing_device_lands_the_task_in_error_without_breaking_others() {
    let rig = rig();

    let healthy = rig
        .scheduler
        .start(screen_watch("healthy", 20, Some(3)))
        .await
        .unwrap();

    rig.device.fail_always("version");
    let doomed = rig
        .scheduler
        .start(StartRequest {
            name: "doomed".into(),
            kind: TaskKind::Background,
            operation: "device_info".into(),
            args: json!({}),
            interval_ms: Some(20),
            max_iterations: None,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    let doomed = rig.store.get(&doomed.id).unwrap();
    assert_eq!(doomed.status, TaskStatus::Error);
    assert!(doomed.last_error.is_some());

    let healthy = rig.store.get(&healthy.id).unwrap();
    assert_eq!(healthy.status, TaskStatus::Completed);
    assert_eq!(healthy.iterations, 3);
}
