//! Background task scheduler
//!
//! Drives recurring execution of a task's operation. Scheduling is
//! self-rescheduling, not fixed-rate: the next tick is armed one interval
//! after the previous tick *completes*, so a task never has two ticks in
//! flight and a slow operation stretches the observed period instead of
//! piling up. Each loop owns a watch-channel stop signal; stop clears the
//! pending timer but never interrupts a tick already running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::device::client::DeviceControl;
use crate::ops::error::OpError;
use crate::tasks::model::{Task, TaskKind, TaskStatus};
use crate::tasks::operation::{self, OPERATIONS};
use crate::tasks::store::{StoreError, TaskStore};

/// Error type for scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Op(#[from] OpError),
}

/// Parameters for starting a task.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub name: String,
    pub kind: TaskKind,
    pub operation: String,
    pub args: Value,
    /// Required for background tasks.
    pub interval_ms: Option<u64>,
    /// Background only; None means run until stopped.
    pub max_iterations: Option<u64>,
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    #[allow(dead_code)]
    join: JoinHandle<()>,
}

/// Executes tasks: foreground ones inline, background ones on their own
/// timer loop. Holds only transient handles; the [`TaskStore`] owns all
/// persistent state.
pub struct Scheduler {
    store: Arc<TaskStore>,
    device: Arc<dyn DeviceControl>,
    handles: Arc<Mutex<HashMap<String, LoopHandle>>>,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, device: Arc<dyn DeviceControl>) -> Self {
        Self {
            store,
            device,
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a task. Foreground tasks run their operation once before this
    /// returns; background tasks get a timer loop and return immediately
    /// with the running record.
    pub async fn start(&self, request: StartRequest) -> Result<Task, SchedulerError> {
        if !OPERATIONS.contains(&request.operation.as_str()) {
            return Err(OpError::Validation(format!(
                "Unknown operation '{}' (expected one of: {})",
                request.operation,
                OPERATIONS.join(", ")
            ))
            .into());
        }

        match request.kind {
            TaskKind::Foreground => self.start_foreground(request).await,
            TaskKind::Background => self.start_background(request),
        }
    }

    async fn start_foreground(&self, request: StartRequest) -> Result<Task, SchedulerError> {
        let mut task = self.store.create(
            &request.name,
            TaskKind::Foreground,
            &request.operation,
            request.args.clone(),
        )?;

        match operation::execute(&*self.device, &request.operation, &request.args).await {
            Ok(result) => {
                task.record_tick();
                task.finish(TaskStatus::Completed, None);
                self.store.write_result(&task, &result);
                self.store.update(&task);
                self.store.append_log(&task, "completed");
                Ok(task)
            }
            Err(e) => {
                self.store.append_log(&task, &format!("failed: {}", e));
                task.finish(TaskStatus::Error, Some(e.to_string()));
                self.store.update(&task);
                Err(e.into())
            }
        }
    }

    fn start_background(&self, request: StartRequest) -> Result<Task, SchedulerError> {
        let interval_ms = request.interval_ms.ok_or_else(|| {
            OpError::Validation("Background tasks require 'interval_ms'".into())
        })?;
        if interval_ms == 0 {
            return Err(OpError::Validation("'interval_ms' must be at least 1".into()).into());
        }
        if request.max_iterations == Some(0) {
            return Err(OpError::Validation("'max_iterations' must be at least 1".into()).into());
        }

        let mut task = self.store.create(
            &request.name,
            TaskKind::Background,
            &request.operation,
            request.args.clone(),
        )?;
        task.interval_ms = Some(interval_ms);
        task.max_iterations = request.max_iterations;
        self.store.update(&task);

        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.device),
            Arc::clone(&self.handles),
            task.id.clone(),
            request.operation,
            request.args,
            Duration::from_millis(interval_ms),
            stop_rx,
        ));
        self.handles
            .lock()
            .insert(task.id.clone(), LoopHandle { stop_tx, join });

        tracing::info!(task = %task.id, interval_ms, "Started background task");
        Ok(task)
    }

    /// Stop a task by id or name.
    ///
    /// Idempotent by design: stopping a task that does not exist or is
    /// already terminal reports success and changes nothing. An in-flight
    /// tick runs to completion before the loop exits.
    pub fn stop(&self, id_or_name: &str) -> Option<Task> {
        let mut task = self.store.find(id_or_name)?;
        if task.status.is_terminal() {
            return Some(task);
        }

        if let Some(handle) = self.handles.lock().remove(&task.id) {
            let _ = handle.stop_tx.send(true);
        }
        task.finish(TaskStatus::Stopped, None);
        self.store.update(&task);
        self.store.append_log(&task, "task stopped");
        tracing::info!(task = %task.id, "Stopped task");
        Some(task)
    }

    /// Signal every running loop to stop. Records are finished the same way
    /// an individual stop finishes them.
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.handles.lock().keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
    }

    /// Number of loops currently holding a timer.
    pub fn active_count(&self) -> usize {
        self.handles.lock().len()
    }
}

/// One background task's timer loop.
///
/// The store record is reloaded at the top of every iteration so an external
/// stop (which finishes the record) is observed without the loop and the
/// stop call racing on one clone.
#[allow(clippy::too_many_arguments)]
async fn run_loop(
    store: Arc<TaskStore>,
    device: Arc<dyn DeviceControl>,
    handles: Arc<Mutex<HashMap<String, LoopHandle>>>,
    task_id: String,
    op: String,
    args: Value,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => break,
        }

        let Some(mut task) = store.get(&task_id) else {
            break;
        };
        if task.status.is_terminal() {
            break;
        }

        let tick = operation::execute(&*device, &op, &args).await;

        // A stop that arrived mid-tick has already finished the record;
        // don't overwrite it.
        if *stop_rx.borrow() {
            break;
        }

        match tick {
            Ok(result) => {
                task.record_tick();
                store.write_result(&task, &result);
                store.append_log(&task, &format!("tick {} ok", task.iterations));
                if task.cap_reached() {
                    task.finish(TaskStatus::Completed, None);
                    store.update(&task);
                    store.append_log(&task, "completed");
                    break;
                }
                store.update(&task);
            }
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "Background tick failed");
                store.append_log(&task, &format!("tick failed: {}", e));
                task.finish(TaskStatus::Error, Some(e.to_string()));
                store.update(&task);
                break;
            }
        }
    }

    handles.lock().remove(&task_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use serde_json::json;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir) -> (Scheduler, Arc<TaskStore>, MockDevice) {
        let store = Arc::new(TaskStore::new(dir.path().to_path_buf()));
        let device = MockDevice::new();
        let scheduler = Scheduler::new(Arc::clone(&store), Arc::new(device.clone()));
        (scheduler, store, device)
    }

    fn background(name: &str, interval_ms: u64, max_iterations: Option<u64>) -> StartRequest {
        StartRequest {
            name: name.into(),
            kind: TaskKind::Background,
            operation: "read_memory".into(),
            args: json!({"address": "$0400", "length": 4}),
            interval_ms: Some(interval_ms),
            max_iterations,
        }
    }

    #[tokio::test]
    async fn capped_task_completes_with_exact_iterations() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store, _device) = fixture(&dir);

        let task = scheduler.start(background("cap", 20, Some(3))).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let task = store.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.iterations, 3);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn failing_tick_lands_in_error() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store, device) = fixture(&dir);
        device.fail_always("read_memory");

        let task = scheduler.start(background("doomed", 20, None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let task = store.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.last_error.as_deref().unwrap().contains("injected"));
        assert!(task.stopped_at.is_some());
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_for_missing_and_terminal_tasks() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store, _device) = fixture(&dir);

        // Missing task: success, nothing created.
        assert!(scheduler.stop("no_such_task").is_none());
        assert!(store.list().is_empty());

        let task = scheduler.start(background("watch", 1000, None)).await.unwrap();
        let stopped = scheduler.stop(&task.name).unwrap();
        assert_eq!(stopped.status, TaskStatus::Stopped);

        // Second stop on a terminal task: success, status unchanged.
        let again = scheduler.stop(&task.id).unwrap();
        assert_eq!(again.status, TaskStatus::Stopped);
        assert_eq!(again.stopped_at, stopped.stopped_at);
    }

    #[tokio::test]
    async fn duplicate_running_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store, _device) = fixture(&dir);

        scheduler.start(background("watch", 1000, None)).await.unwrap();
        let err = scheduler.start(background("watch", 1000, None)).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Store(StoreError::DuplicateName(_))
        ));
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn background_requires_interval() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store, _device) = fixture(&dir);

        let mut request = background("watch", 1, None);
        request.interval_ms = None;
        let err = scheduler.start(request).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Op(OpError::Validation(_))));
    }

    #[tokio::test]
    async fn foreground_runs_once_inline() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store, device) = fixture(&dir);
        device.set_memory(0x0400, &[0x01, 0x02, 0x03, 0x04]);

        let task = scheduler
            .start(StartRequest {
                name: "once".into(),
                kind: TaskKind::Foreground,
                operation: "read_memory".into(),
                args: json!({"address": "$0400", "length": 4}),
                interval_ms: None,
                max_iterations: None,
            })
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.iterations, 1);
        let result: Value = serde_json::from_str(
            &std::fs::read_to_string(store.task_dir(&task).join("result.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(result["data"], "01020304");
    }

    #[tokio::test]
    async fn failing_foreground_propagates_and_records() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store, device) = fixture(&dir);
        device.fail_always("read_memory");

        let err = scheduler
            .start(StartRequest {
                name: "once".into(),
                kind: TaskKind::Foreground,
                operation: "read_memory".into(),
                args: json!({"address": "$0400", "length": 4}),
                interval_ms: None,
                max_iterations: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Op(OpError::Device(_))));

        let task = store.find("once").unwrap();
        assert_eq!(task.status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn unknown_operation_creates_no_record() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store, _device) = fixture(&dir);

        let mut request = background("watch", 100, None);
        request.operation = "format_disk".into();
        assert!(scheduler.start(request).await.is_err());
        assert!(store.list().is_empty());
    }
}
