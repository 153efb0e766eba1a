//! File-backed task registry
//!
//! Single source of truth for all tasks: one global `tasks.json` registry
//! plus one subtree per task (descriptor, result, append-only log,
//! artifacts). The store owns its in-memory map behind its own mutex; it is
//! constructor-injected wherever tasks are needed, never a global.
//!
//! Persistence is deliberately best-effort: `persist()` rewrites the backing
//! files wholesale and logs failures at `warn` instead of surfacing them to
//! the tick that triggered them. Loss on crash is bounded to the last tick.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tasks::model::{id_ordinal, make_id, Task, TaskKind, TaskStatus};
use crate::util::time::now_stamp;

/// Error type for task store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("A task named '{0}' is already running")]
    DuplicateName(String),

    #[error("Task not found: {0}")]
    NotFound(String),
}

/// On-disk shape of the global registry file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    tasks: Vec<Task>,
}

struct StoreState {
    loaded: bool,
    /// Keyed by id; zero-padded ordinals keep BTreeMap iteration in
    /// creation order.
    tasks: BTreeMap<String, Task>,
}

/// Durable registry of task records.
pub struct TaskStore {
    root: PathBuf,
    state: Mutex<StoreState>,
}

impl TaskStore {
    /// Create a store rooted at `root`. Nothing is read until
    /// [`ensure_loaded`](Self::ensure_loaded).
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            state: Mutex::new(StoreState {
                loaded: false,
                tasks: BTreeMap::new(),
            }),
        }
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    /// Absolute path of a task's subtree.
    pub fn task_dir(&self, task: &Task) -> PathBuf {
        self.root.join(&task.folder)
    }

    /// Absolute path of a task's artifacts directory.
    pub fn artifacts_dir(&self, task: &Task) -> PathBuf {
        self.task_dir(task).join("artifacts")
    }

    /// One-time load of the registry file. Creates an empty registry when
    /// none exists. Subsequent calls within the process are no-ops.
    pub fn ensure_loaded(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.loaded {
            return Ok(());
        }

        fs::create_dir_all(&self.root)?;
        let path = self.registry_path();
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let registry: Registry = serde_json::from_str(&contents)?;
            state.tasks = registry
                .tasks
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect();
            tracing::debug!(count = state.tasks.len(), "Loaded task registry");
        } else {
            fs::write(&path, serde_json::to_string_pretty(&Registry::default())?)?;
        }
        state.loaded = true;
        Ok(())
    }

    /// Create a new running task.
    ///
    /// Rejects the request when a task with the same name is currently
    /// running. The id ordinal is one past the highest ordinal ever
    /// observed, terminal records included, so ids stay unique across
    /// restarts.
    pub fn create(
        &self,
        name: &str,
        kind: TaskKind,
        operation: &str,
        args: Value,
    ) -> Result<Task, StoreError> {
        self.ensure_loaded()?;
        let task = {
            let mut state = self.state.lock();
            let duplicate = state
                .tasks
                .values()
                .any(|t| t.name == name && t.status == TaskStatus::Running);
            if duplicate {
                return Err(StoreError::DuplicateName(name.to_string()));
            }

            let next = state
                .tasks
                .keys()
                .filter_map(|id| id_ordinal(id))
                .max()
                .unwrap_or(0)
                + 1;
            let task = Task::new(
                make_id(next, name),
                name.to_string(),
                kind,
                operation.to_string(),
                args,
            );
            state.tasks.insert(task.id.clone(), task.clone());
            task
        };

        fs::create_dir_all(self.artifacts_dir(&task))?;
        self.persist();
        self.append_log(&task, "task created");
        Ok(task)
    }

    /// Look up a task by exact id.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.state.lock().tasks.get(id).cloned()
    }

    /// Look up a task by id, or by name (the running one wins, then the
    /// most recent).
    pub fn find(&self, id_or_name: &str) -> Option<Task> {
        let state = self.state.lock();
        if let Some(task) = state.tasks.get(id_or_name) {
            return Some(task.clone());
        }
        let mut by_name: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.name == id_or_name)
            .collect();
        by_name.sort_by_key(|t| (t.status != TaskStatus::Running, std::cmp::Reverse(t.id.clone())));
        by_name.first().map(|t| (*t).clone())
    }

    /// All tasks in id order.
    pub fn list(&self) -> Vec<Task> {
        self.state.lock().tasks.values().cloned().collect()
    }

    /// Replace a task record and persist.
    pub fn update(&self, task: &Task) {
        self.state
            .lock()
            .tasks
            .insert(task.id.clone(), task.clone());
        self.persist();
    }

    /// Rewrite the registry file and every task descriptor wholesale.
    ///
    /// Best-effort: failures are logged and swallowed. Near-simultaneous
    /// ticks each trigger a full rewrite of identical-shape documents, so
    /// last writer wins.
    pub fn persist(&self) {
        let registry = Registry {
            tasks: self.state.lock().tasks.values().cloned().collect(),
        };

        match serde_json::to_string_pretty(&registry) {
            Ok(contents) => {
                if let Err(e) = fs::write(self.registry_path(), contents) {
                    tracing::warn!(error = %e, "Failed to persist task registry");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize task registry"),
        }

        for task in &registry.tasks {
            let dir = self.task_dir(task);
            if let Err(e) = fs::create_dir_all(&dir) {
                tracing::warn!(task = %task.id, error = %e, "Failed to create task dir");
                continue;
            }
            match serde_json::to_string_pretty(task) {
                Ok(contents) => {
                    if let Err(e) = fs::write(dir.join("task.json"), contents) {
                        tracing::warn!(task = %task.id, error = %e, "Failed to persist task descriptor");
                    }
                }
                Err(e) => {
                    tracing::warn!(task = %task.id, error = %e, "Failed to serialize task descriptor")
                }
            }
        }
    }

    /// Append one timestamped line to the task's log file. Best-effort.
    pub fn append_log(&self, task: &Task, message: &str) {
        use std::io::Write;

        let dir = self.task_dir(task);
        let open = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("log.txt"));
        match open {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{} {}", now_stamp(), message) {
                    tracing::warn!(task = %task.id, error = %e, "Failed to append task log");
                }
            }
            Err(e) => tracing::warn!(task = %task.id, error = %e, "Failed to open task log"),
        }
    }

    /// Write the task's latest result document. Best-effort.
    pub fn write_result(&self, task: &Task, result: &Value) {
        let dir = self.task_dir(task);
        match serde_json::to_string_pretty(result) {
            Ok(contents) => {
                if let Err(e) = fs::write(dir.join("result.json"), contents) {
                    tracing::warn!(task = %task.id, error = %e, "Failed to write task result");
                }
            }
            Err(e) => tracing::warn!(task = %task.id, error = %e, "Failed to serialize task result"),
        }
    }
}
