//! Task records and their status machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::time::now_stamp;

/// One-shot vs recurring execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Executes its operation exactly once, inline.
    Foreground,
    /// Re-executes its operation every `interval_ms` until stopped,
    /// completed, or errored.
    Background,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Foreground => "foreground",
            TaskKind::Background => "background",
        }
    }
}

/// Task lifecycle status.
///
/// Transitions: `Running → Running` (tick ok, below cap), `Running →
/// Completed` (tick ok, cap reached), `Running → Error` (tick failed),
/// `Running → Stopped` (explicit stop). The three non-running states are
/// terminal; nothing schedules a terminal task again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Stopped,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Error => "error",
        }
    }
}

/// A named, persisted unit of work.
///
/// Records are created on start, mutated once per tick or on stop, and never
/// physically deleted: terminal records stay in the registry so ordinals
/// are never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// `{ordinal:04}_{name}`, e.g. `0002_read`. Unique for the lifetime of
    /// the store, including across restarts.
    pub id: String,
    /// Caller-assigned logical name; unique among running tasks.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Symbolic per-tick action, resolved by the operation registry.
    pub operation: String,
    /// Operation-specific parameter bag.
    #[serde(default)]
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u64>,
    #[serde(default)]
    pub iterations: u64,
    pub status: TaskStatus,
    pub started_at: String,
    pub updated_at: String,
    pub stopped_at: Option<String>,
    pub last_error: Option<String>,
    /// Relative path of this task's persisted subtree.
    pub folder: String,
}

impl Task {
    /// Create a new running task. `folder` layout depends on the kind:
    /// background tasks live under `tasks/background/<id>`, foreground under
    /// `tasks/<id>`.
    pub fn new(id: String, name: String, kind: TaskKind, operation: String, args: Value) -> Self {
        let folder = match kind {
            TaskKind::Foreground => format!("tasks/{}", id),
            TaskKind::Background => format!("tasks/background/{}", id),
        };
        let now = now_stamp();
        Self {
            id,
            name,
            kind,
            operation,
            args,
            interval_ms: None,
            max_iterations: None,
            iterations: 0,
            status: TaskStatus::Running,
            started_at: now.clone(),
            updated_at: now,
            stopped_at: None,
            last_error: None,
            folder,
        }
    }

    /// Mark the record as moved into a terminal state right now.
    pub fn finish(&mut self, status: TaskStatus, error: Option<String>) {
        let now = now_stamp();
        self.status = status;
        self.updated_at = now.clone();
        self.stopped_at = Some(now);
        self.last_error = error;
    }

    /// Record one successful tick.
    pub fn record_tick(&mut self) {
        self.iterations += 1;
        self.updated_at = now_stamp();
    }

    /// Whether the iteration cap has been reached.
    pub fn cap_reached(&self) -> bool {
        self.max_iterations
            .map(|cap| self.iterations >= cap)
            .unwrap_or(false)
    }
}

/// Extract the 4-digit ordinal prefix from a task id, if present.
pub fn id_ordinal(id: &str) -> Option<u32> {
    let prefix = id.split('_').next()?;
    if prefix.len() != 4 {
        return None;
    }
    prefix.parse().ok()
}

/// Compose a task id from an ordinal and a logical name.
pub fn make_id(ordinal: u32, name: &str) -> String {
    format!("{:04}_{}", ordinal, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ordinal_parsing() {
        assert_eq!(id_ordinal("0002_read"), Some(2));
        assert_eq!(id_ordinal("0123_screen_watch"), Some(123));
        assert_eq!(id_ordinal("read"), None);
        assert_eq!(id_ordinal("12_read"), None);
    }

    #[test]
    fn id_composition_is_zero_padded() {
        assert_eq!(make_id(7, "read"), "0007_read");
        assert_eq!(make_id(1234, "read"), "1234_read");
    }

    #[test]
    fn folder_depends_on_kind() {
        let fg = Task::new(
            "0001_once".into(),
            "once".into(),
            TaskKind::Foreground,
            "read_memory".into(),
            json!({}),
        );
        assert_eq!(fg.folder, "tasks/0001_once");

        let bg = Task::new(
            "0002_watch".into(),
            "watch".into(),
            TaskKind::Background,
            "read_screen".into(),
            json!({}),
        );
        assert_eq!(bg.folder, "tasks/background/0002_watch");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Stopped.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }

    #[test]
    fn cap_detection() {
        let mut task = Task::new(
            "0001_t".into(),
            "t".into(),
            TaskKind::Background,
            "read_memory".into(),
            json!({}),
        );
        task.max_iterations = Some(2);
        assert!(!task.cap_reached());
        task.record_tick();
        assert!(!task.cap_reached());
        task.record_tick();
        assert!(task.cap_reached());
    }

    #[test]
    fn task_serializes_kind_as_type() {
        let task = Task::new(
            "0001_t".into(),
            "t".into(),
            TaskKind::Background,
            "read_memory".into(),
            json!({}),
        );
        let doc = serde_json::to_value(&task).unwrap();
        assert_eq!(doc["type"], "background");
        assert_eq!(doc["status"], "running");
    }
}
