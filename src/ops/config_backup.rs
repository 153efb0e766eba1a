//! Whole-device configuration backup
//!
//! Snapshots every configuration category into one JSON document, compares
//! a snapshot against the live device, and restores a snapshot in a single
//! batch update. A category that cannot be read is recorded inline as an
//! error placeholder instead of failing the whole snapshot; partial
//! snapshots are still useful for diff and restore.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::device::client::DeviceControl;
use crate::ops::error::OpError;
use crate::util::time::now_stamp;

/// A complete configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub created_at: String,
    pub version: Value,
    pub info: Value,
    /// Category name → value, or `{"error": "..."}` when the read failed.
    pub categories: BTreeMap<String, Value>,
}

impl ConfigSnapshot {
    /// Load a snapshot document from disk.
    pub fn load(path: &Path) -> Result<Self, OpError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Categories that were captured successfully (no error placeholder).
    pub fn readable_categories(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.categories
            .iter()
            .filter(|(_, value)| !is_error_placeholder(value))
    }
}

/// One differing category in a diff report.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryDiff {
    pub category: String,
    pub snapshot: Value,
    pub current: Value,
}

/// Result of comparing a snapshot against the live device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffReport {
    /// Categories whose live value structurally differs from the snapshot.
    pub changed: Vec<CategoryDiff>,
    /// Categories that could not be compared: error placeholders in the
    /// snapshot, or live reads that failed during the diff.
    pub unreadable: Vec<String>,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty()
    }
}

fn is_error_placeholder(value: &Value) -> bool {
    value
        .as_object()
        .map(|map| map.len() == 1 && map.contains_key("error"))
        .unwrap_or(false)
}

/// Capture every configuration category plus device metadata, writing the
/// document to `path`.
pub async fn snapshot(device: &dyn DeviceControl, path: &Path) -> Result<ConfigSnapshot, OpError> {
    let version = device.version().await?;
    let info = device.info().await?;
    let names = device.configs_list().await?;

    let mut categories = BTreeMap::new();
    for name in names {
        // Per-category failures become inline placeholders; the snapshot
        // as a whole still succeeds.
        let value = match device.config_get(&name).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(category = %name, error = %e, "Category read failed, recording placeholder");
                json!({ "error": e.to_string() })
            }
        };
        categories.insert(name, value);
    }

    let snapshot = ConfigSnapshot {
        created_at: now_stamp(),
        version,
        info,
        categories,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
    tracing::info!(
        path = %path.display(),
        categories = snapshot.categories.len(),
        "Configuration snapshot written"
    );
    Ok(snapshot)
}

/// Apply a previously written snapshot in one batch update, optionally
/// persisting the result to the device's flash. Error placeholders are
/// skipped. Returns the number of categories applied.
pub async fn restore(
    device: &dyn DeviceControl,
    path: &Path,
    save_to_flash: bool,
) -> Result<usize, OpError> {
    let snapshot = ConfigSnapshot::load(path)?;

    let payload: Map<String, Value> = snapshot
        .readable_categories()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let applied = payload.len();
    if applied == 0 {
        return Err(OpError::Validation(format!(
            "Snapshot {} contains no readable categories",
            path.display()
        )));
    }

    device.config_batch_update(&Value::Object(payload)).await?;
    if save_to_flash {
        device.config_save_to_flash().await?;
    }
    tracing::info!(path = %path.display(), applied, "Configuration restored");
    Ok(applied)
}

/// Re-read every snapshotted category and report the ones whose live value
/// differs structurally. Equal values are excluded.
pub async fn diff(device: &dyn DeviceControl, path: &Path) -> Result<DiffReport, OpError> {
    let snapshot = ConfigSnapshot::load(path)?;

    let mut report = DiffReport::default();
    for (name, saved) in &snapshot.categories {
        if is_error_placeholder(saved) {
            report.unreadable.push(name.clone());
            continue;
        }
        match device.config_get(name).await {
            Ok(current) => {
                if &current != saved {
                    report.changed.push(CategoryDiff {
                        category: name.clone(),
                        snapshot: saved.clone(),
                        current,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(category = %name, error = %e, "Live category read failed during diff");
                report.unreadable.push(name.clone());
            }
        }
    }
    Ok(report)
}
