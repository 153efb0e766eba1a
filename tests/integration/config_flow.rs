//! Integration tests for the configuration backup flow
//!
//! Snapshot, drift, diff, restore, diff again: the full round trip against
//! one mock device.

use serde_json::json;
use tempfile::TempDir;
use ultimatectl::ops::{diff, restore, snapshot, ConfigSnapshot};

use super::common::fixtures::seeded_device;

#[tokio::test]
async fn drift_is_detected_and_restored() {
    let device = seeded_device();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("baseline.json");

    snapshot(&device, &path).await.unwrap();
    assert!(diff(&device, &path).await.unwrap().is_clean());

    // Drift both categories.
    device.set_config("Audio Settings", json!({"volume": 0}));
    device.set_config("Video Settings", json!({"scanlines": true}));

    let report = diff(&device, &path).await.unwrap();
    assert_eq!(report.changed.len(), 2);

    let applied = restore(&device, &path, false).await.unwrap();
    assert_eq!(applied, 2);
    assert!(diff(&device, &path).await.unwrap().is_clean());
}

#[tokio::test]
async fn snapshot_document_is_reloadable() {
    let device = seeded_device();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("baseline.json");

    let written = snapshot(&device, &path).await.unwrap();
    let loaded = ConfigSnapshot::load(&path).unwrap();

    assert_eq!(loaded.created_at, written.created_at);
    assert_eq!(loaded.categories.len(), 2);
    assert_eq!(loaded.categories["Audio Settings"]["volume"], 7);
    assert_eq!(loaded.version["version"], "mock-1.0");
}
