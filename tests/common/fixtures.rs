//! Test fixtures: a mock device wired to a store and scheduler in a
//! temporary directory.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use ultimatectl::device::MockDevice;
use ultimatectl::tasks::{Scheduler, TaskStore};

pub struct TestRig {
    pub device: MockDevice,
    pub store: Arc<TaskStore>,
    pub scheduler: Scheduler,
    /// Keeps the data directory alive for the duration of the test.
    pub dir: TempDir,
}

/// A scheduler and store rooted in a fresh temporary directory, driving a
/// mock device whose screen shows "READY." in the top-left corner.
pub fn rig() -> TestRig {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let device = seeded_device();
    let store = Arc::new(TaskStore::new(dir.path().to_path_buf()));
    let scheduler = Scheduler::new(Arc::clone(&store), Arc::new(device.clone()));
    TestRig {
        device,
        store,
        scheduler,
        dir,
    }
}

/// A mock device with screen RAM and a couple of config categories seeded.
pub fn seeded_device() -> MockDevice {
    let device = MockDevice::new()
        .with_config("Audio Settings", json!({"volume": 7}))
        .with_config("Video Settings", json!({"scanlines": false}));

    // Fill the screen with spaces, then "READY." in screen codes.
    device.set_memory(0x0400, &[0x20; 1000]);
    device.set_memory(0x0400, &[18, 5, 1, 4, 25, 46]);
    device
}
