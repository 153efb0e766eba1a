//! Device control-plane abstraction.
//!
//! `DeviceControl` is the seam between the orchestration engines and the
//! physical machine. Production code talks to an Ultimate64-class device
//! through [`RestDevice`](crate::device::RestDevice); tests substitute
//! [`MockDevice`](crate::device::MockDevice).

use async_trait::async_trait;
use serde_json::Value;

use crate::device::error::DeviceError;

/// Highest addressable byte of the 6502 address space.
pub const MAX_ADDRESS: u32 = 0xFFFF;

/// Async interface to the device's control plane.
///
/// Every call may fail with a transport- or device-reported error. None of
/// these primitives is safe to compose naively around live machine state;
/// the engines in [`crate::ops`] exist to sequence them correctly.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Freeze the machine. Always pair with [`resume`](Self::resume).
    async fn pause(&self) -> Result<(), DeviceError>;

    /// Unfreeze the machine.
    async fn resume(&self) -> Result<(), DeviceError>;

    /// Read `length` bytes starting at `address`.
    async fn read_memory(&self, address: u16, length: usize) -> Result<Vec<u8>, DeviceError>;

    /// Write `bytes` starting at `address`.
    async fn write_memory(&self, address: u16, bytes: &[u8]) -> Result<(), DeviceError>;

    /// List configuration category names.
    async fn configs_list(&self) -> Result<Vec<String>, DeviceError>;

    /// Read one configuration category.
    async fn config_get(&self, category: &str) -> Result<Value, DeviceError>;

    /// Apply many configuration values in a single request.
    async fn config_batch_update(&self, payload: &Value) -> Result<(), DeviceError>;

    /// Persist the current configuration to non-volatile storage.
    async fn config_save_to_flash(&self) -> Result<(), DeviceError>;

    /// Enumerate files on the device matching `pattern`.
    async fn files_info(&self, pattern: &str) -> Result<Vec<String>, DeviceError>;

    /// Firmware/FPGA version document.
    async fn version(&self) -> Result<Value, DeviceError>;

    /// General device info document.
    async fn info(&self) -> Result<Value, DeviceError>;

    /// Reset the machine.
    async fn reset(&self) -> Result<(), DeviceError>;
}
