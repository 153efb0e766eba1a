//! Mock device for deterministic testing
//!
//! Implements [`DeviceControl`] against an in-memory 64 KB address space
//! instead of real hardware. All calls are captured in order for later
//! verification, and individual endpoints can be scripted to fail, which is
//! how the retry and always-resume paths are exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::device::client::DeviceControl;
use crate::device::error::DeviceError;

/// One captured control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Pause,
    Resume,
    ReadMemory { address: u16, length: usize },
    WriteMemory { address: u16, length: usize },
    ConfigsList,
    ConfigGet(String),
    ConfigBatchUpdate,
    ConfigSaveToFlash,
    FilesInfo(String),
    Version,
    Info,
    Reset,
}

#[derive(Default)]
struct MockState {
    memory: Vec<u8>,
    calls: Vec<DeviceCall>,
    /// endpoint name -> remaining failures before the endpoint recovers.
    /// `usize::MAX` means fail forever.
    failures: HashMap<String, usize>,
    configs: BTreeMap<String, Value>,
    /// When set, write_memory succeeds but leaves memory untouched
    /// (simulates ROM/unmapped regions for read-back verification tests).
    writes_ignored: bool,
}

/// Mock implementation of [`DeviceControl`] for tests.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a mock with a zero-filled 64 KB address space.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                memory: vec![0u8; 0x10000],
                ..Default::default()
            })),
        }
    }

    /// Preload bytes at an address.
    pub fn set_memory(&self, address: u16, bytes: &[u8]) {
        let mut state = self.state.lock();
        let start = address as usize;
        state.memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Read back bytes directly (bypassing the DeviceControl interface).
    pub fn memory(&self, address: u16, length: usize) -> Vec<u8> {
        let state = self.state.lock();
        let start = address as usize;
        state.memory[start..start + length].to_vec()
    }

    /// Register a configuration category with its current value.
    pub fn with_config(self, category: &str, value: Value) -> Self {
        self.state
            .lock()
            .configs
            .insert(category.to_string(), value);
        self
    }

    /// Overwrite a configuration category after construction.
    pub fn set_config(&self, category: &str, value: Value) {
        self.state
            .lock()
            .configs
            .insert(category.to_string(), value);
    }

    /// Script the next `times` calls to `endpoint` to fail.
    /// Endpoint names match the trait method names ("read_memory", "pause", ...).
    pub fn fail_next(&self, endpoint: &str, times: usize) {
        self.state
            .lock()
            .failures
            .insert(endpoint.to_string(), times);
    }

    /// Script `endpoint` to fail on every call.
    pub fn fail_always(&self, endpoint: &str) {
        self.fail_next(endpoint, usize::MAX);
    }

    /// Make write_memory a silent no-op (read-back verification will see
    /// the old bytes).
    pub fn ignore_writes(&self, ignored: bool) {
        self.state.lock().writes_ignored = ignored;
    }

    /// All captured calls in invocation order.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Number of pause calls issued so far.
    pub fn pause_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::Pause))
    }

    /// Number of resume calls issued so far.
    pub fn resume_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::Resume))
    }

    /// Number of write_memory calls issued so far.
    pub fn write_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::WriteMemory { .. }))
    }

    /// Number of read_memory calls issued so far.
    pub fn read_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::ReadMemory { .. }))
    }

    fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Record the call, then consume one scripted failure if present.
    fn enter(&self, endpoint: &str, call: DeviceCall) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.failures.get_mut(endpoint) {
            Some(0) | None => Ok(()),
            Some(remaining) => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                Err(DeviceError::Other(format!(
                    "injected failure on {}",
                    endpoint
                )))
            }
        }
    }
}

#[async_trait]
impl DeviceControl for MockDevice {
    async fn pause(&self) -> Result<(), DeviceError> {
        self.enter("pause", DeviceCall::Pause)
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.enter("resume", DeviceCall::Resume)
    }

    async fn read_memory(&self, address: u16, length: usize) -> Result<Vec<u8>, DeviceError> {
        self.enter("read_memory", DeviceCall::ReadMemory { address, length })?;
        let state = self.state.lock();
        let start = address as usize;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= state.memory.len())
            .ok_or_else(|| DeviceError::Other("read beyond address space".into()))?;
        Ok(state.memory[start..end].to_vec())
    }

    async fn write_memory(&self, address: u16, bytes: &[u8]) -> Result<(), DeviceError> {
        self.enter(
            "write_memory",
            DeviceCall::WriteMemory {
                address,
                length: bytes.len(),
            },
        )?;
        let mut state = self.state.lock();
        if state.writes_ignored {
            return Ok(());
        }
        let start = address as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|end| *end <= state.memory.len())
            .ok_or_else(|| DeviceError::Other("write beyond address space".into()))?;
        state.memory[start..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn configs_list(&self) -> Result<Vec<String>, DeviceError> {
        self.enter("configs_list", DeviceCall::ConfigsList)?;
        Ok(self.state.lock().configs.keys().cloned().collect())
    }

    async fn config_get(&self, category: &str) -> Result<Value, DeviceError> {
        self.enter("config_get", DeviceCall::ConfigGet(category.to_string()))?;
        self.state
            .lock()
            .configs
            .get(category)
            .cloned()
            .ok_or_else(|| DeviceError::Other(format!("unknown category: {}", category)))
    }

    async fn config_batch_update(&self, payload: &Value) -> Result<(), DeviceError> {
        self.enter("config_batch_update", DeviceCall::ConfigBatchUpdate)?;
        let mut state = self.state.lock();
        if let Some(map) = payload.as_object() {
            for (category, value) in map {
                state.configs.insert(category.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn config_save_to_flash(&self) -> Result<(), DeviceError> {
        self.enter("config_save_to_flash", DeviceCall::ConfigSaveToFlash)
    }

    async fn files_info(&self, pattern: &str) -> Result<Vec<String>, DeviceError> {
        self.enter("files_info", DeviceCall::FilesInfo(pattern.to_string()))?;
        Ok(Vec::new())
    }

    async fn version(&self) -> Result<Value, DeviceError> {
        self.enter("version", DeviceCall::Version)?;
        Ok(json!({ "version": "mock-1.0" }))
    }

    async fn info(&self) -> Result<Value, DeviceError> {
        self.enter("info", DeviceCall::Info)?;
        Ok(json!({ "product": "MockDevice", "hostname": "mock" }))
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        self.enter("reset", DeviceCall::Reset)
    }
}
