//! Exclusive pause/resume sessions.
//!
//! Nothing in the device firmware stops two callers from pausing and
//! resuming into each other. `DeviceSession` owns the single lock that
//! serializes every pause-requiring operation against one device, and
//! guarantees that each pause it issues is matched by exactly one resume,
//! whether the operation succeeded or failed.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::device::client::DeviceControl;
use crate::device::error::DeviceError;

/// Serializes pause-requiring operations against one device.
pub struct DeviceSession {
    device: Arc<dyn DeviceControl>,
    lock: Mutex<()>,
}

impl DeviceSession {
    pub fn new(device: Arc<dyn DeviceControl>) -> Self {
        Self {
            device,
            lock: Mutex::new(()),
        }
    }

    /// The underlying device, for calls that do not require a pause.
    pub fn device(&self) -> Arc<dyn DeviceControl> {
        Arc::clone(&self.device)
    }

    /// Run `f` with the machine paused and the session held exclusively.
    ///
    /// The resume is issued on every exit path. If both the operation and
    /// the resume fail, the operation's error wins (it is the one the caller
    /// can act on); the resume failure is logged.
    pub async fn with_paused<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        E: From<DeviceError>,
        F: FnOnce(Arc<dyn DeviceControl>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _permit = self.lock.lock().await;
        self.device.pause().await.map_err(E::from)?;

        let result = f(Arc::clone(&self.device)).await;
        let resume = self.device.resume().await;

        let value = result?;
        if let Err(e) = resume {
            tracing::warn!(error = %e, "Resume after paused operation failed");
            return Err(E::from(e));
        }
        Ok(value)
    }
}
