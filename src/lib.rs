pub mod config;
pub mod device;
pub mod ops;
pub mod tasks;
pub mod util;

pub use config::Config;
pub use device::{DeviceControl, DeviceError, DeviceSession, MockDevice, RestDevice};
pub use ops::{
    CaptureFormat, CaptureManifest, CaptureRequest, Candidate, ConfigSnapshot, DiffReport, OpError,
    PatternKind, ScanRequest, WriteOutcome, WriteRequest,
};
pub use tasks::{Scheduler, SchedulerError, StartRequest, Task, TaskKind, TaskStatus, TaskStore};
