pub mod capture;
pub mod config_backup;
pub mod error;
pub mod scan;
pub mod verified_write;

pub use capture::{capture, manifest_path, CaptureFormat, CaptureManifest, CaptureRequest};
pub use config_backup::{diff, restore, snapshot, ConfigSnapshot, DiffReport};
pub use error::{ByteDiff, OpError, VerifyPhase};
pub use scan::{scan, Candidate, PatternKind, ScanRequest};
pub use verified_write::{verified_write, WriteOutcome, WriteRequest};
