//! Error taxonomy for the orchestration engines.
//!
//! Three families: validation errors are detected before any device I/O and
//! abort with no side effects; execution errors (device failures, violated
//! post-conditions) propagate after the device session has been released;
//! storage errors cover the local filesystem. Verification failures carry
//! byte-level diffs so callers can decide whether to retry, override, or
//! abandon.

use serde::Serialize;
use thiserror::Error;

use crate::device::error::DeviceError;

/// One differing byte in a verification comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteDiff {
    /// Offset from the start of the compared region.
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

/// Which comparison of the verified-write protocol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerifyPhase {
    /// Expected-bytes check before the write was issued.
    PreWrite,
    /// Read-back check after the write. Always fatal: the write did not
    /// durably take effect.
    ReadBack,
}

impl std::fmt::Display for VerifyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyPhase::PreWrite => write!(f, "pre-write"),
            VerifyPhase::ReadBack => write!(f, "read-back"),
        }
    }
}

/// Error type for orchestration operations.
#[derive(Debug, Error)]
pub enum OpError {
    /// Malformed or out-of-range caller input; no device I/O was issued.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A verification comparison failed.
    #[error("{phase} verification failed at ${address:04X}: {}", format_diffs(.diffs))]
    Verification {
        phase: VerifyPhase,
        address: u16,
        diffs: Vec<ByteDiff>,
    },

    /// The device control plane reported failure.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Local file I/O failed.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A persisted document could not be read or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Render the first few diffs as `+off exp!=act`; keeps error strings
/// readable even when a whole region mismatches.
fn format_diffs(diffs: &[ByteDiff]) -> String {
    const SHOWN: usize = 8;
    let mut parts: Vec<String> = diffs
        .iter()
        .take(SHOWN)
        .map(|d| format!("+{} {:02X}!={:02X}", d.offset, d.expected, d.actual))
        .collect();
    if diffs.len() > SHOWN {
        parts.push(format!("... {} total", diffs.len()));
    }
    parts.join(", ")
}

/// Compare `actual` against `expected`, honoring an optional per-byte mask
/// (a zero mask bit excludes that bit from the comparison).
pub fn diff_bytes(expected: &[u8], actual: &[u8], mask: Option<&[u8]>) -> Vec<ByteDiff> {
    expected
        .iter()
        .zip(actual.iter())
        .enumerate()
        .filter_map(|(offset, (&e, &a))| {
            let m = mask.and_then(|m| m.get(offset).copied()).unwrap_or(0xFF);
            if e & m != a & m {
                Some(ByteDiff {
                    offset,
                    expected: e & m,
                    actual: a & m,
                })
            } else {
                None
            }
        })
        .collect()
}
