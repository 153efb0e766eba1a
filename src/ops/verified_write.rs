//! Verified memory writes
//!
//! Writing into live machine memory is risky: the target may have changed
//! since the caller last looked, and some regions silently swallow writes.
//! This engine bounds both risks with a fixed protocol, executed with the
//! machine paused and the device session held exclusively:
//!
//! pause → read the current bytes → verify against the caller's expected
//! bytes (optional, maskable) → write → read back → verify the read-back →
//! resume.
//!
//! The read-back comparison is always fatal on mismatch, whatever flags the
//! caller set: a write that does not read back did not durably take effect.

use serde::Serialize;

use crate::device::session::DeviceSession;
use crate::ops::error::{diff_bytes, OpError, VerifyPhase};
use crate::util::hex::to_hex;

/// Parameters for one verified write.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub address: u16,
    pub bytes: Vec<u8>,
    /// Bytes the caller believes are currently at `address`. Compared
    /// before the write when present.
    pub expected: Option<Vec<u8>>,
    /// Per-byte bitmask narrowing the expected comparison; a zero bit is
    /// ignored. Must match `expected` in length.
    pub mask: Option<Vec<u8>>,
    /// When false, a pre-write mismatch is logged and the write proceeds
    /// anyway. Has no effect on the read-back check.
    pub abort_on_mismatch: bool,
}

impl WriteRequest {
    pub fn new(address: u16, bytes: Vec<u8>) -> Self {
        Self {
            address,
            bytes,
            expected: None,
            mask: None,
            abort_on_mismatch: true,
        }
    }
}

/// Successful outcome: enough to reconstruct a precise before/after diff.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub address: u16,
    /// Bytes read before the write, covering the union of the expected
    /// region and the write region.
    pub before: Vec<u8>,
    pub written: Vec<u8>,
    /// Bytes read back after the write.
    pub after: Vec<u8>,
}

impl WriteOutcome {
    /// Hex rendering of the before bytes, for result documents.
    pub fn before_hex(&self) -> String {
        to_hex(&self.before)
    }

    pub fn after_hex(&self) -> String {
        to_hex(&self.after)
    }
}

/// Execute the verified-write protocol.
pub async fn verified_write(
    session: &DeviceSession,
    request: WriteRequest,
) -> Result<WriteOutcome, OpError> {
    if request.bytes.is_empty() {
        return Err(OpError::Validation("Write requires at least one byte".into()));
    }
    let read_len = request
        .bytes
        .len()
        .max(request.expected.as_ref().map(Vec::len).unwrap_or(0));
    let end = u64::from(request.address) + (read_len as u64) - 1;
    if end > u64::from(crate::device::MAX_ADDRESS) {
        return Err(OpError::Validation(format!(
            "Range ${:04X}+{} exceeds the address space",
            request.address, read_len
        )));
    }
    if let (Some(expected), Some(mask)) = (&request.expected, &request.mask) {
        if expected.len() != mask.len() {
            return Err(OpError::Validation(format!(
                "Mask length {} does not match expected length {}",
                mask.len(),
                expected.len()
            )));
        }
    }

    session
        .with_paused(|device| async move {
            let before = device.read_memory(request.address, read_len).await?;

            if let Some(expected) = &request.expected {
                let diffs = diff_bytes(expected, &before[..expected.len()], request.mask.as_deref());
                if !diffs.is_empty() {
                    if request.abort_on_mismatch {
                        return Err(OpError::Verification {
                            phase: VerifyPhase::PreWrite,
                            address: request.address,
                            diffs,
                        });
                    }
                    tracing::warn!(
                        address = format_args!("${:04X}", request.address),
                        differing = diffs.len(),
                        "Pre-write verification mismatch overridden by caller"
                    );
                }
            }

            device.write_memory(request.address, &request.bytes).await?;
            let after = device.read_memory(request.address, request.bytes.len()).await?;

            let diffs = diff_bytes(&request.bytes, &after, None);
            if !diffs.is_empty() {
                return Err(OpError::Verification {
                    phase: VerifyPhase::ReadBack,
                    address: request.address,
                    diffs,
                });
            }

            Ok(WriteOutcome {
                address: request.address,
                before,
                written: request.bytes,
                after,
            })
        })
        .await
}
