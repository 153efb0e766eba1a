//! Chunked memory capture
//!
//! Captures a memory range too large for one read into a local file. Reads
//! are chunked, each chunk is retried on transient failures, and the
//! finished dump gets a manifest sidecar carrying its SHA-256 checksum.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::device::client::DeviceControl;
use crate::device::session::DeviceSession;
use crate::ops::error::OpError;
use crate::util::hex::{hex_dump, to_hex};
use crate::util::time::now_stamp;

/// On-disk encoding of the captured bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Monitor-style hex dump, 16 bytes per line.
    Hex,
    /// Raw bytes.
    Binary,
}

/// Parameters for one capture.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub address: u16,
    pub length: usize,
    /// Bytes per device read.
    pub chunk_size: usize,
    /// Extra attempts per chunk after the first.
    pub retries: usize,
    pub format: CaptureFormat,
    /// Pause the machine once for the whole capture (never per chunk).
    pub pause: bool,
    pub output: PathBuf,
}

impl CaptureRequest {
    pub fn new(address: u16, length: usize, output: PathBuf) -> Self {
        Self {
            address,
            length,
            chunk_size: 256,
            retries: 2,
            format: CaptureFormat::Binary,
            pause: false,
            output,
        }
    }
}

/// Sidecar document describing a completed dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureManifest {
    pub address: String,
    pub length: usize,
    pub chunk_size: usize,
    pub format: CaptureFormat,
    /// Uppercase SHA-256 of the captured bytes (not of the encoded file).
    pub checksum: String,
    pub output: PathBuf,
    pub created_at: String,
}

/// Path of the manifest written next to a dump.
pub fn manifest_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".manifest.json");
    PathBuf::from(name)
}

/// Capture a memory range to `request.output` and write its manifest.
pub async fn capture(
    session: &DeviceSession,
    request: CaptureRequest,
) -> Result<CaptureManifest, OpError> {
    if request.length == 0 {
        return Err(OpError::Validation("'length' must be at least 1".into()));
    }
    if request.chunk_size == 0 {
        return Err(OpError::Validation("'chunk_size' must be at least 1".into()));
    }
    // u64 so huge lengths cannot truncate or wrap past the bound check.
    let end = u64::from(request.address) + (request.length as u64) - 1;
    if end > u64::from(crate::device::MAX_ADDRESS) {
        return Err(OpError::Validation(format!(
            "Range ${:04X}+{} exceeds the address space (ends at ${:05X})",
            request.address, request.length, end
        )));
    }

    let bytes = if request.pause {
        let address = request.address;
        let length = request.length;
        let chunk_size = request.chunk_size;
        let retries = request.retries;
        session
            .with_paused(|device| async move {
                read_chunked(&*device, address, length, chunk_size, retries).await
            })
            .await?
    } else {
        let device = session.device();
        read_chunked(
            &*device,
            request.address,
            request.length,
            request.chunk_size,
            request.retries,
        )
        .await?
    };

    if let Some(parent) = request.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match request.format {
        CaptureFormat::Binary => std::fs::write(&request.output, &bytes)?,
        CaptureFormat::Hex => std::fs::write(&request.output, hex_dump(request.address, &bytes))?,
    }

    let manifest = CaptureManifest {
        address: format!("${:04X}", request.address),
        length: request.length,
        chunk_size: request.chunk_size,
        format: request.format,
        checksum: to_hex(&Sha256::digest(&bytes)),
        output: request.output.clone(),
        created_at: now_stamp(),
    };
    std::fs::write(
        manifest_path(&request.output),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    tracing::info!(
        address = %manifest.address,
        length = manifest.length,
        output = %request.output.display(),
        "Capture complete"
    );
    Ok(manifest)
}

/// Read `[address, address+length)` in `chunk_size` pieces, giving each
/// chunk `retries + 1` attempts and re-raising the last failure when a
/// chunk exhausts them.
async fn read_chunked(
    device: &dyn DeviceControl,
    address: u16,
    length: usize,
    chunk_size: usize,
    retries: usize,
) -> Result<Vec<u8>, OpError> {
    let mut buffer = Vec::with_capacity(length);
    let mut offset = 0usize;
    while offset < length {
        let chunk_addr = address.wrapping_add(offset as u16);
        let chunk_len = chunk_size.min(length - offset);

        let mut attempt = 0;
        let chunk = loop {
            match device.read_memory(chunk_addr, chunk_len).await {
                Ok(chunk) => break chunk,
                Err(e) if attempt < retries => {
                    attempt += 1;
                    tracing::debug!(
                        address = format_args!("${:04X}", chunk_addr),
                        attempt,
                        error = %e,
                        "Chunk read failed, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };
        buffer.extend_from_slice(&chunk);
        offset += chunk_len;
    }
    Ok(buffer)
}
