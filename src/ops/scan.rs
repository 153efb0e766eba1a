//! Pattern scanner
//!
//! Heuristic detector for fixed-size structured blocks inside an arbitrary
//! memory window: sprite-shaped (63 bytes, 21 rows x 3 bytes) and
//! charset-shaped (2 KB, scored as 256 character rows of 8 bytes). The scan
//! walks the window at a caller-supplied stride and scores each candidate
//! by row occupancy and total set bits. An all-zero candidate is skipped
//! before scoring; the caller's thresholds gate everything else.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::device::client::DeviceControl;
use crate::ops::error::OpError;

/// Shape of the block being searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Hardware sprite: 21 rows x 3 bytes = 63 bytes, 24 pixels wide.
    Sprite,
    /// Character set: 2048 bytes, scored as 256 rows of 8 bytes.
    Charset,
}

impl PatternKind {
    pub fn byte_size(&self) -> usize {
        match self {
            PatternKind::Sprite => 63,
            PatternKind::Charset => 2048,
        }
    }

    pub fn row_bytes(&self) -> usize {
        match self {
            PatternKind::Sprite => 3,
            PatternKind::Charset => 8,
        }
    }

    pub fn rows(&self) -> usize {
        self.byte_size() / self.row_bytes()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Sprite => "sprite",
            PatternKind::Charset => "charset",
        }
    }
}

/// Parameters for one scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub address: u16,
    pub length: usize,
    pub kind: PatternKind,
    /// Step between candidate start offsets. Must be >= the block size so
    /// candidates never overlap.
    pub stride: usize,
    /// Minimum count of non-empty rows for acceptance.
    pub min_rows: usize,
    /// Minimum total set bits for acceptance.
    pub min_bits: usize,
    /// When set, each accepted candidate is written as a raw file here.
    pub save_dir: Option<PathBuf>,
    /// Include a base64 payload per accepted candidate.
    pub include_payload: bool,
}

impl ScanRequest {
    pub fn new(address: u16, length: usize, kind: PatternKind) -> Self {
        Self {
            address,
            length,
            kind,
            stride: kind.byte_size(),
            min_rows: 4,
            min_bits: 16,
            save_dir: None,
            include_payload: false,
        }
    }
}

/// Occupied area of a candidate, in rows and pixel columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
}

/// One accepted candidate.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub address: u16,
    pub kind: PatternKind,
    pub non_empty_rows: usize,
    pub set_bits: usize,
    pub bounds: Bounds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Scan a memory window for shaped blocks.
pub async fn scan(
    device: &dyn DeviceControl,
    request: ScanRequest,
) -> Result<Vec<Candidate>, OpError> {
    let size = request.kind.byte_size();
    if request.stride < size {
        return Err(OpError::Validation(format!(
            "Stride {} is smaller than the {} block size {}",
            request.stride,
            request.kind.as_str(),
            size
        )));
    }
    if request.length < size {
        return Err(OpError::Validation(format!(
            "Window of {} bytes cannot hold a {} block ({} bytes)",
            request.length,
            request.kind.as_str(),
            size
        )));
    }
    let end = u64::from(request.address) + (request.length as u64) - 1;
    if end > u64::from(crate::device::MAX_ADDRESS) {
        return Err(OpError::Validation(format!(
            "Range ${:04X}+{} exceeds the address space",
            request.address, request.length
        )));
    }

    let window = device.read_memory(request.address, request.length).await?;

    if let Some(dir) = &request.save_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut candidates = Vec::new();
    let mut offset = 0usize;
    while offset + size <= window.len() {
        let block = &window[offset..offset + size];
        let block_addr = request.address.wrapping_add(offset as u16);
        if let Some(stats) = score_block(block, request.kind) {
            if stats.non_empty_rows >= request.min_rows && stats.set_bits >= request.min_bits {
                let payload = request.include_payload.then(|| BASE64.encode(block));
                let file = match &request.save_dir {
                    Some(dir) => {
                        let path =
                            dir.join(format!("{}_{:04X}.bin", request.kind.as_str(), block_addr));
                        std::fs::write(&path, block)?;
                        Some(path)
                    }
                    None => None,
                };
                candidates.push(Candidate {
                    address: block_addr,
                    kind: request.kind,
                    non_empty_rows: stats.non_empty_rows,
                    set_bits: stats.set_bits,
                    bounds: stats.bounds,
                    payload,
                    file,
                });
            }
        }
        offset += request.stride;
    }

    tracing::debug!(
        address = format_args!("${:04X}", request.address),
        kind = request.kind.as_str(),
        found = candidates.len(),
        "Scan finished"
    );
    Ok(candidates)
}

struct BlockStats {
    non_empty_rows: usize,
    set_bits: usize,
    bounds: Bounds,
}

/// Score one candidate block. All-zero blocks return None immediately.
fn score_block(block: &[u8], kind: PatternKind) -> Option<BlockStats> {
    if block.iter().all(|&b| b == 0) {
        return None;
    }

    let row_bytes = kind.row_bytes();
    let mut non_empty_rows = 0usize;
    let mut set_bits = 0usize;
    let mut row_min = usize::MAX;
    let mut row_max = 0usize;
    let mut col_min = usize::MAX;
    let mut col_max = 0usize;

    for (row, row_data) in block.chunks(row_bytes).enumerate() {
        let row_bits: usize = row_data.iter().map(|b| b.count_ones() as usize).sum();
        if row_bits == 0 {
            continue;
        }
        non_empty_rows += 1;
        set_bits += row_bits;
        row_min = row_min.min(row);
        row_max = row_max.max(row);

        for (byte_index, &byte) in row_data.iter().enumerate() {
            for bit in 0..8 {
                // Bit 7 is the leftmost pixel of the byte.
                if byte & (0x80 >> bit) != 0 {
                    let col = byte_index * 8 + bit;
                    col_min = col_min.min(col);
                    col_max = col_max.max(col);
                }
            }
        }
    }

    Some(BlockStats {
        non_empty_rows,
        set_bits,
        bounds: Bounds {
            row_min,
            row_max,
            col_min,
            col_max,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;

    /// A sprite with a 2x2 pixel block at row 10, columns 12-13.
    fn dot_sprite() -> Vec<u8> {
        let mut sprite = vec![0u8; 63];
        // col 12 => byte 1, bits 3 and 2 (0x08 | 0x04 = 0x0C)
        sprite[10 * 3 + 1] = 0x0C;
        sprite[11 * 3 + 1] = 0x0C;
        sprite
    }

    #[tokio::test]
    async fn all_zero_window_never_matches() {
        let device = MockDevice::new();
        let mut request = ScanRequest::new(0x2000, 2048, PatternKind::Sprite);
        request.stride = 64;
        request.min_rows = 0;
        request.min_bits = 0;

        let found = scan(&device, request).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn stride_below_block_size_is_rejected() {
        let device = MockDevice::new();
        let mut request = ScanRequest::new(0x2000, 1024, PatternKind::Sprite);
        request.stride = 32;

        let err = scan(&device, request).await.unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
        assert_eq!(device.read_count(), 0);
    }

    #[tokio::test]
    async fn oversized_window_is_rejected_before_any_read() {
        let device = MockDevice::new();

        // Large enough to truncate to zero in 32-bit arithmetic.
        let request = ScanRequest::new(0x1000, 1usize << 32, PatternKind::Sprite);
        let err = scan(&device, request).await.unwrap_err();

        assert!(matches!(err, OpError::Validation(_)));
        assert_eq!(device.read_count(), 0);
    }

    #[tokio::test]
    async fn solid_sprite_is_found_with_bounds() {
        let device = MockDevice::new();
        device.set_memory(0x2040, &[0xFF; 63]);
        let mut request = ScanRequest::new(0x2000, 1024, PatternKind::Sprite);
        request.stride = 64;
        request.min_rows = 21;
        request.min_bits = 63 * 8;

        let found = scan(&device, request).await.unwrap();
        assert_eq!(found.len(), 1);
        let hit = &found[0];
        assert_eq!(hit.address, 0x2040);
        assert_eq!(hit.non_empty_rows, 21);
        assert_eq!(hit.set_bits, 63 * 8);
        assert_eq!(
            hit.bounds,
            Bounds {
                row_min: 0,
                row_max: 20,
                col_min: 0,
                col_max: 23
            }
        );
    }

    #[tokio::test]
    async fn thresholds_reject_sparse_noise() {
        let device = MockDevice::new();
        device.set_memory(0x2000, &dot_sprite());
        let mut request = ScanRequest::new(0x2000, 63, PatternKind::Sprite);
        request.min_rows = 4;
        request.min_bits = 16;

        let found = scan(&device, request).await.unwrap();
        assert!(found.is_empty());

        // The same block passes with thresholds it satisfies.
        let mut relaxed = ScanRequest::new(0x2000, 63, PatternKind::Sprite);
        relaxed.min_rows = 2;
        relaxed.min_bits = 4;
        let found = scan(&device, relaxed).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].bounds,
            Bounds {
                row_min: 10,
                row_max: 11,
                col_min: 12,
                col_max: 13
            }
        );
    }

    #[tokio::test]
    async fn payload_and_file_outputs() {
        use tempfile::TempDir;

        let device = MockDevice::new();
        device.set_memory(0x3000, &[0xFF; 63]);
        let dir = TempDir::new().unwrap();

        let mut request = ScanRequest::new(0x3000, 63, PatternKind::Sprite);
        request.min_rows = 1;
        request.min_bits = 1;
        request.include_payload = true;
        request.save_dir = Some(dir.path().to_path_buf());

        let found = scan(&device, request).await.unwrap();
        assert_eq!(found.len(), 1);
        let payload = found[0].payload.as_ref().unwrap();
        assert_eq!(BASE64.decode(payload).unwrap(), vec![0xFF; 63]);

        let file = found[0].file.as_ref().unwrap();
        assert_eq!(file.file_name().unwrap(), "sprite_3000.bin");
        assert_eq!(std::fs::read(file).unwrap(), vec![0xFF; 63]);
    }

    #[test]
    fn charset_shape() {
        assert_eq!(PatternKind::Charset.byte_size(), 2048);
        assert_eq!(PatternKind::Charset.rows(), 256);
        assert_eq!(PatternKind::Sprite.rows(), 21);
    }
}
