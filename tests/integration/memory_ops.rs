//! Integration tests for the memory engines
//!
//! Drives verified writes, chunked captures, and pattern scans through one
//! shared device session, checking the on-disk artifacts they leave behind.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use ultimatectl::device::DeviceSession;
use ultimatectl::ops::{
    capture, scan, verified_write, CaptureRequest, PatternKind, ScanRequest, WriteRequest,
};
use ultimatectl::util::hex::to_hex;

use super::common::fixtures::seeded_device;

#[tokio::test]
async fn write_then_capture_sees_the_new_bytes() {
    let device = seeded_device();
    let session = DeviceSession::new(Arc::new(device.clone()));
    let dir = TempDir::new().unwrap();

    let sprite = [0xFFu8; 63];
    let mut write = WriteRequest::new(0x2000, sprite.to_vec());
    write.expected = Some(vec![0x00; 63]);
    verified_write(&session, write).await.unwrap();

    let mut request = CaptureRequest::new(0x2000, 63, dir.path().join("sprite.bin"));
    request.chunk_size = 16;
    let manifest = capture(&session, request).await.unwrap();

    let dump = std::fs::read(dir.path().join("sprite.bin")).unwrap();
    assert_eq!(dump, sprite);
    assert_eq!(manifest.checksum, to_hex(&Sha256::digest(sprite)));
    assert!(dir.path().join("sprite.bin.manifest.json").exists());
}

#[tokio::test]
async fn scan_finds_data_planted_by_a_write() {
    let device = seeded_device();
    let session = DeviceSession::new(Arc::new(device.clone()));

    // Plant one solid sprite in an otherwise empty 1 KB window.
    verified_write(&session, WriteRequest::new(0x3040, vec![0xFF; 63]))
        .await
        .unwrap();

    let mut request = ScanRequest::new(0x3000, 1024, PatternKind::Sprite);
    request.stride = 64;
    let found = scan(&device, request).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address, 0x3040);
    assert_eq!(found[0].non_empty_rows, 21);
}

#[tokio::test]
async fn overlapping_operations_serialize_on_the_session() {
    let device = seeded_device();
    let session = Arc::new(DeviceSession::new(Arc::new(device.clone())));
    let dir = TempDir::new().unwrap();

    let write_session = Arc::clone(&session);
    let write = tokio::spawn(async move {
        verified_write(&write_session, WriteRequest::new(0x4000, vec![0x01, 0x02])).await
    });

    let mut request = CaptureRequest::new(0x0400, 256, dir.path().join("screen.bin"));
    request.pause = true;
    let captured = capture(&session, request).await;

    assert!(captured.is_ok());
    assert!(write.await.unwrap().is_ok());

    // Pauses and resumes stay balanced when ops interleave.
    assert_eq!(device.pause_count(), 2);
    assert_eq!(device.resume_count(), 2);
}
