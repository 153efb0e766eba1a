//! Named per-tick operations.
//!
//! A task's `operation` field is a symbolic name resolved here on every
//! tick. Operations are read-only device actions; anything that mutates the
//! machine goes through the engines in [`crate::ops`] instead of a recurring
//! task.

use serde_json::{json, Value};

use crate::device::client::DeviceControl;
use crate::ops::error::OpError;
use crate::util::hex::{parse_address, to_hex};
use crate::util::time::now_stamp;

/// Base of the default screen RAM.
const SCREEN_BASE: u16 = 0x0400;
/// 40 columns x 25 rows.
const SCREEN_BYTES: usize = 1000;

/// Operation names accepted by [`execute`].
pub const OPERATIONS: &[&str] = &["read_memory", "read_screen", "device_info"];

/// Execute one named operation against the device, producing the JSON
/// document stored as the task's latest result.
pub async fn execute(
    device: &dyn DeviceControl,
    operation: &str,
    args: &Value,
) -> Result<Value, OpError> {
    match operation {
        "read_memory" => read_memory(device, args).await,
        "read_screen" => read_screen(device).await,
        "device_info" => device_info(device).await,
        other => Err(OpError::Validation(format!(
            "Unknown operation '{}' (expected one of: {})",
            other,
            OPERATIONS.join(", ")
        ))),
    }
}

async fn read_memory(device: &dyn DeviceControl, args: &Value) -> Result<Value, OpError> {
    let address = arg_address(args, "address")?;
    let length = args
        .get("length")
        .and_then(Value::as_u64)
        .ok_or_else(|| OpError::Validation("read_memory requires a 'length' argument".into()))?
        as usize;
    if length == 0 {
        return Err(OpError::Validation("'length' must be at least 1".into()));
    }
    if u64::from(address) + (length as u64) - 1 > u64::from(crate::device::MAX_ADDRESS) {
        return Err(OpError::Validation(format!(
            "Range ${:04X}+{} exceeds the address space",
            address, length
        )));
    }

    let bytes = device.read_memory(address, length).await?;
    Ok(json!({
        "at": now_stamp(),
        "address": format!("${:04X}", address),
        "length": length,
        "data": to_hex(&bytes),
    }))
}

async fn read_screen(device: &dyn DeviceControl) -> Result<Value, OpError> {
    let bytes = device.read_memory(SCREEN_BASE, SCREEN_BYTES).await?;
    let lines: Vec<String> = bytes
        .chunks(40)
        .map(|row| row.iter().map(|&c| screen_code_to_char(c)).collect())
        .collect();
    Ok(json!({
        "at": now_stamp(),
        "address": format!("${:04X}", SCREEN_BASE),
        "lines": lines,
    }))
}

async fn device_info(device: &dyn DeviceControl) -> Result<Value, OpError> {
    let version = device.version().await?;
    let info = device.info().await?;
    Ok(json!({
        "at": now_stamp(),
        "version": version,
        "info": info,
    }))
}

/// Parse an address argument that may be a JSON number or a string like
/// "$0400" / "0x0400".
pub fn arg_address(args: &Value, key: &str) -> Result<u16, OpError> {
    let value = args
        .get(key)
        .ok_or_else(|| OpError::Validation(format!("Missing '{}' argument", key)))?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .filter(|n| *n <= u64::from(u16::MAX))
            .map(|n| n as u16)
            .ok_or_else(|| OpError::Validation(format!("'{}' is out of range", key))),
        Value::String(s) => parse_address(s)
            .ok_or_else(|| OpError::Validation(format!("'{}' is not a valid address: {}", key, s))),
        _ => Err(OpError::Validation(format!(
            "'{}' must be a number or an address string",
            key
        ))),
    }
}

/// Map a C64 screen code to a printable ASCII approximation. Reverse-video
/// codes are folded onto their plain forms; graphics characters become '.'.
fn screen_code_to_char(code: u8) -> char {
    let c = code & 0x7F;
    match c {
        0 => '@',
        1..=26 => (b'A' + c - 1) as char,
        27 => '[',
        29 => ']',
        32..=63 => c as char,
        _ => '.',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;

    #[tokio::test]
    async fn read_memory_returns_hex() {
        let device = MockDevice::new();
        device.set_memory(0x0400, &[0xDE, 0xAD]);

        let result = execute(
            &device,
            "read_memory",
            &json!({"address": "$0400", "length": 2}),
        )
        .await
        .unwrap();
        assert_eq!(result["data"], "DEAD");
        assert_eq!(result["address"], "$0400");
    }

    #[tokio::test]
    async fn read_memory_rejects_out_of_range() {
        let device = MockDevice::new();
        let err = execute(
            &device,
            "read_memory",
            &json!({"address": "$FFF0", "length": 32}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
        assert_eq!(device.read_count(), 0);
    }

    #[tokio::test]
    async fn read_memory_rejects_oversized_length() {
        let device = MockDevice::new();
        // Truncates to zero in 32-bit arithmetic.
        let err = execute(
            &device,
            "read_memory",
            &json!({"address": "$0400", "length": 4_294_967_296u64}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
        assert_eq!(device.read_count(), 0);
    }

    #[tokio::test]
    async fn unknown_operation_is_a_validation_error() {
        let device = MockDevice::new();
        let err = execute(&device, "format_disk", &json!({})).await.unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
    }

    #[tokio::test]
    async fn read_screen_decodes_rows() {
        let device = MockDevice::new();
        // "HELLO" in screen codes at the top-left corner
        device.set_memory(0x0400, &[8, 5, 12, 12, 15]);

        let result = execute(&device, "read_screen", &json!({})).await.unwrap();
        let first = result["lines"][0].as_str().unwrap();
        assert!(first.starts_with("HELLO"));
        assert_eq!(result["lines"].as_array().unwrap().len(), 25);
    }

    #[test]
    fn screen_codes_fold_reverse_video() {
        assert_eq!(screen_code_to_char(1), 'A');
        assert_eq!(screen_code_to_char(0x81), 'A');
        assert_eq!(screen_code_to_char(32), ' ');
        assert_eq!(screen_code_to_char(100), '.');
    }
}
