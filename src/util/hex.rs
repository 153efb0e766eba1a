//! Hex parsing and formatting helpers shared by the ops engines and the CLI.

/// Parse a 16-bit address from a string.
///
/// Accepts `$0400`, `0x0400`, `0400` (bare hex), and decimal like `1024`.
pub fn parse_address(s: &str) -> Option<u16> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('$') {
        return u16::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16).ok();
    }
    // Bare strings are tried as decimal first, then hex
    s.parse::<u16>()
        .ok()
        .or_else(|| u16::from_str_radix(s, 16).ok())
}

/// Parse a hex byte string (e.g. "AA55", "aa 55", "$AA55") into bytes.
/// Whitespace is ignored; an odd number of digits is an error.
pub fn parse_hex_bytes(s: &str) -> Option<Vec<u8>> {
    let cleaned: String = s
        .trim()
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || cleaned.len() % 2 != 0 {
        return None;
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).ok())
        .collect()
}

/// Format bytes as an uppercase hex string without separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Format bytes as a classic monitor-style hex dump, 16 bytes per line,
/// prefixed with the absolute address of each line.
pub fn hex_dump(base: u16, bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let addr = base.wrapping_add((i * 16) as u16);
        out.push_str(&format!("{:04X}:", addr));
        for b in chunk {
            out.push_str(&format!(" {:02X}", b));
        }
        out.push('\n');
    }
    out
}
