//! Hex formatting for protocol frame traces

use std::fmt::Write;

/// Frames longer than this are cut in trace output
pub const MAX_TRACE_BYTES: usize = 64;

/// Format bytes as space separated uppercase hex pairs
///
/// `[0x03, 0x00, 0x1F]` becomes `"03 00 1F"`. Input longer than
/// [`MAX_TRACE_BYTES`] is cut and suffixed with the total length.
pub fn format_hex_pretty(data: &[u8]) -> String {
    let shown = &data[..data.len().min(MAX_TRACE_BYTES)];
    let mut result = String::with_capacity(shown.len() * 3 + 16);
    for (i, byte) in shown.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        let _ = write!(&mut result, "{:02X}", byte);
    }
    if data.len() > shown.len() {
        let _ = write!(&mut result, " .. ({} bytes)", data.len());
    }
    result
}
