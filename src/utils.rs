//! Utility functions for byte handling and data conversion.
//!
//! # Example
//!
//! ```
//! use yaskawa_hse::utils::{format_hex, parse_file_list};
//!
//! assert_eq!(format_hex(b"YERC"), "59 45 52 43");
//!
//! let names = parse_file_list(b"MAIN.JBI\r\nTEST.JBI\r\n");
//! assert_eq!(names, vec!["MAIN.JBI", "TEST.JBI"]);
//! ```

/// Reads a little-endian `u16` at `offset`.
///
/// The caller guarantees that `offset + 2 <= data.len()`.
#[inline]
pub(crate) fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Reads a little-endian `u32` at `offset`.
///
/// The caller guarantees that `offset + 4 <= data.len()`.
#[inline]
pub(crate) fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Formats bytes as space separated hex pairs.
///
/// # Example
///
/// ```
/// use yaskawa_hse::utils::format_hex;
///
/// assert_eq!(format_hex(&[0x00, 0xAB, 0x10]), "00 AB 10");
/// assert_eq!(format_hex(&[]), "");
/// ```
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a file list payload into file names.
///
/// The controller separates names with CR LF. Empty entries are dropped and
/// non-UTF-8 bytes are replaced.
///
/// # Example
///
/// ```
/// use yaskawa_hse::utils::parse_file_list;
///
/// assert_eq!(parse_file_list(b"A.JBI\r\nB.JBI"), vec!["A.JBI", "B.JBI"]);
/// assert!(parse_file_list(b"").is_empty());
/// ```
pub fn parse_file_list(data: &[u8]) -> Vec<String> {
    data.split(|byte| *byte == b'\r' || *byte == b'\n')
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}
