//! Hex rendering for frame traces

use std::fmt::Write;

/// Encode bytes as upper-case hex pairs separated by spaces
/// Example: [0x01, 0x05, 0xFF] -> "01 05 FF"
pub fn encode_frame(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        // Writing to a String cannot fail
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_request() {
        assert_eq!(
            encode_frame(&[0x01, 0x01, 0x00, 0x13, 0x00, 0x25, 0x0C, 0x14]),
            "01 01 00 13 00 25 0C 14"
        );
    }

    #[test]
    fn test_encode_frame_empty() {
        assert_eq!(encode_frame(&[]), "");
    }

    #[test]
    fn test_encode_frame_single_byte() {
        assert_eq!(encode_frame(&[0x0F]), "0F");
    }
}
