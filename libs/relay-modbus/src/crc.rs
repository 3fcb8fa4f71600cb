//! CRC-16/MODBUS
//!
//! Seed 0xFFFF, reflected polynomial 0xA001. The checksum travels low byte
//! first, so `calculate` hands back `(lo, hi)` in wire order.

const CRC_SEED: u16 = 0xFFFF;
const CRC_POLY: u16 = 0xA001;

/// Raw 16-bit checksum over `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC_SEED;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Checksum bytes in wire order `(lo, hi)`. Empty input yields the seed.
pub fn calculate(data: &[u8]) -> (u8, u8) {
    let crc = crc16(data);
    ((crc & 0xFF) as u8, (crc >> 8) as u8)
}

/// Recompute over everything but the trailing two bytes and compare.
///
/// Frames shorter than the checksum itself never verify.
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    calculate(body) == (tail[0], tail[1])
}

/// Append the checksum of the current contents
pub fn append(frame: &mut Vec<u8>) {
    let (lo, hi) = calculate(frame);
    frame.push(lo);
    frame.push(hi);
}

/// Trailing checksum as transmitted, if present
pub(crate) fn trailing(frame: &[u8]) -> Option<u16> {
    match frame {
        [.., lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    // ========================================================================
    // Known vectors
    // ========================================================================

    #[test]
    fn test_calculate_read_coils_vector() {
        assert_eq!(calculate(&[0x01, 0x01, 0x00, 0x13, 0x00, 0x25]), (0x0C, 0x14));
    }

    #[test]
    fn test_calculate_read_holding_vector() {
        assert_eq!(calculate(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), (0x84, 0x0A));
    }

    #[test]
    fn test_calculate_write_single_coil_vector() {
        assert_eq!(calculate(&[0x01, 0x05, 0x00, 0x00, 0xFF, 0x00]), (0x8C, 0x3A));
    }

    #[test]
    fn test_calculate_exception_vector() {
        assert_eq!(calculate(&[0x01, 0x81, 0x02]), (0xC1, 0x91));
    }

    #[test]
    fn test_calculate_empty_is_seed() {
        assert_eq!(calculate(&[]), (0xFF, 0xFF));
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_is_le_of_calculate() {
        let data = [0x01, 0x0F, 0x00, 0x00, 0x00, 0x04];
        let (lo, hi) = calculate(&data);
        assert_eq!(crc16(&data), u16::from_le_bytes([lo, hi]));
        assert_eq!((lo, hi), (0x54, 0x08));
    }

    // ========================================================================
    // Verification
    // ========================================================================

    #[test]
    fn test_verify_roundtrip_over_many_inputs() {
        let mut seed: u32 = 0x1234_5678;
        for len in 0..64usize {
            let mut data = Vec::with_capacity(len + 2);
            for _ in 0..len {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                data.push((seed >> 16) as u8);
            }
            append(&mut data);
            assert!(verify(&data), "len {} failed", len);
        }
    }

    #[test]
    fn test_verify_detects_corrupted_checksum() {
        let mut frame = vec![0x01, 0x01, 0x01, 0x05];
        append(&mut frame);
        assert_eq!(&frame[4..], &[0x91, 0x8B]);
        *frame.last_mut().unwrap() ^= 0x01;
        assert!(!verify(&frame));
    }

    #[test]
    fn test_verify_detects_payload_bit_flip() {
        let mut frame = vec![0x01, 0x02, 0x01, 0x03];
        append(&mut frame);
        assert!(verify(&frame));
        frame[3] ^= 0x04;
        assert!(!verify(&frame));
    }

    #[test]
    fn test_verify_short_frames() {
        assert!(!verify(&[]));
        assert!(!verify(&[0xFF]));
        assert!(verify(&[0xFF, 0xFF]));
    }

    #[test]
    fn test_trailing() {
        assert_eq!(trailing(&[0x01, 0x81, 0x02, 0xC1, 0x91]), Some(0x91C1));
        assert_eq!(trailing(&[0x01]), None);
    }
}
