//! RTU frame codec for the coil and discrete-input function codes
//!
//! ```text
//! [slave:1][function:1][payload:N][crc_lo:1][crc_hi:1]
//! ```
//!
//! Requests are validated when built; responses are validated against the
//! request that produced them.

use tracing::debug;

use crate::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_FLAG, EXCEPTION_FRAME_LEN, MAX_READ_BITS, MAX_WRITE_BITS,
    MIN_FRAME_LEN, WRITE_ACK_FRAME_LEN,
};
use crate::crc;
use crate::error::{FrameError, ModbusError, Result};
use crate::types::SlaveId;

/// Supported Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    WriteSingleCoil = 0x05,
    WriteMultipleCoils = 0x0F,
}

impl FunctionCode {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x05 => Some(Self::WriteSingleCoil),
            0x0F => Some(Self::WriteMultipleCoils),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteMultipleCoils => "Write Multiple Coils",
        }
    }
}

/// A validated master request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils {
        slave: SlaveId,
        start: u16,
        count: u16,
    },
    ReadDiscreteInputs {
        slave: SlaveId,
        start: u16,
        count: u16,
    },
    WriteSingleCoil {
        slave: SlaveId,
        address: u16,
        value: bool,
    },
    WriteMultipleCoils {
        slave: SlaveId,
        start: u16,
        values: Vec<bool>,
    },
}

/// Decoded response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// FC01/FC02 bits, trimmed to the requested count
    Bits(Vec<bool>),
    /// FC05 echo
    CoilWritten { address: u16, value: bool },
    /// FC15 echo
    CoilsWritten { start: u16, count: u16 },
}

impl Response {
    pub fn into_bits(self) -> Option<Vec<bool>> {
        match self {
            Self::Bits(bits) => Some(bits),
            _ => None,
        }
    }
}

fn check_count(function: FunctionCode, count: u16, max: u16) -> Result<()> {
    if count == 0 || count > max {
        return Err(ModbusError::invalid_argument(format!(
            "{}: count {} outside 1..={}",
            function.name(),
            count,
            max
        )));
    }
    Ok(())
}

fn check_span(function: FunctionCode, start: u16, count: u16) -> Result<()> {
    if start.checked_add(count - 1).is_none() {
        return Err(ModbusError::invalid_argument(format!(
            "{}: {} bits from 0x{:04X} run past 0xFFFF",
            function.name(),
            count,
            start
        )));
    }
    Ok(())
}

impl Request {
    /// FC01
    pub fn read_coils(slave: u8, start: u16, count: u16) -> Result<Self> {
        let slave = SlaveId::new(slave)?;
        check_count(FunctionCode::ReadCoils, count, MAX_READ_BITS)?;
        check_span(FunctionCode::ReadCoils, start, count)?;
        Ok(Self::ReadCoils {
            slave,
            start,
            count,
        })
    }

    /// FC02
    pub fn read_discrete_inputs(slave: u8, start: u16, count: u16) -> Result<Self> {
        let slave = SlaveId::new(slave)?;
        check_count(FunctionCode::ReadDiscreteInputs, count, MAX_READ_BITS)?;
        check_span(FunctionCode::ReadDiscreteInputs, start, count)?;
        Ok(Self::ReadDiscreteInputs {
            slave,
            start,
            count,
        })
    }

    /// FC05
    pub fn write_single_coil(slave: u8, address: u16, value: bool) -> Result<Self> {
        Ok(Self::WriteSingleCoil {
            slave: SlaveId::new(slave)?,
            address,
            value,
        })
    }

    /// FC15; `values.len()` must equal `count`
    pub fn write_multiple_coils(slave: u8, start: u16, count: u16, values: &[bool]) -> Result<Self> {
        let slave = SlaveId::new(slave)?;
        check_count(FunctionCode::WriteMultipleCoils, count, MAX_WRITE_BITS)?;
        if values.len() != usize::from(count) {
            return Err(ModbusError::invalid_argument(format!(
                "Write Multiple Coils: count {} but {} values",
                count,
                values.len()
            )));
        }
        check_span(FunctionCode::WriteMultipleCoils, start, count)?;
        Ok(Self::WriteMultipleCoils {
            slave,
            start,
            values: values.to_vec(),
        })
    }

    pub fn slave(&self) -> SlaveId {
        match self {
            Self::ReadCoils { slave, .. }
            | Self::ReadDiscreteInputs { slave, .. }
            | Self::WriteSingleCoil { slave, .. }
            | Self::WriteMultipleCoils { slave, .. } => *slave,
        }
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
        }
    }

    /// True for requests that change device outputs
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil { .. } | Self::WriteMultipleCoils { .. }
        )
    }

    /// Complete ADU with checksum
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8);
        match self {
            Self::ReadCoils { start, count, .. } | Self::ReadDiscreteInputs { start, count, .. } => {
                payload.extend_from_slice(&start.to_be_bytes());
                payload.extend_from_slice(&count.to_be_bytes());
            },
            Self::WriteSingleCoil { address, value, .. } => {
                let raw = if *value { COIL_ON } else { COIL_OFF };
                payload.extend_from_slice(&address.to_be_bytes());
                payload.extend_from_slice(&raw.to_be_bytes());
            },
            Self::WriteMultipleCoils { start, values, .. } => {
                let packed = pack_bits(values);
                payload.extend_from_slice(&start.to_be_bytes());
                payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
                payload.push(packed.len() as u8);
                payload.extend_from_slice(&packed);
            },
        }
        build_frame(self.slave().get(), self.function().code(), &payload)
    }

    /// Full length of a normal (non-exception) response
    pub fn expected_response_len(&self) -> usize {
        match self {
            Self::ReadCoils { count, .. } | Self::ReadDiscreteInputs { count, .. } => {
                5 + byte_count(usize::from(*count))
            },
            Self::WriteSingleCoil { .. } | Self::WriteMultipleCoils { .. } => WRITE_ACK_FRAME_LEN,
        }
    }

    /// Validate `frame` as the answer to this request.
    ///
    /// Checks run in order: minimum length, checksum, slave echo, exception
    /// flag, function echo, exact length, payload.
    pub fn decode_response(&self, frame: &[u8]) -> Result<Response> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort {
                len: frame.len(),
                min: MIN_FRAME_LEN,
            }
            .into());
        }

        if !crc::verify(frame) {
            let body = &frame[..frame.len() - 2];
            return Err(FrameError::CrcMismatch {
                expected: crc::crc16(body),
                actual: crc::trailing(frame).unwrap_or_default(),
            }
            .into());
        }

        let slave = self.slave().get();
        if frame[0] != slave {
            return Err(FrameError::SlaveMismatch {
                expected: slave,
                actual: frame[0],
            }
            .into());
        }

        let function = self.function().code();
        if frame[1] == function | EXCEPTION_FLAG {
            if frame.len() != EXCEPTION_FRAME_LEN {
                return Err(FrameError::LengthMismatch {
                    expected: EXCEPTION_FRAME_LEN,
                    actual: frame.len(),
                }
                .into());
            }
            debug!("RTU exception: FC={:02X} code={:02X}", function, frame[2]);
            return Err(ModbusError::Exception {
                function,
                code: frame[2],
            });
        }
        if frame[1] != function {
            return Err(FrameError::FunctionMismatch {
                expected: function,
                actual: frame[1],
            }
            .into());
        }

        let expected_len = self.expected_response_len();
        if frame.len() != expected_len {
            return Err(FrameError::LengthMismatch {
                expected: expected_len,
                actual: frame.len(),
            }
            .into());
        }

        let payload = &frame[2..frame.len() - 2];
        match self {
            Self::ReadCoils { count, .. } | Self::ReadDiscreteInputs { count, .. } => {
                let expected = byte_count(usize::from(*count));
                let declared = usize::from(payload[0]);
                if declared != expected {
                    return Err(FrameError::ByteCountMismatch {
                        expected,
                        actual: declared,
                    }
                    .into());
                }
                Ok(Response::Bits(unpack_bits(
                    &payload[1..],
                    usize::from(*count),
                )))
            },
            Self::WriteSingleCoil { address, value, .. } => {
                let raw = if *value { COIL_ON } else { COIL_OFF };
                expect_echo("address", *address, payload, 0)?;
                expect_echo("value", raw, payload, 2)?;
                Ok(Response::CoilWritten {
                    address: *address,
                    value: *value,
                })
            },
            Self::WriteMultipleCoils { start, values, .. } => {
                let count = values.len() as u16;
                expect_echo("start", *start, payload, 0)?;
                expect_echo("count", count, payload, 2)?;
                Ok(Response::CoilsWritten {
                    start: *start,
                    count,
                })
            },
        }
    }
}

fn expect_echo(field: &'static str, expected: u16, payload: &[u8], at: usize) -> Result<()> {
    let actual = u16::from_be_bytes([payload[at], payload[at + 1]]);
    if actual != expected {
        return Err(FrameError::EchoMismatch {
            field,
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

#[inline]
fn byte_count(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// `[slave][function][payload][crc_lo][crc_hi]`
pub fn build_frame(slave: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(slave);
    frame.push(function);
    frame.extend_from_slice(payload);
    crc::append(&mut frame);
    frame
}

/// Pack bits LSB-first, first value in bit 0 of the first byte
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; byte_count(values.len())];
    for (i, &on) in values.iter().enumerate() {
        if on {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Inverse of [`pack_bits`], reading exactly `count` bits
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn frame_error(result: Result<Response>) -> FrameError {
        match result {
            Err(ModbusError::Frame(e)) => e,
            other => panic!("expected frame error, got {:?}", other),
        }
    }

    // ========================================================================
    // Request building
    // ========================================================================

    #[test]
    fn test_encode_read_coils() {
        let req = Request::read_coils(1, 0x0013, 0x0025).unwrap();
        assert_eq!(
            req.encode(),
            vec![0x01, 0x01, 0x00, 0x13, 0x00, 0x25, 0x0C, 0x14]
        );
        assert_eq!(req.expected_response_len(), 5 + 5);
    }

    #[test]
    fn test_encode_write_single_coil() {
        let on = Request::write_single_coil(1, 0, true).unwrap();
        assert_eq!(
            on.encode(),
            vec![0x01, 0x05, 0x00, 0x00, 0xFF, 0x00, 0x8C, 0x3A]
        );
        let off = Request::write_single_coil(1, 0, false).unwrap().encode();
        assert_eq!(&off[4..6], &[0x00, 0x00]);
        assert!(crc::verify(&off));
    }

    #[test]
    fn test_encode_write_multiple_coils() {
        let req = Request::write_multiple_coils(1, 0, 4, &[true, false, true, true]).unwrap();
        let frame = req.encode();
        assert_eq!(&frame[..8], &[0x01, 0x0F, 0x00, 0x00, 0x00, 0x04, 0x01, 0x0D]);
        assert_eq!(frame.len(), 10);
        assert!(crc::verify(&frame));
        assert_eq!(req.expected_response_len(), 8);
    }

    #[test]
    fn test_builders_reject_bad_slave() {
        assert!(Request::read_coils(0, 0, 1).is_err());
        assert!(Request::read_discrete_inputs(248, 0, 1).is_err());
        assert!(Request::write_single_coil(0, 0, true).is_err());
        assert!(Request::write_multiple_coils(250, 0, 1, &[true]).is_err());
    }

    #[test]
    fn test_builders_reject_bad_counts() {
        assert!(Request::read_coils(1, 0, 0).is_err());
        assert!(Request::read_coils(1, 0, 2000).is_ok());
        assert!(Request::read_coils(1, 0, 2001).is_err());
        assert!(Request::read_discrete_inputs(1, 0, 2001).is_err());
        assert!(Request::write_multiple_coils(1, 0, 0, &[]).is_err());
        let many = vec![false; 1969];
        assert!(Request::write_multiple_coils(1, 0, 1969, &many).is_err());
        assert!(Request::write_multiple_coils(1, 0, 1968, &many[..1968]).is_ok());
    }

    #[test]
    fn test_builders_reject_span_overflow() {
        assert!(Request::read_coils(1, 0xFFFF, 1).is_ok());
        assert!(Request::read_coils(1, 0xFFFF, 2).is_err());
        assert!(Request::write_multiple_coils(1, 0xFFFE, 3, &[true; 3]).is_err());
    }

    #[test]
    fn test_write_multiple_rejects_length_disagreement() {
        let err = Request::write_multiple_coils(1, 0, 4, &[true, false]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    // ========================================================================
    // Response decoding
    // ========================================================================

    #[test]
    fn test_decode_read_coils() {
        let req = Request::read_coils(1, 0, 4).unwrap();
        let resp = req
            .decode_response(&[0x01, 0x01, 0x01, 0x05, 0x91, 0x8B])
            .unwrap();
        assert_eq!(resp, Response::Bits(vec![true, false, true, false]));
    }

    #[test]
    fn test_decode_read_discrete_inputs() {
        let req = Request::read_discrete_inputs(1, 0, 3).unwrap();
        let bits = req
            .decode_response(&[0x01, 0x02, 0x01, 0x03, 0xE1, 0x89])
            .unwrap()
            .into_bits()
            .unwrap();
        assert_eq!(bits, vec![true, true, false]);
    }

    #[test]
    fn test_decode_synthetic_read_recovers_values() {
        let values: Vec<bool> = (0..19).map(|i| i % 3 == 0).collect();
        let req = Request::read_coils(7, 0x0040, values.len() as u16).unwrap();
        let packed = pack_bits(&values);
        let mut payload = vec![packed.len() as u8];
        payload.extend_from_slice(&packed);
        let frame = build_frame(7, 0x01, &payload);
        assert_eq!(frame.len(), req.expected_response_len());
        assert_eq!(req.decode_response(&frame).unwrap(), Response::Bits(values));
    }

    #[test]
    fn test_decode_write_echoes() {
        let req = Request::write_single_coil(1, 0, true).unwrap();
        let echo = req.encode();
        assert_eq!(
            req.decode_response(&echo).unwrap(),
            Response::CoilWritten {
                address: 0,
                value: true
            }
        );

        let req = Request::write_multiple_coils(1, 0, 4, &[true; 4]).unwrap();
        let echo = [0x01, 0x0F, 0x00, 0x00, 0x00, 0x04, 0x54, 0x08];
        assert_eq!(
            req.decode_response(&echo).unwrap(),
            Response::CoilsWritten { start: 0, count: 4 }
        );
    }

    #[test]
    fn test_decode_rejects_bad_crc() {
        let req = Request::read_coils(1, 0, 4).unwrap();
        let err = frame_error(req.decode_response(&[0x01, 0x01, 0x01, 0x05, 0x91, 0x8C]));
        assert_eq!(
            err,
            FrameError::CrcMismatch {
                expected: 0x8B91,
                actual: 0x8C91
            }
        );
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let req = Request::read_coils(1, 0, 4).unwrap();
        let err = frame_error(req.decode_response(&[0x01, 0x01, 0x00]));
        assert_eq!(err, FrameError::TooShort { len: 3, min: 4 });
    }

    #[test]
    fn test_decode_rejects_wrong_slave() {
        let req = Request::read_coils(2, 0, 4).unwrap();
        let err = frame_error(req.decode_response(&[0x01, 0x01, 0x01, 0x05, 0x91, 0x8B]));
        assert_eq!(
            err,
            FrameError::SlaveMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_decode_rejects_wrong_function() {
        let req = Request::read_discrete_inputs(1, 0, 4).unwrap();
        let err = frame_error(req.decode_response(&[0x01, 0x01, 0x01, 0x05, 0x91, 0x8B]));
        assert_eq!(
            err,
            FrameError::FunctionMismatch {
                expected: 0x02,
                actual: 0x01
            }
        );
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let req = Request::read_coils(1, 0, 9).unwrap();
        let err = frame_error(req.decode_response(&[0x01, 0x01, 0x01, 0x05, 0x91, 0x8B]));
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                expected: 7,
                actual: 6
            }
        );
    }

    #[test]
    fn test_decode_rejects_byte_count() {
        let req = Request::read_coils(1, 0, 4).unwrap();
        let frame = build_frame(1, 0x01, &[0x02, 0x05]);
        assert_eq!(
            frame_error(req.decode_response(&frame)),
            FrameError::ByteCountMismatch {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_decode_rejects_echo_mismatch() {
        let req = Request::write_single_coil(1, 3, true).unwrap();
        let frame = build_frame(1, 0x05, &[0x00, 0x03, 0x00, 0x00]);
        assert_eq!(
            frame_error(req.decode_response(&frame)),
            FrameError::EchoMismatch {
                field: "value",
                expected: 0xFF00,
                actual: 0x0000
            }
        );
    }

    #[test]
    fn test_decode_exception() {
        let req = Request::read_coils(1, 0, 4).unwrap();
        let err = req
            .decode_response(&[0x01, 0x81, 0x02, 0xC1, 0x91])
            .unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Exception {
                function: 0x01,
                code: 0x02
            }
        ));
        assert_eq!(err.kind(), ErrorKind::DeviceException);
    }

    // ========================================================================
    // Bit packing
    // ========================================================================

    #[test]
    fn test_pack_bits_lsb_first() {
        assert_eq!(pack_bits(&[true, false, true, true]), vec![0x0D]);
        let mut nine = vec![false; 9];
        nine[8] = true;
        assert_eq!(pack_bits(&nine), vec![0x00, 0x01]);
        assert!(pack_bits(&[]).is_empty());
    }

    #[test]
    fn test_unpack_bits_ignores_padding() {
        assert_eq!(unpack_bits(&[0xFF], 3), vec![true, true, true]);
        assert_eq!(unpack_bits(&[0x80, 0x01], 9)[7..], [true, true]);
    }

    #[test]
    fn test_function_code_lookup() {
        assert_eq!(FunctionCode::from_u8(0x0F), Some(FunctionCode::WriteMultipleCoils));
        assert_eq!(FunctionCode::from_u8(0x03), None);
        assert_eq!(FunctionCode::ReadCoils.code(), 0x01);
    }
}
