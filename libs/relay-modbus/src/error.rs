//! Error types for the RTU master

use std::time::Duration;

use thiserror::Error;

/// Why a received frame was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Frame too short: {len}B (min {min}B)")]
    TooShort { len: usize, min: usize },

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Slave mismatch: sent {expected}, got {actual}")]
    SlaveMismatch { expected: u8, actual: u8 },

    #[error("Function mismatch: sent 0x{expected:02X}, got 0x{actual:02X}")]
    FunctionMismatch { expected: u8, actual: u8 },

    #[error("Length mismatch: expected {expected}B, got {actual}B")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Byte count mismatch: expected {expected}, got {actual}")]
    ByteCountMismatch { expected: usize, actual: usize },

    #[error("Echo mismatch on {field}: expected 0x{expected:04X}, got 0x{actual:04X}")]
    EchoMismatch {
        field: &'static str,
        expected: u16,
        actual: u16,
    },
}

/// Failure of a single Modbus operation
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Rejected before any byte was written
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout after {}ms ({received}B received)", .after.as_millis())]
    Timeout { after: Duration, received: usize },

    #[error("Invalid response: {0}")]
    Frame(#[from] FrameError),

    #[error("Device exception 0x{code:02X} ({}) for FC 0x{function:02X}", describe(.code))]
    Exception { function: u8, code: u8 },

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Serial I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Timeout,
    FrameValidation,
    DeviceException,
    TransportUnavailable,
}

impl ModbusError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn transport_unavailable(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    /// An I/O failure on the channel means the channel is gone
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Frame(_) => ErrorKind::FrameValidation,
            Self::Exception { .. } => ErrorKind::DeviceException,
            Self::TransportUnavailable(_) | Self::Io(_) => ErrorKind::TransportUnavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModbusError>;

fn describe(code: &u8) -> &'static str {
    exception_description(*code)
}

/// Standard exception code names
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
