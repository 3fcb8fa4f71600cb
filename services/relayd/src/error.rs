//! Daemon error taxonomy
//!
//! Every failure that can reach a client or the exit status is classified
//! into an [`ErrorKind`] with a stable name and numeric code.

use relay_modbus::ModbusError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relay daemon error type
#[derive(Error, Debug)]
pub enum RelayError {
    /// Failures raised by the codec or the transaction engine
    #[error(transparent)]
    Modbus(#[from] ModbusError),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// A session line that is not a valid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The caller stopped waiting before the serializer answered
    #[error("Timeout: {0}")]
    WaitTimeout(String),

    /// Serializer stopped or draining
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// A panic captured inside the serializer worker
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-visible failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    Timeout,
    FrameValidation,
    DeviceException,
    TransportUnavailable,
    BadRequest,
    Internal,
}

impl ErrorKind {
    /// Response and exit code
    pub fn code(self) -> u8 {
        match self {
            Self::Internal => 1,
            Self::InvalidArgument => 2,
            Self::Timeout => 3,
            Self::FrameValidation => 4,
            Self::DeviceException => 5,
            Self::TransportUnavailable => 6,
            Self::BadRequest => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Timeout => "timeout",
            Self::FrameValidation => "frame_validation",
            Self::DeviceException => "device_exception",
            Self::TransportUnavailable => "transport_unavailable",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        }
    }
}

impl From<relay_modbus::ErrorKind> for ErrorKind {
    fn from(kind: relay_modbus::ErrorKind) -> Self {
        match kind {
            relay_modbus::ErrorKind::InvalidArgument => Self::InvalidArgument,
            relay_modbus::ErrorKind::Timeout => Self::Timeout,
            relay_modbus::ErrorKind::FrameValidation => Self::FrameValidation,
            relay_modbus::ErrorKind::DeviceException => Self::DeviceException,
            relay_modbus::ErrorKind::TransportUnavailable => Self::TransportUnavailable,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::Modbus(ModbusError::invalid_argument(msg))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Modbus(e) => e.kind().into(),
            Self::Config(_) => ErrorKind::InvalidArgument,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::WaitTimeout(_) => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::TransportUnavailable,
            Self::Internal(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for the relay daemon
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use relay_modbus::FrameError;
    use std::time::Duration;

    #[test]
    fn test_modbus_kinds_pass_through() {
        let timeout = RelayError::from(ModbusError::Timeout {
            after: Duration::from_millis(10),
            received: 0,
        });
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let garbled = RelayError::from(ModbusError::from(FrameError::TooShort { len: 2, min: 4 }));
        assert_eq!(garbled.kind(), ErrorKind::FrameValidation);
        assert_ne!(timeout.kind().code(), garbled.kind().code());
    }

    #[test]
    fn test_daemon_kinds() {
        assert_eq!(
            RelayError::unavailable("shutting down").kind(),
            ErrorKind::TransportUnavailable
        );
        assert_eq!(RelayError::bad_request("x").kind(), ErrorKind::BadRequest);
        assert_eq!(
            RelayError::WaitTimeout("x".into()).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(RelayError::Internal("boom".into()).kind().code(), 1);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::FrameValidation).unwrap();
        assert_eq!(json, "\"frame_validation\"");
        assert_eq!(ErrorKind::DeviceException.to_string(), "device_exception");
    }
}
