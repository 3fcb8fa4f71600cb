//! Modbus RTU master for USB relay/input modules
//!
//! ```text
//! relay-modbus
//!     ├── crc       CRC-16/MODBUS calculate / verify
//!     ├── frame     request builders, response validation (FC01/02/05/15)
//!     ├── engine    TransactionEngine: one exchange, one timeout, no retry
//!     ├── serial    serial line settings and opener
//!     └── types     SlaveId, DeviceLayout, RelayState / InputState
//! ```
//!
//! The engine assumes exclusive use of its channel. Serializing access
//! between concurrent callers is left to the owner of the engine.

pub mod constants;
pub mod crc;
pub mod engine;
pub mod error;
pub mod frame;
pub mod serial;
pub mod types;

pub use engine::{TransactionEngine, TransactionState};
pub use error::{exception_description, ErrorKind, FrameError, ModbusError, Result};
pub use frame::{FunctionCode, Request, Response};
pub use serial::{open_serial, Parity, SerialParams};
pub use types::{DeviceLayout, InputState, RelayState, SlaveId};
