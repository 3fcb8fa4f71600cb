//! Relay daemon library
//!
//! ```text
//! sessions ──┐
//!            ├──> SerializerHandle ──mpsc──> worker ──> TransactionEngine ──> serial
//! poller ────┘                                 │
//!                                              └──> StateCache <── status
//! ```

pub mod bootstrap;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod serializer;
pub mod server;
pub mod session;

pub use cache::{DeviceSnapshot, StateCache};
pub use client::{ClientSession, DaemonClient};
pub use config::RelaydConfig;
pub use context::DaemonContext;
pub use error::{ErrorKind, RelayError, Result};
pub use protocol::{ResponseData, SessionRequest, SessionResponse};
pub use serializer::{Operation, Outcome, SerializerHandle};
pub use server::SessionServer;
