//! Shared helpers for the relay daemon workspace
//!
//! - logging bootstrap with the bracketed console format
//! - shutdown signal handling
//! - hex rendering of wire frames

pub mod hex;
pub mod logging;
pub mod shutdown;

pub use logging::{init_with_config, parse_level, LogConfig, LoggingError};
pub use shutdown::{cancel_on_signal, wait_for_shutdown};
