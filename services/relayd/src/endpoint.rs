//! Endpoint record
//!
//! The daemon advertises where it listens in a small JSON file under the
//! runtime directory, named after the serial port it owns. Clients read it
//! to connect without knowing which transport was chosen.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

/// Where a session can connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Endpoint {
    Unix { path: PathBuf },
    Tcp { address: SocketAddr },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
            Self::Tcp { address } => write!(f, "tcp:{}", address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub pid: u32,
    pub serial_port: String,
    pub started_at: DateTime<Utc>,
}

/// `/dev/ttyUSB0` -> `_dev_ttyUSB0`
pub fn sanitize_port(port: &str) -> String {
    port.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            other => other,
        })
        .collect()
}

pub fn record_path(runtime_dir: &Path, serial_port: &str) -> PathBuf {
    runtime_dir.join(format!("relayd_{}.json", sanitize_port(serial_port)))
}

pub fn socket_path(runtime_dir: &Path, serial_port: &str) -> PathBuf {
    runtime_dir.join(format!("relayd_{}.sock", sanitize_port(serial_port)))
}

impl EndpointRecord {
    pub fn new(endpoint: Endpoint, serial_port: &str) -> Self {
        Self {
            endpoint,
            pid: std::process::id(),
            serial_port: serial_port.to_string(),
            started_at: Utc::now(),
        }
    }

    /// Write via a temp file and rename so readers never see a partial record
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| RelayError::Internal(format!("endpoint record: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        debug!("Endpoint record: {}", path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            RelayError::unavailable(format!("no daemon record at {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            RelayError::unavailable(format!("corrupt daemon record {}: {}", path.display(), e))
        })
    }
}

/// Remove a file if present; cleanup never fails shutdown
pub fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
    }
}
