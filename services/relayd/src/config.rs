//! Daemon configuration
//!
//! Layering, lowest to highest priority:
//! 1. built-in defaults
//! 2. YAML file passed with `--config`
//! 3. `RELAYD_` environment variables, `__` between section and key
//!    (`RELAYD_SERIAL__PORT=/dev/ttyUSB1`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use relay_modbus::constants::MAX_WRITE_BITS;
use relay_modbus::{DeviceLayout, SerialParams};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RelayError, Result};

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "RELAYD_";

/// Device addressing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    #[serde(default = "default_channel_count")]
    pub relay_count: u16,
    #[serde(default = "default_channel_count")]
    pub input_count: u16,
    #[serde(default)]
    pub relay_start_address: u16,
    #[serde(default)]
    pub input_start_address: u16,
}

fn default_slave_id() -> u8 {
    1
}

fn default_channel_count() -> u16 {
    8
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            slave_id: default_slave_id(),
            relay_count: default_channel_count(),
            input_count: default_channel_count(),
            relay_start_address: 0,
            input_start_address: 0,
        }
    }
}

impl DeviceConfig {
    pub fn layout(&self) -> Result<DeviceLayout> {
        Ok(DeviceLayout::new(
            self.slave_id,
            self.relay_count,
            self.input_count,
            self.relay_start_address,
            self.input_start_address,
        )?)
    }
}

/// Session listener selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Unix domain socket where the platform has one, loopback TCP otherwise
    #[default]
    Auto,
    Unix,
    Tcp,
}

/// Timing and queueing of the daemon core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Per-transaction response deadline
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polling pauses this long after any command
    #[serde(default = "default_avoidance_window_ms")]
    pub avoidance_window_ms: u64,
    /// Re-check period while inside the avoidance window
    #[serde(default = "default_skip_slice_ms")]
    pub skip_slice_ms: u64,
    /// How long a session waits for a serializer result
    #[serde(default = "default_command_wait_ms")]
    pub command_wait_ms: u64,
    /// How long the poller waits for a snapshot
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub transport: TransportKind,
    /// Loopback port for the TCP transport, 0 lets the OS pick
    #[serde(default)]
    pub tcp_port: u16,
    /// Where the endpoint record (and the socket) live; system temp dir when unset
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_pulse_ms")]
    pub default_pulse_ms: u64,
    #[serde(default = "default_max_pulse_ms")]
    pub max_pulse_ms: u64,
}

fn default_transaction_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_avoidance_window_ms() -> u64 {
    200
}

fn default_skip_slice_ms() -> u64 {
    50
}

fn default_command_wait_ms() -> u64 {
    5000
}

fn default_poll_wait_ms() -> u64 {
    3000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_pulse_ms() -> u64 {
    1000
}

fn default_max_pulse_ms() -> u64 {
    60_000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: default_transaction_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            avoidance_window_ms: default_avoidance_window_ms(),
            skip_slice_ms: default_skip_slice_ms(),
            command_wait_ms: default_command_wait_ms(),
            poll_wait_ms: default_poll_wait_ms(),
            queue_capacity: default_queue_capacity(),
            transport: TransportKind::Auto,
            tcp_port: 0,
            runtime_dir: None,
            max_line_bytes: default_max_line_bytes(),
            default_pulse_ms: default_pulse_ms(),
            max_pulse_ms: default_max_pulse_ms(),
        }
    }
}

impl DaemonConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn avoidance_window(&self) -> Duration {
        Duration::from_millis(self.avoidance_window_ms)
    }

    pub fn skip_slice(&self) -> Duration {
        Duration::from_millis(self.skip_slice_ms)
    }

    pub fn command_wait(&self) -> Duration {
        Duration::from_millis(self.command_wait_ms)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Rolling log files go here; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
        }
    }
}

/// Complete daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaydConfig {
    #[serde(default)]
    pub serial: SerialParams,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelaydConfig {
    /// Merge defaults, the optional YAML file and the environment.
    ///
    /// Does not validate; overrides from the command line are applied by the
    /// caller before [`RelaydConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(RelaydConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(RelayError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| RelayError::config(format!("Failed to load configuration: {}", e)))
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        self.serial.validate()?;
        self.device.layout()?;

        if self.device.relay_count > MAX_WRITE_BITS {
            return Err(RelayError::config(format!(
                "device.relay_count {} exceeds batch write limit {}",
                self.device.relay_count, MAX_WRITE_BITS
            )));
        }

        let d = &self.daemon;
        for (name, value) in [
            ("transaction_timeout_ms", d.transaction_timeout_ms),
            ("poll_interval_ms", d.poll_interval_ms),
            ("skip_slice_ms", d.skip_slice_ms),
            ("command_wait_ms", d.command_wait_ms),
            ("poll_wait_ms", d.poll_wait_ms),
            ("max_pulse_ms", d.max_pulse_ms),
        ] {
            if value == 0 {
                return Err(RelayError::config(format!("daemon.{} must be > 0", name)));
            }
        }
        if d.queue_capacity == 0 {
            return Err(RelayError::config("daemon.queue_capacity must be > 0"));
        }
        if d.max_line_bytes < 64 {
            return Err(RelayError::config("daemon.max_line_bytes must be >= 64"));
        }
        if d.default_pulse_ms == 0 || d.default_pulse_ms > d.max_pulse_ms {
            return Err(RelayError::config(format!(
                "daemon.default_pulse_ms must be in 1..={}",
                d.max_pulse_ms
            )));
        }
        #[cfg(not(unix))]
        if d.transport == TransportKind::Unix {
            return Err(RelayError::config(
                "daemon.transport unix is not available on this platform",
            ));
        }

        // A snapshot is two transactions back to back
        if d.poll_wait_ms < d.transaction_timeout_ms.saturating_mul(2) {
            warn!(
                "poll_wait_ms {} < 2x transaction_timeout_ms {}: polls may be abandoned early",
                d.poll_wait_ms, d.transaction_timeout_ms
            );
        }
        if d.avoidance_window_ms >= d.poll_interval_ms {
            warn!(
                "avoidance_window_ms {} >= poll_interval_ms {}: every poll after a command is delayed",
                d.avoidance_window_ms, d.poll_interval_ms
            );
        }
        Ok(())
    }
}
