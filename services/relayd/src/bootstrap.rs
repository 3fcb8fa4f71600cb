//! Command line and logging bootstrap

use std::path::PathBuf;

use clap::Parser;
use common::logging::{self, LogConfig};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::RelaydConfig;
use crate::error::{RelayError, Result};

/// Command-line arguments for relayd
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relayd",
    version = env!("CARGO_PKG_VERSION"),
    about = "USB relay module daemon (Modbus RTU master)",
    long_about = None
)]
pub struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Serial port; overrides serial.port
    #[arg(short = 'p', long)]
    pub port: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - print the merged configuration and exit
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut RelaydConfig) {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

/// Initialize logging; hold the returned guard until exit so file output flushes
pub fn initialize_logging(args: &Args, config: &RelaydConfig) -> Result<Option<WorkerGuard>> {
    let log_config = LogConfig {
        service_name: "relayd".to_string(),
        log_dir: config.logging.dir.clone(),
        level: logging::parse_level(&config.logging.level),
        enable_json: config.logging.json,
        ansi: !args.no_color,
    };

    logging::init_with_config(&log_config)
        .map_err(|e| RelayError::config(format!("Failed to init logging: {}", e)))
}
