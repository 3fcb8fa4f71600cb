//! Serial line settings and opener

use serde::{Deserialize, Serialize};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{error, info};

use crate::error::{ModbusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Line settings for one USB serial adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
        }
    }
}

impl SerialParams {
    /// Reject settings the UART cannot express
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(ModbusError::invalid_argument("serial port is empty"));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::invalid_argument("baud rate must be > 0"));
        }
        data_bits(self.data_bits)?;
        stop_bits(self.stop_bits)?;
        Ok(())
    }
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(ModbusError::invalid_argument(format!(
            "data bits {} not in 5..=8",
            other
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(ModbusError::invalid_argument(format!(
            "stop bits {} not 1 or 2",
            other
        ))),
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

/// Open the port for async use.
///
/// Failure to open is `TransportUnavailable`: nothing can be sent.
pub fn open_serial(params: &SerialParams) -> Result<SerialStream> {
    params.validate()?;

    match tokio_serial::new(&params.port, params.baud_rate)
        .data_bits(data_bits(params.data_bits)?)
        .parity(parity(params.parity))
        .stop_bits(stop_bits(params.stop_bits)?)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
    {
        Ok(stream) => {
            info!("RTU opened: {} @{}baud", params.port, params.baud_rate);
            Ok(stream)
        },
        Err(e) => {
            error!("RTU err: {} - {}", params.port, e);
            Err(ModbusError::transport_unavailable(format!(
                "cannot open {}: {}",
                params.port, e
            )))
        },
    }
}
