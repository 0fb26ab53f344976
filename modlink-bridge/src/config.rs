//! Configuration for the Modbus bridge.

use modlink_common::LoggingConfig;
use modlink_service_framework::{ServiceConfig, ServiceError};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the bridge listens on in this deployment.
pub const DEFAULT_BRIDGE_PORT: u16 = 5020;

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeServiceConfig {
    /// Bridge settings
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bridge server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address the Modbus TCP server binds to (default: 0.0.0.0:5020)
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Backing slave context
    #[serde(default)]
    pub context: ContextConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_BRIDGE_PORT))
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            context: ContextConfig::default(),
        }
    }
}

/// Slave context selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ContextConfig {
    /// Forward every request to a slave on a serial RTU line
    Serial(SerialSettings),
    /// Generate random register values, reject writes
    Synthetic,
    /// Serve a fixed holding-register block advertising an IPv4 address
    Advertise {
        /// Address written to registers 0-1
        address: Ipv4Addr,
    },
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::Serial(SerialSettings::default())
    }
}

impl ContextConfig {
    /// Short name of the selected mode.
    pub fn mode(&self) -> &'static str {
        match self {
            ContextConfig::Serial(_) => "serial",
            ContextConfig::Synthetic => "synthetic",
            ContextConfig::Advertise { .. } => "advertise",
        }
    }
}

/// Serial RTU line settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    #[serde(default = "default_serial_port")]
    pub port: String,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Modbus unit/slave ID on the serial line
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Response timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Highest register address (exclusive) the slave exposes, if known
    #[serde(default)]
    pub address_limit: Option<u32>,
}

fn default_serial_port() -> String {
    "/dev/ptyp0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            address_limit: None,
        }
    }
}

impl SerialSettings {
    /// Response timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ServiceConfig for BridgeServiceConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if let ContextConfig::Serial(serial) = &self.bridge.context {
            if serial.port.is_empty() {
                return Err(ServiceError::validation("Serial port cannot be empty"));
            }

            if serial.baud_rate == 0 {
                return Err(ServiceError::validation("Serial baud rate must be positive"));
            }

            if serial.timeout_ms == 0 {
                return Err(ServiceError::validation("Serial timeout must be positive"));
            }

            match serial.parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                other => {
                    return Err(ServiceError::validation(format!(
                        "Invalid parity '{}' (use none, even, or odd)",
                        other
                    )));
                }
            }

            if !matches!(serial.data_bits, 5..=8) {
                return Err(ServiceError::validation(format!(
                    "Invalid data bits {} (use 5-8)",
                    serial.data_bits
                )));
            }

            if !matches!(serial.stop_bits, 1 | 2) {
                return Err(ServiceError::validation(format!(
                    "Invalid stop bits {} (use 1 or 2)",
                    serial.stop_bits
                )));
            }
        }

        Ok(())
    }
}
