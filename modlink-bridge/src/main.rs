//! Modbus TCP to RTU bridge.
//!
//! Exposes a serial Modbus RTU slave (or a synthetic/advertising register
//! space) as a Modbus TCP server.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use modlink_bridge::config::{BridgeServiceConfig, ContextConfig, SerialSettings};
use modlink_bridge::{BridgeServer, SlaveContext};
use modlink_service_framework::{ServiceArgs, ServiceConfig, ServiceRunner};
use tracing::info;

/// Modbus TCP server bridging requests to a serial RTU slave.
#[derive(Parser, Debug)]
#[command(name = "modlink-bridge")]
#[command(about = "Bridges Modbus TCP requests to a serial RTU slave")]
#[command(version)]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,

    /// Serial device path
    #[arg(long = "serial-port", env = "SERIAL_PORT")]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long, env = "SERIAL_BAUD")]
    baud: Option<u32>,

    /// Serial response timeout in seconds
    #[arg(long, env = "SERIAL_TIMEOUT")]
    timeout: Option<u64>,

    /// Generate random values on reads instead of bridging; writes are rejected
    #[arg(long, env = "DUMMY", conflicts_with = "advertise")]
    dummy: bool,

    /// Serve a register block advertising this IPv4 address
    #[arg(long, env = "ADVERTISE_ADDRESS")]
    advertise: Option<Ipv4Addr>,

    /// Listen address (default 0.0.0.0:5020)
    #[arg(long, env = "LISTEN_ADDRESS")]
    listen: Option<SocketAddr>,
}

impl Args {
    fn config_path(&self) -> Option<&PathBuf> {
        self.service.config.as_ref()
    }

    /// Apply CLI/environment overrides on top of the loaded configuration.
    fn apply(&self, config: &mut BridgeServiceConfig) {
        if let Some(listen) = self.listen {
            config.bridge.listen = listen;
        }

        if self.dummy {
            config.bridge.context = ContextConfig::Synthetic;
        } else if let Some(address) = self.advertise {
            config.bridge.context = ContextConfig::Advertise { address };
        } else if self.serial_port.is_some() || self.baud.is_some() || self.timeout.is_some() {
            let mut serial = match &config.bridge.context {
                ContextConfig::Serial(serial) => serial.clone(),
                _ => SerialSettings::default(),
            };
            if let Some(port) = &self.serial_port {
                serial.port = port.clone();
            }
            if let Some(baud) = self.baud {
                serial.baud_rate = baud;
            }
            if let Some(timeout) = self.timeout {
                serial.timeout_ms = timeout.saturating_mul(1000);
            }
            config.bridge.context = ContextConfig::Serial(serial);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BridgeServiceConfig::load_or_default(args.config_path().map(|p| p.as_path()))
        .with_context(|| format!("Failed to load config from {:?}", args.config_path()))?;
    args.apply(&mut config);
    config.validate().context("Invalid bridge configuration")?;

    let mut runner = ServiceRunner::new_with_args("modlink-bridge", config, Some(&args.service))
        .map_err(|e| anyhow::anyhow!("Failed to start service: {}", e))?;

    let bridge = runner.config().bridge.clone();
    match &bridge.context {
        ContextConfig::Serial(serial) => info!(
            port = %serial.port,
            baud_rate = serial.baud_rate,
            timeout_ms = serial.timeout_ms,
            "Starting in bridging mode, requests are passed to the serial slave"
        ),
        ContextConfig::Synthetic => info!(
            "Starting in dummy mode, reads return random values and writes are not supported"
        ),
        ContextConfig::Advertise { address } => {
            info!(%address, "Starting in advertise mode")
        }
    }

    let context = SlaveContext::from_config(&bridge.context)
        .with_context(|| format!("Failed to set up {} context", bridge.context.mode()))?;
    let server = BridgeServer::bind(bridge.listen, Arc::new(context))
        .await
        .with_context(|| format!("Failed to bind {}", bridge.listen))?;

    runner.spawn_with_error("modbus-tcp-server".to_string(), server.serve());

    runner
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Service failed: {}", e))
}
