//! modlink common library
//!
//! Shared pieces of the Modbus bridge and the gateway monitor:
//!
//! - [`codec`] - 32-bit register codec and the shared address advertisement order
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod codec;
pub mod config;
pub mod error;

// Re-export commonly used types at the crate root
pub use codec::{
    ADDRESS_ORDER, ADDRESS_REGISTER, ADDRESS_REGISTER_COUNT, ByteOrder, RegisterOrder, WordOrder,
    decode_ipv4, decode_u32, decode_u32_from_slice, encode_ipv4, encode_u32, parse_ipv4,
};
pub use config::{LogFormat, LoggingConfig, parse_config};
pub use error::{Error, Result};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
