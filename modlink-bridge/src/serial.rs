//! Serial-backed slave context.
//!
//! RTU framing has no multiplexing: the line carries exactly one outstanding
//! transaction. All access to the transport therefore goes through a single
//! async mutex, and every transaction is bounded by the configured timeout so
//! a silent slave cannot hold the line forever.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

use crate::config::SerialSettings;
use crate::context::{ContextError, FunctionCode, range_fits};

/// Full 16-bit register address space.
const ADDRESS_SPACE: u32 = 0x1_0000;

/// One request/response exchange with a slave.
///
/// Implementations are only ever called by one task at a time.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read `count` values starting at `address`.
    async fn read(
        &mut self,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError>;

    /// Write `values` starting at `address`.
    async fn write(
        &mut self,
        function: FunctionCode,
        address: u16,
        values: &[u16],
    ) -> Result<(), ContextError>;
}

/// Modbus RTU client over a serial port.
pub struct RtuTransport {
    ctx: Context,
}

impl RtuTransport {
    /// Open the serial port and attach an RTU client to it.
    pub fn open(settings: &SerialSettings) -> Result<Self, ContextError> {
        let parity = match settings.parity.to_lowercase().as_str() {
            "none" => tokio_serial::Parity::None,
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            other => {
                return Err(ContextError::Transport(format!("Invalid parity '{}'", other)));
            }
        };

        let stop_bits = match settings.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(&settings.port, settings.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits);

        let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ContextError::Transport(format!("Serial open failed on {}: {}", settings.port, e))
        })?;

        Ok(Self {
            ctx: rtu::attach_slave(serial, Slave(settings.unit_id)),
        })
    }
}

/// Flatten the nested tokio-modbus result into a context error.
fn flatten<T>(result: tokio_modbus::Result<T>) -> Result<T, ContextError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(code)) => Err(ContextError::Exception(code)),
        Err(e) => Err(ContextError::Transport(e.to_string())),
    }
}

fn bits_to_words(bits: Vec<bool>) -> Vec<u16> {
    bits.into_iter().map(u16::from).collect()
}

fn words_to_bits(words: &[u16]) -> Result<Vec<bool>, ContextError> {
    words
        .iter()
        .map(|word| match word {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ContextError::IllegalValue(format!(
                "coil value must be 0 or 1, got {}",
                other
            ))),
        })
        .collect()
}

#[async_trait]
impl RegisterTransport for RtuTransport {
    async fn read(
        &mut self,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError> {
        match function {
            FunctionCode::ReadCoils => {
                flatten(self.ctx.read_coils(address, count).await).map(bits_to_words)
            }
            FunctionCode::ReadDiscreteInputs => {
                flatten(self.ctx.read_discrete_inputs(address, count).await).map(bits_to_words)
            }
            FunctionCode::ReadHoldingRegisters => {
                flatten(self.ctx.read_holding_registers(address, count).await)
            }
            FunctionCode::ReadInputRegisters => {
                flatten(self.ctx.read_input_registers(address, count).await)
            }
            other => Err(ContextError::IllegalFunction(format!(
                "function 0x{:02X} is not a read",
                other.code()
            ))),
        }
    }

    async fn write(
        &mut self,
        function: FunctionCode,
        address: u16,
        values: &[u16],
    ) -> Result<(), ContextError> {
        match (function, values) {
            (FunctionCode::WriteSingleRegister, [value]) => {
                flatten(self.ctx.write_single_register(address, *value).await)
            }
            (FunctionCode::WriteMultipleRegisters, values) => {
                flatten(self.ctx.write_multiple_registers(address, values).await)
            }
            (FunctionCode::WriteSingleCoil, [value]) => {
                let coil = words_to_bits(std::slice::from_ref(value))?[0];
                flatten(self.ctx.write_single_coil(address, coil).await)
            }
            (FunctionCode::WriteMultipleCoils, values) => {
                let coils = words_to_bits(values)?;
                flatten(self.ctx.write_multiple_coils(address, &coils).await)
            }
            (FunctionCode::WriteSingleRegister | FunctionCode::WriteSingleCoil, values) => {
                Err(ContextError::IllegalValue(format!(
                    "single write expects one value, got {}",
                    values.len()
                )))
            }
            (other, _) => Err(ContextError::IllegalFunction(format!(
                "function 0x{:02X} is not a write",
                other.code()
            ))),
        }
    }
}

/// Slave context forwarding every request to a serial slave.
pub struct SerialContext {
    transport: Mutex<Box<dyn RegisterTransport>>,
    timeout: Duration,
    address_limit: u32,
}

impl SerialContext {
    /// Wrap a transport; `timeout` bounds each transaction.
    pub fn new(transport: Box<dyn RegisterTransport>, timeout: Duration) -> Self {
        Self {
            transport: Mutex::new(transport),
            timeout,
            address_limit: ADDRESS_SPACE,
        }
    }

    /// Open the RTU transport described by `settings`.
    pub fn open(settings: &SerialSettings) -> Result<Self, ContextError> {
        let transport = RtuTransport::open(settings)?;
        let mut ctx = Self::new(Box::new(transport), settings.timeout());
        if let Some(limit) = settings.address_limit {
            ctx = ctx.with_address_limit(limit);
        }
        Ok(ctx)
    }

    /// Reject requests reaching past `limit` before they hit the line.
    pub fn with_address_limit(mut self, limit: u32) -> Self {
        self.address_limit = limit.min(ADDRESS_SPACE);
        self
    }

    /// Per-transaction timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn validate(&self, _function: FunctionCode, address: u16, count: u16) -> bool {
        range_fits(address, count, self.address_limit)
    }

    pub async fn get_values(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError> {
        let mut transport = self.transport.lock().await;
        debug!(function = function.code(), address, count, "Serial read");

        match tokio::time::timeout(self.timeout, transport.read(function, address, count)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(function = function.code(), address, count, "Serial read timed out");
                Err(ContextError::Timeout(self.timeout))
            }
        }
    }

    pub async fn set_values(
        &self,
        function: FunctionCode,
        address: u16,
        values: &[u16],
    ) -> Result<(), ContextError> {
        let mut transport = self.transport.lock().await;
        debug!(function = function.code(), address, count = values.len(), "Serial write");

        match tokio::time::timeout(self.timeout, transport.write(function, address, values)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(function = function.code(), address, "Serial write timed out");
                Err(ContextError::Timeout(self.timeout))
            }
        }
    }
}
