//! Slave contexts backing the bridge's register space.
//!
//! A [`SlaveContext`] is one of:
//! - [`SerialContext`] - forwards every request to an RTU slave, one transaction at a time
//! - [`SyntheticContext`] - fabricates register values, rejects writes
//! - [`RegisterBlock`] - a fixed block of holding registers (address advertisement)

use std::time::Duration;

use thiserror::Error;
use tokio_modbus::ExceptionCode;

use crate::block::RegisterBlock;
use crate::config::ContextConfig;
use crate::serial::SerialContext;
use crate::synthetic::SyntheticContext;

/// Modbus function codes understood by the slave contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    /// Numeric function code as sent on the wire.
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
            FunctionCode::WriteSingleCoil => 0x05,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::WriteMultipleCoils => 0x0F,
            FunctionCode::WriteMultipleRegisters => 0x10,
        }
    }

    /// Look up a function code by its numeric value.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(FunctionCode::ReadCoils),
            0x02 => Some(FunctionCode::ReadDiscreteInputs),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x0F => Some(FunctionCode::WriteMultipleCoils),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Whether this function reads data.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    /// Largest quantity a single request may carry.
    pub fn max_quantity(self) -> u16 {
        match self {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => 2000,
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => 125,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => 1,
            FunctionCode::WriteMultipleCoils => 1968,
            FunctionCode::WriteMultipleRegisters => 123,
        }
    }

    /// Whether this function addresses single-bit coils or inputs.
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::WriteSingleCoil
                | FunctionCode::WriteMultipleCoils
        )
    }
}

/// Errors raised while serving a request from a slave context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Illegal function: {0}")]
    IllegalFunction(String),

    #[error("Illegal data address: {address} (count {count})")]
    IllegalAddress { address: u16, count: u16 },

    #[error("Illegal data value: {0}")]
    IllegalValue(String),

    #[error("Serial transport error: {0}")]
    Transport(String),

    #[error("Serial request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Slave returned exception: {0:?}")]
    Exception(ExceptionCode),
}

impl ContextError {
    /// Exception code reported back to the Modbus TCP client.
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            ContextError::Unsupported(_) | ContextError::IllegalFunction(_) => {
                ExceptionCode::IllegalFunction
            }
            ContextError::IllegalAddress { .. } => ExceptionCode::IllegalDataAddress,
            ContextError::IllegalValue(_) => ExceptionCode::IllegalDataValue,
            ContextError::Exception(code) => *code,
            ContextError::Transport(_) | ContextError::Timeout(_) => {
                ExceptionCode::ServerDeviceFailure
            }
        }
    }
}

/// The register space served by the bridge.
pub enum SlaveContext {
    Serial(SerialContext),
    Synthetic(SyntheticContext),
    Block(RegisterBlock),
}

impl SlaveContext {
    /// Build the context selected by the configuration.
    ///
    /// Opens the serial port in serial mode; failing to open it is fatal for
    /// the bridge.
    pub fn from_config(config: &ContextConfig) -> Result<Self, ContextError> {
        match config {
            ContextConfig::Serial(settings) => SerialContext::open(settings).map(Self::Serial),
            ContextConfig::Synthetic => Ok(Self::Synthetic(SyntheticContext::new())),
            ContextConfig::Advertise { address } => {
                Ok(Self::Block(RegisterBlock::advertising(*address)))
            }
        }
    }

    /// Short name of the active variant.
    pub fn mode(&self) -> &'static str {
        match self {
            SlaveContext::Serial(_) => "serial",
            SlaveContext::Synthetic(_) => "synthetic",
            SlaveContext::Block(_) => "block",
        }
    }

    /// Whether the context serves `function` at all.
    pub fn supports(&self, function: FunctionCode) -> bool {
        match self {
            SlaveContext::Serial(_) | SlaveContext::Synthetic(_) => true,
            SlaveContext::Block(_) => RegisterBlock::supports(function),
        }
    }

    /// Check a request's address range before it is executed.
    pub fn validate(&self, function: FunctionCode, address: u16, count: u16) -> bool {
        match self {
            SlaveContext::Serial(ctx) => ctx.validate(function, address, count),
            SlaveContext::Synthetic(_) => true,
            SlaveContext::Block(block) => block.validate(function, address, count),
        }
    }

    /// Read `count` values starting at `address`.
    ///
    /// Coils and discrete inputs are returned as 0/1 words.
    pub async fn get_values(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError> {
        match self {
            SlaveContext::Serial(ctx) => ctx.get_values(function, address, count).await,
            SlaveContext::Synthetic(ctx) => Ok(ctx.get_values(function, address, count)),
            SlaveContext::Block(block) => block.get_values(function, address, count),
        }
    }

    /// Write `values` starting at `address`.
    pub async fn set_values(
        &self,
        function: FunctionCode,
        address: u16,
        values: &[u16],
    ) -> Result<(), ContextError> {
        match self {
            SlaveContext::Serial(ctx) => ctx.set_values(function, address, values).await,
            SlaveContext::Synthetic(ctx) => ctx.set_values(function, address, values),
            SlaveContext::Block(block) => block.set_values(function, address, values),
        }
    }
}

impl From<SerialContext> for SlaveContext {
    fn from(ctx: SerialContext) -> Self {
        SlaveContext::Serial(ctx)
    }
}

impl From<SyntheticContext> for SlaveContext {
    fn from(ctx: SyntheticContext) -> Self {
        SlaveContext::Synthetic(ctx)
    }
}

impl From<RegisterBlock> for SlaveContext {
    fn from(block: RegisterBlock) -> Self {
        SlaveContext::Block(block)
    }
}

/// Whether `address..address + count` is non-empty and ends at or below `limit`.
pub(crate) fn range_fits(address: u16, count: u16, limit: u32) -> bool {
    count > 0 && address as u32 + count as u32 <= limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_round_trip() {
        for code in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10] {
            let function = FunctionCode::from_code(code).unwrap();
            assert_eq!(function.code(), code);
        }
        assert_eq!(FunctionCode::from_code(0x2B), None);
    }

    #[test]
    fn test_function_code_classes() {
        assert!(FunctionCode::ReadHoldingRegisters.is_read());
        assert!(!FunctionCode::WriteSingleRegister.is_read());
        assert!(FunctionCode::WriteMultipleCoils.is_bit_access());
        assert!(!FunctionCode::ReadInputRegisters.is_bit_access());
    }

    #[test]
    fn test_max_quantity() {
        assert_eq!(FunctionCode::ReadHoldingRegisters.max_quantity(), 125);
        assert_eq!(FunctionCode::ReadCoils.max_quantity(), 2000);
        assert_eq!(FunctionCode::WriteMultipleRegisters.max_quantity(), 123);
        assert_eq!(FunctionCode::WriteMultipleCoils.max_quantity(), 1968);
    }

    #[test]
    fn test_block_supports_holding_registers_only() {
        let context = SlaveContext::from(RegisterBlock::new(0, vec![0; 2]));
        assert!(context.supports(FunctionCode::ReadHoldingRegisters));
        assert!(context.supports(FunctionCode::WriteMultipleRegisters));
        assert!(!context.supports(FunctionCode::ReadInputRegisters));
        assert!(!context.supports(FunctionCode::ReadCoils));

        let context = SlaveContext::from(SyntheticContext::new());
        assert!(context.supports(FunctionCode::ReadInputRegisters));
    }

    #[test]
    fn test_exception_mapping() {
        assert_eq!(
            ContextError::Unsupported("write".into()).exception_code(),
            ExceptionCode::IllegalFunction
        );
        assert_eq!(
            ContextError::IllegalAddress {
                address: 10,
                count: 2
            }
            .exception_code(),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            ContextError::IllegalValue("coil".into()).exception_code(),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            ContextError::Timeout(Duration::from_secs(1)).exception_code(),
            ExceptionCode::ServerDeviceFailure
        );
        assert_eq!(
            ContextError::Exception(ExceptionCode::ServerDeviceBusy).exception_code(),
            ExceptionCode::ServerDeviceBusy
        );
    }

    #[test]
    fn test_range_fits() {
        assert!(range_fits(0, 2, 0x1_0000));
        assert!(range_fits(0xFFFE, 2, 0x1_0000));
        assert!(!range_fits(0xFFFF, 2, 0x1_0000));
        assert!(!range_fits(0, 0, 0x1_0000));
        assert!(!range_fits(8, 4, 10));
    }
}
