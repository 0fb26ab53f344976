//! Fixed holding-register block.
//!
//! Used by gateways to advertise their own address: registers 0-1 hold the
//! IPv4 address encoded with the shared advertisement order.

use std::net::Ipv4Addr;

use parking_lot::RwLock;

use modlink_common::{ADDRESS_REGISTER, encode_ipv4};

use crate::context::{ContextError, FunctionCode, range_fits};

/// A contiguous block of holding registers starting at `start`.
#[derive(Debug)]
pub struct RegisterBlock {
    start: u16,
    values: RwLock<Vec<u16>>,
}

impl RegisterBlock {
    pub fn new(start: u16, values: Vec<u16>) -> Self {
        Self {
            start,
            values: RwLock::new(values),
        }
    }

    /// Block advertising `address` in the address registers.
    pub fn advertising(address: Ipv4Addr) -> Self {
        Self::new(ADDRESS_REGISTER, encode_ipv4(address).to_vec())
    }

    /// Number of registers in the block.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Only holding-register functions are served.
    pub fn supports(function: FunctionCode) -> bool {
        matches!(
            function,
            FunctionCode::ReadHoldingRegisters
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleRegisters
        )
    }

    fn offset(&self, function: FunctionCode, address: u16, count: u16) -> Result<usize, ContextError> {
        if !Self::supports(function) {
            return Err(ContextError::IllegalFunction(format!(
                "register block only serves holding registers, got 0x{:02X}",
                function.code()
            )));
        }

        if address < self.start {
            return Err(ContextError::IllegalAddress { address, count });
        }

        let offset = address - self.start;
        let end = self.start as u32 + self.len() as u32;
        if !range_fits(address, count, end) {
            return Err(ContextError::IllegalAddress { address, count });
        }

        Ok(offset as usize)
    }

    pub fn validate(&self, function: FunctionCode, address: u16, count: u16) -> bool {
        self.offset(function, address, count).is_ok()
    }

    pub fn get_values(
        &self,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError> {
        let offset = self.offset(function, address, count)?;
        let values = self.values.read();
        Ok(values[offset..offset + count as usize].to_vec())
    }

    pub fn set_values(
        &self,
        function: FunctionCode,
        address: u16,
        values: &[u16],
    ) -> Result<(), ContextError> {
        let count = u16::try_from(values.len())
            .map_err(|_| ContextError::IllegalValue(format!("{} values", values.len())))?;
        let offset = self.offset(function, address, count)?;

        let mut block = self.values.write();
        block[offset..offset + values.len()].copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlink_common::decode_ipv4;

    #[test]
    fn test_advertising_block() {
        let addr = Ipv4Addr::new(10, 8, 0, 6);
        let block = RegisterBlock::advertising(addr);

        let words = block
            .get_values(FunctionCode::ReadHoldingRegisters, 0, 2)
            .unwrap();
        assert_eq!(decode_ipv4([words[0], words[1]]), addr);
    }

    #[test]
    fn test_out_of_range_reads() {
        let block = RegisterBlock::new(0, vec![1, 2, 3]);

        assert!(block.validate(FunctionCode::ReadHoldingRegisters, 1, 2));
        assert!(!block.validate(FunctionCode::ReadHoldingRegisters, 2, 2));
        assert!(matches!(
            block.get_values(FunctionCode::ReadHoldingRegisters, 3, 1),
            Err(ContextError::IllegalAddress { .. })
        ));
    }

    #[test]
    fn test_offset_start() {
        let block = RegisterBlock::new(100, vec![7, 8]);

        assert!(!block.validate(FunctionCode::ReadHoldingRegisters, 99, 1));
        assert_eq!(
            block
                .get_values(FunctionCode::ReadHoldingRegisters, 101, 1)
                .unwrap(),
            vec![8]
        );
    }

    #[test]
    fn test_writes_inside_block() {
        let block = RegisterBlock::new(0, vec![0; 4]);

        block
            .set_values(FunctionCode::WriteMultipleRegisters, 1, &[5, 6])
            .unwrap();
        assert_eq!(
            block
                .get_values(FunctionCode::ReadHoldingRegisters, 0, 4)
                .unwrap(),
            vec![0, 5, 6, 0]
        );
        assert!(
            block
                .set_values(FunctionCode::WriteSingleRegister, 4, &[1])
                .is_err()
        );
    }

    #[test]
    fn test_rejects_other_functions() {
        let block = RegisterBlock::new(0, vec![0; 2]);
        assert!(matches!(
            block.get_values(FunctionCode::ReadInputRegisters, 0, 1),
            Err(ContextError::IllegalFunction(_))
        ));
    }
}
