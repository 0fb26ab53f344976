//! Synthetic slave context for exercising the bridge without hardware.

use rand::Rng;
use tracing::debug;

use crate::context::{ContextError, FunctionCode};

/// Fabricates a fresh random byte value for every register read.
///
/// Holds no state. Writes are rejected with [`ContextError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticContext;

impl SyntheticContext {
    pub fn new() -> Self {
        Self
    }

    /// Return `count` random values in `0..=255`.
    pub fn get_values(&self, function: FunctionCode, address: u16, count: u16) -> Vec<u16> {
        let mut rng = rand::rng();
        let upper = if function.is_bit_access() { 1 } else { 255 };
        let values: Vec<u16> = (0..count).map(|_| rng.random_range(0..=upper)).collect();

        debug!(
            function = function.code(),
            address,
            ?values,
            "Synthetic read - randomly chosen values"
        );
        values
    }

    pub fn set_values(
        &self,
        function: FunctionCode,
        address: u16,
        values: &[u16],
    ) -> Result<(), ContextError> {
        Err(ContextError::Unsupported(format!(
            "synthetic context does not accept writes (function 0x{:02X}, address {}, {} value(s))",
            function.code(),
            address,
            values.len()
        )))
    }
}
