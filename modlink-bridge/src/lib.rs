//! Modbus TCP to RTU bridge.
//!
//! Accepts Modbus TCP connections and serves them from a slave context:
//! a serial RTU slave, a synthetic value generator, or a fixed register
//! block advertising the gateway's address.
//!
//! # Register layout (advertise mode)
//!
//! ```text
//! holding 0..=1  IPv4 address, u32, little-endian bytes, little-endian words
//! ```

pub mod block;
pub mod config;
pub mod context;
pub mod serial;
pub mod server;
pub mod service;
pub mod synthetic;

pub use block::RegisterBlock;
pub use config::{BridgeServiceConfig, ContextConfig, SerialSettings};
pub use context::{ContextError, FunctionCode, SlaveContext};
pub use serial::{RegisterTransport, RtuTransport, SerialContext};
pub use server::BridgeServer;
pub use service::BridgeService;
pub use synthetic::SyntheticContext;
