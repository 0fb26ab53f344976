//! modlink Service Framework
//!
//! Common scaffolding shared by the bridge and monitor binaries.
//!
//! # Overview
//!
//! This framework provides:
//! - [`ServiceConfig`] trait for configuration loading and validation
//! - [`ServiceRunner`] for managing service lifecycle (logging, task spawning, signal handling)
//! - [`ServiceArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use modlink_service_framework::{ServiceArgs, ServiceConfig, ServiceRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = ServiceArgs::parse();
//!     let config = MyServiceConfig::load_or_default(args.config.as_deref())?;
//!
//!     let mut runner = ServiceRunner::new_with_args("myservice", config, Some(&args))?;
//!     runner.spawn(my_worker());
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;

pub use args::ServiceArgs;
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use runner::{ServiceRunner, shutdown_signal};

// Re-export commonly used types from modlink-common
pub use modlink_common::{LogFormat, LoggingConfig};
