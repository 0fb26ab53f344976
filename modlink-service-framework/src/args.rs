//! CLI argument parsing for services.

use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments for all services.
///
/// Flattened into each binary's own argument struct.
#[derive(Args, Debug, Clone, Default)]
pub struct ServiceArgs {
    /// Path to configuration file (JSON5). Defaults apply when omitted.
    #[arg(short, long, env = "MODLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}
