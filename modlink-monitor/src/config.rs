//! Configuration for the gateway monitor.

use std::net::SocketAddr;
use std::time::Duration;

use modlink_common::LoggingConfig;
use modlink_service_framework::{ServiceConfig, ServiceError};
use serde::{Deserialize, Serialize};

use crate::peers::parse_peer;
use crate::schedule::{SchedulePolicy, Trigger};

/// Port the gateways serve Modbus TCP on.
pub const DEFAULT_GATEWAY_PORT: u16 = 5020;

/// Complete monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorServiceConfig {
    /// Where the peer set comes from
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// How a single peer is probed
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Connect phase of a fixed run
    #[serde(default)]
    pub connect: ConnectConfig,

    /// Fixed run (cycle count and spacing)
    #[serde(default)]
    pub run: RunConfig,

    /// Scheduled sweeps
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Peer discovery mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DiscoveryConfig {
    /// Fixed list of peers ("10.0.0.5" or "10.0.0.5:1502")
    Static {
        #[serde(default = "default_static_addresses")]
        addresses: Vec<String>,
    },
    /// Peers listed by the gateway directory service
    Directory(DirectoryConfig),
}

fn default_static_addresses() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::Static {
            addresses: default_static_addresses(),
        }
    }
}

impl DiscoveryConfig {
    /// Short name of the selected mode.
    pub fn mode(&self) -> &'static str {
        match self {
            DiscoveryConfig::Static { .. } => "static",
            DiscoveryConfig::Directory(_) => "directory",
        }
    }
}

/// Gateway directory service location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory host name or address
    #[serde(default)]
    pub host: String,

    /// Directory HTTP port (default: 8080)
    #[serde(default = "default_directory_port")]
    pub port: u16,

    /// Delay before re-querying after an empty answer, in seconds (default: 10)
    #[serde(default = "default_retry_secs")]
    pub retry_interval_secs: u64,

    /// HTTP request timeout in milliseconds (default: 5000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_directory_port() -> u16 {
    8080
}

fn default_retry_secs() -> u64 {
    10
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_directory_port(),
            retry_interval_secs: default_retry_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl DirectoryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Probe settings shared by fixed runs and scheduled sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Modbus TCP port used when a peer has no explicit port (default: 5020)
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Unit id sent with each request (default: 0)
    #[serde(default)]
    pub unit_id: u8,

    /// Response timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            unit_id: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connect phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Delay between connect rounds in seconds (default: 10)
    #[serde(default = "default_retry_secs")]
    pub retry_interval_secs: u64,

    /// Per-attempt connect timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Connect rounds before polling the connected subset; `null` waits forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

fn default_max_attempts() -> Option<u32> {
    Some(30)
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_secs(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Fixed run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of poll cycles (default: 10)
    #[serde(default = "default_probe_count")]
    pub probe_count: u32,

    /// Delay between cycles in seconds (default: 5)
    #[serde(default = "default_request_interval")]
    pub interval_secs: u64,
}

fn default_probe_count() -> u32 {
    10
}

fn default_request_interval() -> u64 {
    5
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            probe_count: default_probe_count(),
            interval_secs: default_request_interval(),
        }
    }
}

/// Scheduled sweep settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub trigger: TriggerConfig,

    #[serde(default)]
    pub policy: SchedulePolicy,
}

/// When sweeps fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerConfig {
    /// Cron-style fields; each accepts cron syntax ("*", "*/5", "0,30")
    Cron {
        #[serde(default = "default_cron_any")]
        hour: String,
        #[serde(default = "default_cron_any")]
        minute: String,
        #[serde(default = "default_cron_second")]
        second: String,
    },
    /// Fixed spacing in seconds
    Interval { secs: u64 },
}

fn default_cron_any() -> String {
    "*".to_string()
}

fn default_cron_second() -> String {
    "0".to_string()
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::Cron {
            hour: default_cron_any(),
            minute: default_cron_any(),
            second: default_cron_second(),
        }
    }
}

impl TriggerConfig {
    /// Build the runtime trigger.
    pub fn build(&self) -> Result<Trigger, ServiceError> {
        match self {
            TriggerConfig::Cron {
                hour,
                minute,
                second,
            } => Trigger::cron_fields(hour, minute, second)
                .map_err(|e| ServiceError::validation(e.to_string())),
            TriggerConfig::Interval { secs } => Ok(Trigger::interval(Duration::from_secs(*secs))),
        }
    }
}

impl MonitorServiceConfig {
    /// Resolve the static peer list against the probe port.
    pub fn static_peers(&self) -> Result<Vec<SocketAddr>, ServiceError> {
        match &self.discovery {
            DiscoveryConfig::Static { addresses } => addresses
                .iter()
                .map(|a| parse_peer(a, self.probe.port).map_err(ServiceError::from))
                .collect(),
            DiscoveryConfig::Directory(_) => Ok(Vec::new()),
        }
    }
}

impl ServiceConfig for MonitorServiceConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<(), ServiceError> {
        match &self.discovery {
            DiscoveryConfig::Static { addresses } => {
                if addresses.is_empty() {
                    return Err(ServiceError::validation(
                        "Static discovery needs at least one address",
                    ));
                }
                self.static_peers()?;
            }
            DiscoveryConfig::Directory(directory) => {
                if directory.host.trim().is_empty() {
                    return Err(ServiceError::validation(
                        "Directory discovery needs a service host",
                    ));
                }
                if directory.port == 0 {
                    return Err(ServiceError::validation("Directory port cannot be 0"));
                }
            }
        }

        if self.run.probe_count == 0 {
            return Err(ServiceError::validation("Probe count must be at least 1"));
        }

        if self.probe.timeout_ms == 0 || self.connect.timeout_ms == 0 {
            return Err(ServiceError::validation("Timeouts must be positive"));
        }

        if self.connect.max_attempts == Some(0) {
            return Err(ServiceError::validation(
                "Connect max_attempts must be at least 1 (or null)",
            ));
        }

        if let TriggerConfig::Interval { secs: 0 } = self.schedule.trigger {
            return Err(ServiceError::validation("Schedule interval must be positive"));
        }

        self.schedule.trigger.build()?;

        Ok(())
    }
}
