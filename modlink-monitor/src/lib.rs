//! Gateway monitor.
//!
//! Discovers Modbus gateways (a fixed list or the gateway directory service),
//! reads the IPv4 address each gateway advertises in holding registers 0-1
//! and checks it against the address that was dialed.
//!
//! - [`directory`] - HTTP client for the gateway directory
//! - [`peers`] - Peer snapshots and their sources
//! - [`poller`] - Fixed probe runs and monitoring sweeps
//! - [`schedule`] - Interval and cron triggers for sweeps

pub mod config;
pub mod directory;
pub mod peers;
pub mod poller;
pub mod schedule;

pub use config::MonitorServiceConfig;
pub use directory::{DirectoryClient, DirectoryError, GatewayEntry};
pub use peers::{PeerSnapshot, PeerSource, parse_peer};
pub use poller::{
    ConnectedPeers, DiscoveryPoller, PeerTally, PollPlan, PollResult, ProbeError, ProbeOutcome,
    RunStats, RunSummary, probe_peer,
};
pub use schedule::{SchedulePolicy, Scheduler, Trigger};
