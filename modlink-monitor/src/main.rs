//! Gateway monitor.
//!
//! `run` probes every gateway a fixed number of times and exits non-zero
//! unless every probe validated. `watch` sweeps the gateways on a schedule
//! until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modlink_monitor::config::{
    DirectoryConfig, DiscoveryConfig, MonitorServiceConfig, TriggerConfig,
};
use modlink_monitor::{DiscoveryPoller, PeerSource, PollPlan, Scheduler};
use modlink_service_framework::{ServiceArgs, ServiceConfig, ServiceRunner, shutdown_signal};
use tracing::{error, info};

/// Validates the addresses advertised by Modbus gateways.
#[derive(Parser, Debug)]
#[command(name = "modlink-monitor")]
#[command(about = "Checks that Modbus gateways advertise the address they are reached on")]
#[command(version)]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,

    #[command(subcommand)]
    command: Option<Command>,

    /// Discover gateways through the directory service
    #[arg(
        long,
        env = "DYNAMIC_ADDRESSES",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    dynamic_addresses: bool,

    /// Directory service host
    #[arg(long, env = "MANAGEMENT_SERVICE_ADDRESS")]
    directory_host: Option<String>,

    /// Directory service port
    #[arg(long, env = "MANAGEMENT_SERVICE_PORT")]
    directory_port: Option<u16>,

    /// Static gateway list (comma separated)
    #[arg(long, env = "STATIC_ADDRESSES", value_delimiter = ',')]
    addresses: Option<Vec<String>>,

    /// Seconds between probe cycles
    #[arg(long, env = "REQUEST_INTERVAL")]
    request_interval: Option<u64>,

    /// Number of probe cycles
    #[arg(long, env = "PROBE_COUNT")]
    probe_count: Option<u32>,

    /// Cron hour field for sweeps
    #[arg(long, env = "CRON_HOUR")]
    cron_hour: Option<String>,

    /// Cron minute field for sweeps
    #[arg(long, env = "CRON_MINUTE")]
    cron_minute: Option<String>,

    /// Cron second field for sweeps
    #[arg(long, env = "CRON_SECOND")]
    cron_second: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Probe all gateways a fixed number of times and report a verdict
    #[default]
    Run,
    /// Sweep the gateways on a schedule until interrupted
    Watch,
}

impl Args {
    fn config_path(&self) -> Option<&PathBuf> {
        self.service.config.as_ref()
    }

    /// Apply CLI/environment overrides on top of the loaded configuration.
    fn apply(&self, config: &mut MonitorServiceConfig) {
        if self.dynamic_addresses {
            if !matches!(config.discovery, DiscoveryConfig::Directory(_)) {
                config.discovery = DiscoveryConfig::Directory(DirectoryConfig::default());
            }
        } else if let Some(addresses) = &self.addresses {
            config.discovery = DiscoveryConfig::Static {
                addresses: addresses.clone(),
            };
        }

        if let DiscoveryConfig::Directory(directory) = &mut config.discovery {
            if let Some(host) = &self.directory_host {
                directory.host = host.clone();
            }
            if let Some(port) = self.directory_port {
                directory.port = port;
            }
        }

        if let Some(interval) = self.request_interval {
            config.run.interval_secs = interval;
        }
        if let Some(count) = self.probe_count {
            config.run.probe_count = count;
        }

        if self.cron_hour.is_some() || self.cron_minute.is_some() || self.cron_second.is_some() {
            let (hour, minute, second) = match &config.schedule.trigger {
                TriggerConfig::Cron {
                    hour,
                    minute,
                    second,
                } => (hour.clone(), minute.clone(), second.clone()),
                TriggerConfig::Interval { .. } => ("*".into(), "*".into(), "0".into()),
            };
            config.schedule.trigger = TriggerConfig::Cron {
                hour: self.cron_hour.clone().unwrap_or(hour),
                minute: self.cron_minute.clone().unwrap_or(minute),
                second: self.cron_second.clone().unwrap_or(second),
            };
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        MonitorServiceConfig::load_or_default(args.config_path().map(|p| p.as_path()))
            .with_context(|| format!("Failed to load config from {:?}", args.config_path()))?;
    args.apply(&mut config);
    config.validate().context("Invalid monitor configuration")?;

    let mut runner = ServiceRunner::new_with_args("modlink-monitor", config, Some(&args.service))
        .map_err(|e| anyhow::anyhow!("Failed to start service: {}", e))?;

    let config = runner.config().clone();
    let source = PeerSource::from_config(&config).context("Failed to set up peer discovery")?;
    let poller = DiscoveryPoller::new(source, PollPlan::from_config(&config));
    info!(discovery = config.discovery.mode(), "Peer discovery configured");

    match args.command.unwrap_or_default() {
        Command::Run => {
            let summary = tokio::select! {
                result = poller.run() => result.context("Discovery run failed")?,
                _ = shutdown_signal() => {
                    info!("Interrupted before the run completed");
                    return Ok(());
                }
            };

            if !summary.success() {
                anyhow::bail!(
                    "{} of {} probes were invalid",
                    summary.invalid(),
                    summary.probes
                );
            }
            Ok(())
        }
        Command::Watch => {
            let trigger = config
                .schedule
                .trigger
                .build()
                .context("Invalid sweep trigger")?;
            let scheduler = Scheduler::new(trigger, config.schedule.policy);
            info!(policy = ?scheduler.policy(), "Starting scheduled sweeps");

            let poller = Arc::new(poller);
            runner.spawn(async move {
                scheduler
                    .run(move || {
                        let poller = Arc::clone(&poller);
                        async move {
                            if let Err(e) = poller.sweep().await {
                                error!(error = %e, "Sweep failed");
                            }
                        }
                    })
                    .await;
            });

            runner
                .run()
                .await
                .map_err(|e| anyhow::anyhow!("Service failed: {}", e))
        }
    }
}
