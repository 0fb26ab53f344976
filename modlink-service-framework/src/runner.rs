//! Service runner for lifecycle management.

use std::future::Future;

use tokio::signal;
use tokio::task::JoinHandle;

use modlink_common::{LoggingConfig, init_tracing};

use crate::ServiceArgs;
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

/// Service runner that manages the lifecycle of a modlink service.
///
/// Handles:
/// - Logging initialization (with optional CLI override)
/// - Task spawning and management
/// - Graceful shutdown on Ctrl+C
pub struct ServiceRunner<C: ServiceConfig> {
    /// Service name for logging.
    name: String,
    /// Service version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: ServiceConfig> ServiceRunner<C> {
    /// Create a new service runner and initialize logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new service runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&ServiceArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| ServiceError::config(e.to_string()))?;

        tracing::info!(service = %name, version = %version, "Starting service");

        Ok(Self {
            name,
            version,
            config,
            tasks: Vec::new(),
        })
    }

    /// Get the service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the service version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: String, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %name, error = %e, "Worker failed");
            }
        });
        self.tasks.push(handle);
    }

    /// Run the service until Ctrl+C is received, then abort all workers.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            service = %self.name,
            tasks = self.tasks.len(),
            "Service running. Press Ctrl+C to stop."
        );

        shutdown_signal().await;

        tracing::info!(service = %self.name, "Received shutdown signal");

        for task in &self.tasks {
            task.abort();
        }

        // Wait briefly for tasks to clean up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        tracing::info!(service = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Resolve when Ctrl+C is received.
///
/// If the signal handler cannot be installed the error is logged and the
/// future never resolves, so the service keeps running.
pub async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
