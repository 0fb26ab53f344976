//! Peer sets and where they come from.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use modlink_common::{Error, parse_ipv4};
use modlink_service_framework::ServiceError;

use crate::config::{DiscoveryConfig, MonitorServiceConfig};
use crate::directory::{DirectoryClient, DirectoryError};

/// Immutable set of peers taken at one point in time.
pub type PeerSnapshot = Arc<[SocketAddr]>;

/// Parse "a.b.c.d" or "a.b.c.d:port"; bare addresses use `default_port`.
pub fn parse_peer(text: &str, default_port: u16) -> modlink_common::Result<SocketAddr> {
    let text = text.trim();
    if let Ok(addr) = text.parse::<SocketAddrV4>() {
        return Ok(SocketAddr::V4(addr));
    }

    parse_ipv4(text)
        .map(|ip| SocketAddr::from((ip, default_port)))
        .map_err(|_| Error::InvalidAddress(text.to_string()))
}

/// Origin of the peer set.
#[derive(Debug, Clone)]
pub enum PeerSource {
    /// Fixed list
    Static(PeerSnapshot),
    /// Gateway directory; listed addresses are dialed on `port`
    Directory {
        client: DirectoryClient,
        port: u16,
        backoff: Duration,
    },
}

impl PeerSource {
    /// Build the source selected by the configuration.
    pub fn from_config(config: &MonitorServiceConfig) -> Result<Self, ServiceError> {
        match &config.discovery {
            DiscoveryConfig::Static { .. } => Ok(Self::fixed(config.static_peers()?)),
            DiscoveryConfig::Directory(directory) => {
                let client = DirectoryClient::new(
                    &directory.host,
                    directory.port,
                    directory.request_timeout(),
                )
                .map_err(|e| ServiceError::config(e.to_string()))?;

                Ok(Self::Directory {
                    client,
                    port: config.probe.port,
                    backoff: directory.retry_interval(),
                })
            }
        }
    }

    pub fn fixed(peers: impl Into<Vec<SocketAddr>>) -> Self {
        let peers: Vec<SocketAddr> = peers.into();
        Self::Static(peers.into())
    }

    /// Current peer set; may be empty in directory mode.
    pub async fn snapshot(&self) -> Result<PeerSnapshot, DirectoryError> {
        match self {
            PeerSource::Static(peers) => Ok(Arc::clone(peers)),
            PeerSource::Directory { client, port, .. } => {
                let peers = client.list_peers().await?;
                Ok(with_port(peers, *port))
            }
        }
    }

    /// Current peer set, waiting out empty directory answers.
    pub async fn wait_for_peers(&self) -> Result<PeerSnapshot, DirectoryError> {
        match self {
            PeerSource::Static(peers) => Ok(Arc::clone(peers)),
            PeerSource::Directory {
                client,
                port,
                backoff,
            } => {
                let peers = client.wait_for_peers(*backoff).await?;
                Ok(with_port(peers, *port))
            }
        }
    }
}

fn with_port(peers: Vec<std::net::Ipv4Addr>, port: u16) -> PeerSnapshot {
    peers
        .into_iter()
        .map(|ip| SocketAddr::from((ip, port)))
        .collect()
}
